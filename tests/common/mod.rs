#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use batchline::{
    config::AppConfig,
    db::{self, DbConfig, DbPool},
    entities::{inventory_adjustment, inventory_item, wip_allocation},
    events::Event,
    models::IngredientLine,
    services::{
        inventory::NewInventoryItem,
        recipes::RecipeInput,
        stock::NewProduct,
    },
    AppState, ServiceContainer,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use tokio::sync::broadcast;

/// Services wired onto a fresh, migrated database.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub services: ServiceContainer,
    pub events: broadcast::Receiver<Event>,
}

impl TestApp {
    /// Private in-memory SQLite database on a single connection.
    pub async fn new() -> Self {
        Self::connect(DbConfig::in_memory_sqlite()).await
    }

    /// SQLite database file under `dir`, pooled so transactions overlap.
    pub async fn on_sqlite_file(dir: &Path, max_connections: u32) -> Self {
        Self::connect(DbConfig {
            url: format!("sqlite://{}?mode=rwc", dir.join("batchline.db").display()),
            max_connections,
            ..Default::default()
        })
        .await
    }

    /// Existing database at `url`, e.g. Postgres for row-lock tests.
    pub async fn on_database(url: &str, max_connections: u32) -> Self {
        Self::connect(DbConfig {
            url: url.to_string(),
            max_connections,
            ..Default::default()
        })
        .await
    }

    async fn connect(config: DbConfig) -> Self {
        let pool = db::establish_connection_with_config(&config)
            .await
            .expect("failed to open test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let (state, events) = AppState::new(
            Arc::new(pool),
            AppConfig::for_database(config.url.as_str()),
        );
        Self {
            db: state.db.clone(),
            services: state.services.clone(),
            events,
        }
    }

    pub async fn item(&self, name: &str, unit: &str, on_hand: Decimal) -> i32 {
        self.services
            .inventory
            .create_item(NewInventoryItem {
                name: name.to_string(),
                unit: unit.to_string(),
                quantity_on_hand: on_hand,
                linked_recipe_id: None,
            })
            .await
            .expect("failed to create inventory item")
            .id
    }

    pub async fn recipe(
        &self,
        name: &str,
        yield_quantity: Option<Decimal>,
        yield_unit: Option<&str>,
        ingredients: Vec<IngredientLine>,
    ) -> i32 {
        self.services
            .recipes
            .create_recipe(RecipeInput {
                name: name.to_string(),
                yield_quantity,
                yield_unit: yield_unit.map(str::to_string),
                is_sold_product: false,
                ingredients,
            })
            .await
            .expect("failed to create recipe")
            .recipe
            .id
    }

    pub async fn sold_recipe(&self, name: &str, ingredients: Vec<IngredientLine>) -> i32 {
        self.services
            .recipes
            .create_recipe(RecipeInput {
                name: name.to_string(),
                yield_quantity: None,
                yield_unit: None,
                is_sold_product: true,
                ingredients,
            })
            .await
            .expect("failed to create sold recipe")
            .recipe
            .id
    }

    pub async fn product(&self, recipe_id: i32, sku: &str, jars_per_batch: Option<Decimal>) -> i32 {
        self.services
            .stock
            .create_product(NewProduct {
                recipe_id,
                sku: sku.to_string(),
                product_name: format!("Product {sku}"),
                jars_per_batch,
            })
            .await
            .expect("failed to create product")
            .id
    }

    pub async fn location(&self, name: &str) -> i32 {
        self.services
            .stock
            .create_location(name)
            .await
            .expect("failed to create location")
            .id
    }

    /// Sold recipe, product and location ready for a product batch.
    pub async fn product_line(
        &self,
        sku: &str,
        ingredients: Vec<IngredientLine>,
        jars_per_batch: Option<Decimal>,
    ) -> (i32, i32, i32) {
        let recipe_id = self.sold_recipe(&format!("{sku} recipe"), ingredients).await;
        let product_id = self.product(recipe_id, sku, jars_per_batch).await;
        let location_id = self.location(&format!("{sku} kitchen")).await;
        (recipe_id, product_id, location_id)
    }

    pub async fn item_state(&self, item_id: i32) -> inventory_item::Model {
        inventory_item::Entity::find_by_id(item_id)
            .one(self.db.as_ref())
            .await
            .expect("query failed")
            .expect("item missing")
    }

    /// Sum of every batch's allocation rows for an item.
    pub async fn allocated_by_rows(&self, item_id: i32) -> Decimal {
        wip_allocation::Entity::find()
            .filter(wip_allocation::Column::InventoryItemId.eq(item_id))
            .all(self.db.as_ref())
            .await
            .expect("query failed")
            .iter()
            .map(|row| row.quantity_allocated)
            .sum()
    }

    /// Adjustment rows for an item, oldest first.
    pub async fn adjustments(&self, item_id: i32) -> Vec<inventory_adjustment::Model> {
        inventory_adjustment::Entity::find()
            .filter(inventory_adjustment::Column::InventoryItemId.eq(item_id))
            .order_by_asc(inventory_adjustment::Column::Id)
            .all(self.db.as_ref())
            .await
            .expect("query failed")
    }
}

pub fn raw(item_id: i32, quantity: Decimal) -> IngredientLine {
    IngredientLine::raw(item_id, quantity, "grams")
}

pub fn sub(recipe_id: i32, quantity: Decimal, unit: &str) -> IngredientLine {
    IngredientLine::sub_recipe(recipe_id, quantity, unit)
}
