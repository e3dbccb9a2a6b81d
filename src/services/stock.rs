use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    prelude::DateTimeWithTimeZone, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{location, location_stock, product, recipe, stock_minimum},
    errors::ServiceError,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewProduct {
    pub recipe_id: i32,
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub product_name: String,
    pub jars_per_batch: Option<Decimal>,
}

async fn stock_row<C>(
    db: &C,
    product_id: i32,
    location_id: i32,
    lock: bool,
) -> Result<Option<location_stock::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut query = location_stock::Entity::find()
        .filter(location_stock::Column::ProductId.eq(product_id))
        .filter(location_stock::Column::LocationId.eq(location_id));
    if lock {
        query = query.lock_exclusive();
    }
    Ok(query.one(db).await?)
}

/// Adds `delta` jars to a product's stock at a location, creating the row if needed.
///
/// The resulting quantity may not go negative.
pub(crate) async fn change_location_stock<C>(
    db: &C,
    product_id: i32,
    location_id: i32,
    delta: Decimal,
) -> Result<location_stock::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let now: DateTimeWithTimeZone = Utc::now().into();
    let existing = stock_row(db, product_id, location_id, true).await?;
    let current = existing.as_ref().map_or(Decimal::ZERO, |row| row.quantity);
    let new_quantity = current.checked_add(delta).ok_or_else(|| {
        ServiceError::quantity_overflow(format!(
            "updating stock of product {} at location {}",
            product_id, location_id
        ))
    })?;
    if new_quantity < Decimal::ZERO {
        return Err(ServiceError::validation(format!(
            "Location {} holds {} jars of product {}, cannot remove {}",
            location_id, current, product_id, -delta
        )));
    }

    let row = match existing {
        Some(row) => {
            let mut active: location_stock::ActiveModel = row.into();
            active.quantity = Set(new_quantity);
            active.updated_at = Set(now);
            active.update(db).await?
        }
        None => {
            location_stock::ActiveModel {
                product_id: Set(product_id),
                location_id: Set(location_id),
                quantity: Set(new_quantity),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(db)
            .await?
        }
    };
    Ok(row)
}

pub(crate) async fn find_product<C>(db: &C, product_id: i32) -> Result<product::Model, ServiceError>
where
    C: ConnectionTrait,
{
    product::Entity::find_by_id(product_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
}

pub(crate) async fn find_location<C>(
    db: &C,
    location_id: i32,
) -> Result<location::Model, ServiceError>
where
    C: ConnectionTrait,
{
    location::Entity::find_by_id(location_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Location {} not found", location_id)))
}

/// Locations, products, stock minimums and finished stock.
#[derive(Clone)]
pub struct StockService {
    db_pool: Arc<DbPool>,
}

impl StockService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn create_location(&self, name: &str) -> Result<location::Model, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::validation("Location name cannot be blank"));
        }
        let created = location::ActiveModel {
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(self.db_pool.as_ref())
        .await?;
        info!(location_id = created.id, name = %created.name, "Location created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn create_product(&self, input: NewProduct) -> Result<product::Model, ServiceError> {
        let input = NewProduct {
            sku: input.sku.trim().to_string(),
            product_name: input.product_name.trim().to_string(),
            ..input
        };
        input.validate()?;
        if matches!(input.jars_per_batch, Some(jpb) if jpb <= Decimal::ZERO) {
            return Err(ServiceError::validation("jars_per_batch must be positive"));
        }

        let db = self.db_pool.as_ref();
        let recipe = recipe::Entity::find_by_id(input.recipe_id)
            .one(db)
            .await?
            .ok_or(ServiceError::RecipeNotFound(input.recipe_id))?;
        if !recipe.is_sold_product {
            return Err(ServiceError::validation(format!(
                "Recipe '{}' is not marked as a sold product",
                recipe.name
            )));
        }

        let created = product::ActiveModel {
            recipe_id: Set(recipe.id),
            sku: Set(input.sku),
            product_name: Set(input.product_name),
            jars_per_batch: Set(input.jars_per_batch),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        }
        .insert(db)
        .await?;
        info!(product_id = created.id, sku = %created.sku, "Product created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn set_minimum(
        &self,
        product_id: i32,
        location_id: i32,
        min_jars: i32,
    ) -> Result<stock_minimum::Model, ServiceError> {
        if min_jars < 0 {
            return Err(ServiceError::validation("Minimum jars cannot be negative"));
        }
        let db = self.db_pool.as_ref();
        find_product(db, product_id).await?;
        find_location(db, location_id).await?;

        let existing = stock_minimum::Entity::find()
            .filter(stock_minimum::Column::ProductId.eq(product_id))
            .filter(stock_minimum::Column::LocationId.eq(location_id))
            .one(db)
            .await?;
        let saved = match existing {
            Some(row) => {
                let mut active: stock_minimum::ActiveModel = row.into();
                active.min_jars = Set(min_jars);
                active.update(db).await?
            }
            None => {
                stock_minimum::ActiveModel {
                    product_id: Set(product_id),
                    location_id: Set(location_id),
                    min_jars: Set(min_jars),
                    ..Default::default()
                }
                .insert(db)
                .await?
            }
        };
        Ok(saved)
    }

    /// Overwrites the stock count for a product at a location.
    #[instrument(skip(self))]
    pub async fn set_location_stock(
        &self,
        product_id: i32,
        location_id: i32,
        quantity: Decimal,
    ) -> Result<location_stock::Model, ServiceError> {
        if quantity < Decimal::ZERO {
            return Err(ServiceError::validation("Stock quantity cannot be negative"));
        }

        let txn = self.db_pool.begin().await?;
        find_product(&txn, product_id).await?;
        find_location(&txn, location_id).await?;

        let current = stock_row(&txn, product_id, location_id, true)
            .await?
            .map_or(Decimal::ZERO, |row| row.quantity);
        let row = change_location_stock(&txn, product_id, location_id, quantity - current).await?;
        txn.commit().await?;
        Ok(row)
    }

    /// Jars on hand, zero when no row exists.
    #[instrument(skip(self))]
    pub async fn location_stock(
        &self,
        product_id: i32,
        location_id: i32,
    ) -> Result<Decimal, ServiceError> {
        Ok(stock_row(self.db_pool.as_ref(), product_id, location_id, false)
            .await?
            .map_or(Decimal::ZERO, |row| row.quantity))
    }

    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        product_id: i32,
        from_location_id: i32,
        to_location_id: i32,
        quantity: Decimal,
    ) -> Result<(), ServiceError> {
        if from_location_id == to_location_id {
            return Err(ServiceError::validation(
                "Source and destination locations must differ",
            ));
        }
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::validation("Transfer quantity must be positive"));
        }

        let txn = self.db_pool.begin().await?;
        find_product(&txn, product_id).await?;
        find_location(&txn, from_location_id).await?;
        find_location(&txn, to_location_id).await?;

        change_location_stock(&txn, product_id, from_location_id, -quantity).await?;
        change_location_stock(&txn, product_id, to_location_id, quantity).await?;
        txn.commit().await?;

        info!(
            product_id,
            from_location_id,
            to_location_id,
            quantity = %quantity,
            "Finished stock transferred"
        );
        Ok(())
    }
}
