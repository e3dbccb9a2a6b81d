use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    prelude::DateTimeWithTimeZone, ActiveModelTrait, ColumnTrait, ConnectionTrait,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{btree_map::Entry, BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{ingredient, inventory_item, product, recipe, wip_batch},
    errors::ServiceError,
    events::{Event, EventSender},
    models::IngredientLine,
    services::bom::{resolve_with, ResolutionCache},
};

/// Header and full ingredient list of a recipe. Saving replaces every stored edge.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecipeInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub yield_quantity: Option<Decimal>,
    pub yield_unit: Option<String>,
    #[serde(default)]
    pub is_sold_product: bool,
    #[serde(default)]
    pub ingredients: Vec<IngredientLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDetail {
    pub recipe: recipe::Model,
    pub ingredients: Vec<IngredientLine>,
}

/// Resolved quantity for one batch, summed per unit label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTotal {
    pub unit: String,
    pub quantity: Decimal,
}

fn normalize(input: RecipeInput) -> Result<RecipeInput, ServiceError> {
    let input = RecipeInput {
        name: input.name.trim().to_string(),
        yield_unit: input
            .yield_unit
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty()),
        ..input
    };
    input.validate()?;

    if matches!(input.yield_quantity, Some(q) if q <= Decimal::ZERO) {
        return Err(ServiceError::validation("Yield quantity must be positive"));
    }
    for line in &input.ingredients {
        if line.quantity() <= Decimal::ZERO {
            return Err(ServiceError::validation(format!(
                "Ingredient quantity must be positive, got {}",
                line.quantity()
            )));
        }
    }
    Ok(input)
}

async fn ensure_references_exist<C>(
    db: &C,
    recipe_id: i32,
    lines: &[IngredientLine],
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let mut item_ids = HashSet::new();
    let mut recipe_ids = HashSet::new();
    for line in lines {
        match line {
            IngredientLine::Raw { item_id, .. } => {
                item_ids.insert(*item_id);
            }
            IngredientLine::SubRecipe {
                recipe_id: sub_id, ..
            } => {
                if *sub_id == recipe_id {
                    return Err(ServiceError::validation(format!(
                        "Recipe {} cannot use itself as an ingredient",
                        recipe_id
                    )));
                }
                recipe_ids.insert(*sub_id);
            }
        }
    }

    for item_id in item_ids {
        if inventory_item::Entity::find_by_id(item_id).one(db).await?.is_none() {
            return Err(ServiceError::ItemNotFound(item_id));
        }
    }
    for sub_id in recipe_ids {
        if recipe::Entity::find_by_id(sub_id).one(db).await?.is_none() {
            return Err(ServiceError::RecipeNotFound(sub_id));
        }
    }
    Ok(())
}

/// Replaces the recipe's edges and rejects the save if it closes a cycle.
async fn replace_ingredients(
    txn: &DatabaseTransaction,
    recipe_id: i32,
    lines: &[IngredientLine],
) -> Result<(), ServiceError> {
    ensure_references_exist(txn, recipe_id, lines).await?;

    ingredient::Entity::delete_many()
        .filter(ingredient::Column::RecipeId.eq(recipe_id))
        .exec(txn)
        .await?;
    for line in lines {
        ingredient::ActiveModel::from_line(recipe_id, line)
            .insert(txn)
            .await?;
    }

    let mut cache = ResolutionCache::new();
    resolve_with(txn, recipe_id, &mut cache).await?;
    Ok(())
}

async fn load_lines<C>(db: &C, recipe_id: i32) -> Result<Vec<IngredientLine>, ServiceError>
where
    C: ConnectionTrait,
{
    ingredient::Entity::find()
        .filter(ingredient::Column::RecipeId.eq(recipe_id))
        .order_by_asc(ingredient::Column::Id)
        .all(db)
        .await?
        .iter()
        .map(ingredient::Model::line)
        .collect()
}

/// Recipe and ingredient management.
#[derive(Clone)]
pub struct RecipeService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl RecipeService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_recipe(&self, input: RecipeInput) -> Result<RecipeDetail, ServiceError> {
        let input = normalize(input)?;
        let now: DateTimeWithTimeZone = Utc::now().into();

        let txn = self.db_pool.begin().await?;

        let created = recipe::ActiveModel {
            name: Set(input.name),
            yield_quantity: Set(input.yield_quantity),
            yield_unit: Set(input.yield_unit),
            is_sold_product: Set(input.is_sold_product),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        replace_ingredients(&txn, created.id, &input.ingredients).await?;

        txn.commit().await?;

        self.saved(created, input.ingredients)
    }

    #[instrument(skip(self))]
    pub async fn update_recipe(
        &self,
        recipe_id: i32,
        input: RecipeInput,
    ) -> Result<RecipeDetail, ServiceError> {
        let input = normalize(input)?;

        let txn = self.db_pool.begin().await?;

        let existing = recipe::Entity::find_by_id(recipe_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::RecipeNotFound(recipe_id))?;
        let mut active: recipe::ActiveModel = existing.into();
        active.name = Set(input.name);
        active.yield_quantity = Set(input.yield_quantity);
        active.yield_unit = Set(input.yield_unit);
        active.is_sold_product = Set(input.is_sold_product);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&txn).await?;
        replace_ingredients(&txn, recipe_id, &input.ingredients).await?;

        txn.commit().await?;

        self.saved(updated, input.ingredients)
    }

    fn saved(
        &self,
        recipe: recipe::Model,
        ingredients: Vec<IngredientLine>,
    ) -> Result<RecipeDetail, ServiceError> {
        info!(
            recipe_id = recipe.id,
            name = %recipe.name,
            ingredients = ingredients.len(),
            "Recipe saved"
        );
        self.event_sender.send(Event::RecipeSaved {
            recipe_id: recipe.id,
            ingredient_count: ingredients.len(),
        });
        Ok(RecipeDetail {
            recipe,
            ingredients,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_recipe(&self, recipe_id: i32) -> Result<RecipeDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let recipe = recipe::Entity::find_by_id(recipe_id)
            .one(db)
            .await?
            .ok_or(ServiceError::RecipeNotFound(recipe_id))?;
        let ingredients = load_lines(db, recipe_id).await?;
        Ok(RecipeDetail {
            recipe,
            ingredients,
        })
    }

    #[instrument(skip(self))]
    pub async fn list_recipes(&self) -> Result<Vec<recipe::Model>, ServiceError> {
        Ok(recipe::Entity::find()
            .order_by_asc(recipe::Column::Name)
            .order_by_asc(recipe::Column::Id)
            .all(self.db_pool.as_ref())
            .await?)
    }

    /// Deletes an unreferenced recipe together with its edges.
    #[instrument(skip(self))]
    pub async fn delete_recipe(&self, recipe_id: i32) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;

        let recipe = recipe::Entity::find_by_id(recipe_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::RecipeNotFound(recipe_id))?;

        let parents = ingredient::Entity::find()
            .filter(ingredient::Column::SubRecipeId.eq(recipe_id))
            .count(&txn)
            .await?;
        let products = product::Entity::find()
            .filter(product::Column::RecipeId.eq(recipe_id))
            .count(&txn)
            .await?;
        let linked_items = inventory_item::Entity::find()
            .filter(inventory_item::Column::LinkedRecipeId.eq(recipe_id))
            .count(&txn)
            .await?;
        let batches = wip_batch::Entity::find()
            .filter(wip_batch::Column::RecipeId.eq(recipe_id))
            .count(&txn)
            .await?;

        let mut uses = Vec::new();
        if parents > 0 {
            uses.push(format!("{} parent recipe(s)", parents));
        }
        if products > 0 {
            uses.push(format!("{} product(s)", products));
        }
        if linked_items > 0 {
            uses.push(format!("{} linked inventory item(s)", linked_items));
        }
        if batches > 0 {
            uses.push(format!("{} WIP batch(es)", batches));
        }
        if !uses.is_empty() {
            return Err(ServiceError::validation(format!(
                "Recipe '{}' is still used by {}",
                recipe.name,
                uses.join(", ")
            )));
        }

        ingredient::Entity::delete_many()
            .filter(ingredient::Column::RecipeId.eq(recipe_id))
            .exec(&txn)
            .await?;
        recipe::Entity::delete_by_id(recipe_id).exec(&txn).await?;

        txn.commit().await?;

        info!(recipe_id, "Recipe deleted");
        Ok(())
    }

    /// Resolved per-batch quantities summed by unit, e.g. total grams and total mLs.
    #[instrument(skip(self))]
    pub async fn recipe_unit_totals(&self, recipe_id: i32) -> Result<Vec<UnitTotal>, ServiceError> {
        let mut cache = ResolutionCache::new();
        let lines = resolve_with(self.db_pool.as_ref(), recipe_id, &mut cache).await?;

        let mut totals: BTreeMap<String, UnitTotal> = BTreeMap::new();
        for line in lines {
            match totals.entry(line.unit.to_lowercase()) {
                Entry::Occupied(mut entry) => {
                    let total = entry.get_mut();
                    total.quantity = total.quantity.checked_add(line.quantity).ok_or_else(|| {
                        ServiceError::quantity_overflow(format!(
                            "totalling {} in recipe {}",
                            line.unit, recipe_id
                        ))
                    })?;
                }
                Entry::Vacant(entry) => {
                    entry.insert(UnitTotal {
                        unit: line.unit,
                        quantity: line.quantity,
                    });
                }
            }
        }
        Ok(totals.into_values().collect())
    }
}
