use async_recursion::async_recursion;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::{
    db::DbPool,
    entities::{ingredient, inventory_item, recipe},
    errors::{format_chain, ServiceError},
    models::{BaseIngredient, IngredientLine, YieldUnit},
};

/// Fully resolved recipes for a single resolution run.
///
/// Create one per report or request and drop it afterwards; ledger changes
/// between runs are never visible through a reused cache.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    resolved: HashMap<i32, Vec<BaseIngredient>>,
    headers: HashMap<i32, recipe::Model>,
    expansions: usize,
    header_loads: usize,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, recipe_id: i32) -> bool {
        self.resolved.contains_key(&recipe_id)
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Number of recipes whose ingredient edges were actually loaded and expanded.
    pub fn expansions(&self) -> usize {
        self.expansions
    }

    /// Number of recipe rows read from the database during the run.
    pub fn header_loads(&self) -> usize {
        self.header_loads
    }
}

/// Multiplier applied to a sub-recipe's base ingredients for one parent edge.
///
/// Returns `Ok(None)` when the sub-recipe's yield does not support scaling;
/// callers fall back to a ratio of one.
pub fn scaling_ratio(
    edge_quantity: Decimal,
    yield_quantity: Option<Decimal>,
    yield_unit: Option<YieldUnit>,
) -> Result<Option<Decimal>, ServiceError> {
    match yield_unit {
        Some(unit) if unit.is_measure() => match yield_quantity {
            Some(yield_quantity) if !yield_quantity.is_zero() => edge_quantity
                .checked_div(yield_quantity)
                .map(Some)
                .ok_or_else(|| {
                    ServiceError::quantity_overflow(format!(
                        "dividing {} by yield {}",
                        edge_quantity, yield_quantity
                    ))
                }),
            _ => Ok(None),
        },
        Some(YieldUnit::Batches) => Ok(Some(edge_quantity)),
        _ => Ok(None),
    }
}

fn sub_recipe_ratio(
    parent_id: i32,
    edge_quantity: Decimal,
    sub: &recipe::Model,
) -> Result<Decimal, ServiceError> {
    let ratio = scaling_ratio(edge_quantity, sub.yield_quantity, sub.yield_unit())?;
    Ok(ratio.unwrap_or_else(|| {
        warn!(
            parent_recipe_id = parent_id,
            sub_recipe_id = sub.id,
            sub_recipe = %sub.name,
            yield_quantity = ?sub.yield_quantity,
            yield_unit = ?sub.yield_unit,
            "Sub-recipe has no usable yield; scaling by 1"
        );
        Decimal::ONE
    }))
}

fn overflow_in(in_progress: &[i32], sub_id: i32) -> ServiceError {
    let mut chain = in_progress.to_vec();
    chain.push(sub_id);
    ServiceError::quantity_overflow(format!("resolving recipe chain {}", format_chain(&chain)))
}

/// Recipe header for `recipe_id`, read from the database at most once per run.
async fn load_recipe<C>(
    db: &C,
    recipe_id: i32,
    cache: &mut ResolutionCache,
) -> Result<recipe::Model, ServiceError>
where
    C: ConnectionTrait,
{
    if let Some(header) = cache.headers.get(&recipe_id) {
        return Ok(header.clone());
    }
    let header = recipe::Entity::find_by_id(recipe_id)
        .one(db)
        .await?
        .ok_or(ServiceError::RecipeNotFound(recipe_id))?;
    cache.header_loads += 1;
    cache.headers.insert(recipe_id, header.clone());
    Ok(header)
}

/// Expands `recipe_id` into the raw ingredients for one batch, through `cache`.
///
/// Works on any connection, so it can run inside a ledger transaction.
pub async fn resolve_with<C>(
    db: &C,
    recipe_id: i32,
    cache: &mut ResolutionCache,
) -> Result<Vec<BaseIngredient>, ServiceError>
where
    C: ConnectionTrait + Sync,
{
    let mut in_progress = Vec::new();
    expand(db, recipe_id, cache, &mut in_progress).await
}

#[async_recursion]
async fn expand<C>(
    db: &C,
    recipe_id: i32,
    cache: &mut ResolutionCache,
    in_progress: &mut Vec<i32>,
) -> Result<Vec<BaseIngredient>, ServiceError>
where
    C: ConnectionTrait + Sync,
{
    if let Some(hit) = cache.resolved.get(&recipe_id) {
        return Ok(hit.clone());
    }

    if let Some(start) = in_progress.iter().position(|id| *id == recipe_id) {
        let mut chain = in_progress[start..].to_vec();
        chain.push(recipe_id);
        return Err(ServiceError::CyclicRecipe { chain });
    }

    in_progress.push(recipe_id);
    let expanded = expand_edges(db, recipe_id, cache, in_progress).await;
    in_progress.pop();

    let lines = expanded?;
    cache.resolved.insert(recipe_id, lines.clone());
    Ok(lines)
}

async fn expand_edges<C>(
    db: &C,
    recipe_id: i32,
    cache: &mut ResolutionCache,
    in_progress: &mut Vec<i32>,
) -> Result<Vec<BaseIngredient>, ServiceError>
where
    C: ConnectionTrait + Sync,
{
    let recipe = load_recipe(db, recipe_id, cache).await?;

    let lines = ingredient::Entity::find()
        .filter(ingredient::Column::RecipeId.eq(recipe_id))
        .order_by_asc(ingredient::Column::Id)
        .all(db)
        .await?
        .iter()
        .map(ingredient::Model::line)
        .collect::<Result<Vec<_>, _>>()?;

    let raw_ids: Vec<i32> = lines
        .iter()
        .filter_map(|line| match line {
            IngredientLine::Raw { item_id, .. } => Some(*item_id),
            IngredientLine::SubRecipe { .. } => None,
        })
        .collect();

    let items: HashMap<i32, inventory_item::Model> = if raw_ids.is_empty() {
        HashMap::new()
    } else {
        inventory_item::Entity::find()
            .filter(inventory_item::Column::Id.is_in(raw_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect()
    };

    cache.expansions += 1;
    debug!(recipe_id, recipe = %recipe.name, edges = lines.len(), "Expanding recipe");

    let mut output = Vec::with_capacity(lines.len());
    for line in lines {
        match line {
            IngredientLine::Raw {
                item_id, quantity, ..
            } => {
                let item = items
                    .get(&item_id)
                    .ok_or(ServiceError::ItemNotFound(item_id))?;
                output.push(BaseIngredient {
                    item_id,
                    name: item.name.trim().to_string(),
                    unit: item.unit.trim().to_string(),
                    quantity,
                });
            }
            IngredientLine::SubRecipe {
                recipe_id: sub_id,
                quantity,
                ..
            } => {
                let sub = load_recipe(db, sub_id, cache).await?;
                let ratio = sub_recipe_ratio(recipe_id, quantity, &sub)
                    .map_err(|_| overflow_in(in_progress.as_slice(), sub_id))?;
                let nested = expand(db, sub_id, cache, in_progress).await?;
                for base in &nested {
                    let scaled = base
                        .checked_scaled(ratio)
                        .ok_or_else(|| overflow_in(in_progress.as_slice(), sub_id))?;
                    output.push(scaled);
                }
            }
        }
    }

    Ok(output)
}

/// Flattens recipes into raw ingredient requirements.
#[derive(Clone)]
pub struct BomService {
    db_pool: Arc<DbPool>,
}

impl BomService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Raw ingredients for one batch of `recipe_id`, using a fresh cache.
    #[instrument(skip(self))]
    pub async fn resolve(&self, recipe_id: i32) -> Result<Vec<BaseIngredient>, ServiceError> {
        let mut cache = ResolutionCache::new();
        self.resolve_cached(recipe_id, &mut cache).await
    }

    /// Same as [`BomService::resolve`] but shares `cache` with the rest of a run.
    #[instrument(skip(self, cache))]
    pub async fn resolve_cached(
        &self,
        recipe_id: i32,
        cache: &mut ResolutionCache,
    ) -> Result<Vec<BaseIngredient>, ServiceError> {
        counter!("batchline.bom.resolutions", 1);
        resolve_with(self.db_pool.as_ref(), recipe_id, cache).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(dec!(250), Some(dec!(500)), Some(YieldUnit::Grams), Some(dec!(0.5)))]
    #[case(dec!(750), Some(dec!(250)), Some(YieldUnit::Milliliters), Some(dec!(3)))]
    #[case(dec!(2), Some(dec!(500)), Some(YieldUnit::Batches), Some(dec!(2)))]
    #[case(dec!(0.5), None, Some(YieldUnit::Batches), Some(dec!(0.5)))]
    #[case(dec!(250), Some(dec!(0)), Some(YieldUnit::Grams), None)]
    #[case(dec!(250), None, Some(YieldUnit::Milliliters), None)]
    #[case(dec!(250), Some(dec!(500)), None, None)]
    fn scaling_ratio_follows_yield_unit(
        #[case] edge: Decimal,
        #[case] yield_quantity: Option<Decimal>,
        #[case] unit: Option<YieldUnit>,
        #[case] expected: Option<Decimal>,
    ) {
        assert_eq!(scaling_ratio(edge, yield_quantity, unit).unwrap(), expected);
    }

    #[test]
    fn ratio_outside_decimal_range_is_an_error() {
        let result = scaling_ratio(Decimal::MAX, Some(dec!(0.5)), Some(YieldUnit::Grams));
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
    }

    #[test]
    fn unusable_yield_falls_back_to_one() {
        let now: sea_orm::prelude::DateTimeWithTimeZone = chrono::Utc::now().into();
        let sub = recipe::Model {
            id: 2,
            name: "Caramel".into(),
            yield_quantity: None,
            yield_unit: Some("jars".into()),
            is_sold_product: false,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(sub_recipe_ratio(1, dec!(300), &sub).unwrap(), Decimal::ONE);
    }

    #[test]
    fn fresh_cache_is_empty() {
        let cache = ResolutionCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.expansions(), 0);
        assert_eq!(cache.header_loads(), 0);
        assert!(!cache.contains(1));
    }
}
