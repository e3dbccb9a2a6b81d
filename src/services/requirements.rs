use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::collections::{btree_map::Entry, BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::{
    config::PlanningConfig,
    db::DbPool,
    entities::{
        inventory_item, location_stock, product,
        purchase_order::{self, PurchaseOrderStatus},
        recipe, stock_minimum,
        wip_batch::{self, BatchStatus},
    },
    errors::ServiceError,
    models::{checked_total, BaseIngredient},
    services::bom::{resolve_with, ResolutionCache},
};

/// Demand for whole batches of one recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandLine {
    pub recipe_id: i32,
    pub batches: u32,
}

/// Which items a requirements report lists.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum ReportScope {
    /// Only items with a shortfall.
    #[default]
    ShortagesOnly,
    /// Every item with demand, short or not.
    Demanded,
    /// Every demanded item plus stocked items nothing asked for.
    WithSurplus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementRow {
    pub item_id: i32,
    pub name: String,
    pub unit: String,
    pub total_needed: Decimal,
    pub on_hand: Decimal,
    pub allocated: Decimal,
    pub available: Decimal,
    pub net_needed: Decimal,
}

/// Batch demand derived for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDemand {
    pub product_id: i32,
    pub product_name: String,
    pub recipe_id: i32,
    pub jars_to_produce: Decimal,
    pub jars_per_batch: Decimal,
    pub batches: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRequirementsReport {
    pub forecast_multiplier: u32,
    pub products: Vec<ProductDemand>,
    pub rows: Vec<RequirementRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTarget {
    pub product_id: i32,
    pub jars: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionPlan {
    pub products: Vec<ProductDemand>,
    pub rows: Vec<RequirementRow>,
}

/// Per-batch ingredient quantity summed across recipes that share a name and unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientTotal {
    pub name: String,
    pub unit: String,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub in_progress_batches: u64,
    pub open_purchase_orders: u64,
    pub low_stock_items: usize,
}

/// Whole batches needed to make `jars` sellable units. Always rounds up.
pub fn batches_needed(jars: Decimal, jars_per_batch: Decimal) -> Result<u32, ServiceError> {
    if jars_per_batch <= Decimal::ZERO {
        return Err(ServiceError::validation(format!(
            "jars_per_batch must be positive, got {}",
            jars_per_batch
        )));
    }
    if jars <= Decimal::ZERO {
        return Ok(0);
    }
    jars.checked_div(jars_per_batch)
        .and_then(|batches| batches.ceil().to_u32())
        .ok_or_else(|| {
            ServiceError::validation(format!(
                "{} jars at {} per batch exceeds the supported batch count",
                jars, jars_per_batch
            ))
        })
}

/// Shortfall after subtracting what is not already reserved.
pub fn net_needed(total_needed: Decimal, on_hand: Decimal, allocated: Decimal) -> Decimal {
    (total_needed - (on_hand - allocated)).max(Decimal::ZERO)
}

/// Multiplies every line by `factor` for `batches` batches of `recipe_id`.
pub(crate) fn scale_lines(
    lines: Vec<BaseIngredient>,
    factor: Decimal,
    recipe_id: i32,
) -> Result<Vec<BaseIngredient>, ServiceError> {
    lines
        .iter()
        .map(|line| {
            line.checked_scaled(factor).ok_or_else(|| {
                ServiceError::quantity_overflow(format!(
                    "scaling recipe {} by {}",
                    recipe_id, factor
                ))
            })
        })
        .collect()
}

/// Sums base ingredient lines per inventory item.
pub fn aggregate_by_item<I>(lines: I) -> Result<BTreeMap<i32, BaseIngredient>, ServiceError>
where
    I: IntoIterator<Item = BaseIngredient>,
{
    let mut grouped: BTreeMap<i32, BaseIngredient> = BTreeMap::new();
    for line in lines {
        match grouped.entry(line.item_id) {
            Entry::Occupied(mut entry) => {
                let acc = entry.get_mut();
                acc.quantity = acc.quantity.checked_add(line.quantity).ok_or_else(|| {
                    ServiceError::quantity_overflow(format!("summing item {}", line.item_id))
                })?;
            }
            Entry::Vacant(entry) => {
                entry.insert(line);
            }
        }
    }
    Ok(grouped)
}

/// Sums base ingredient lines per trimmed, case-insensitive `(name, unit)`.
pub fn aggregate_by_name_unit<I>(lines: I) -> Result<Vec<IngredientTotal>, ServiceError>
where
    I: IntoIterator<Item = BaseIngredient>,
{
    let mut grouped: BTreeMap<(String, String), IngredientTotal> = BTreeMap::new();
    for line in lines {
        let name = line.name.trim().to_string();
        let unit = line.unit.trim().to_string();
        match grouped.entry((name.to_lowercase(), unit.to_lowercase())) {
            Entry::Occupied(mut entry) => {
                let acc = entry.get_mut();
                acc.quantity = acc.quantity.checked_add(line.quantity).ok_or_else(|| {
                    ServiceError::quantity_overflow(format!("summing {} ({})", name, unit))
                })?;
            }
            Entry::Vacant(entry) => {
                entry.insert(IngredientTotal {
                    name,
                    unit,
                    quantity: line.quantity,
                });
            }
        }
    }
    Ok(grouped.into_values().collect())
}

/// Resolves and scales every demand line within one resolution run.
pub(crate) async fn resolve_demand<C>(
    db: &C,
    demand: &[DemandLine],
    cache: &mut ResolutionCache,
) -> Result<BTreeMap<i32, BaseIngredient>, ServiceError>
where
    C: ConnectionTrait + Sync,
{
    let mut scaled = Vec::new();
    for line in demand.iter().filter(|line| line.batches > 0) {
        let factor = Decimal::from(line.batches);
        let base = resolve_with(db, line.recipe_id, cache).await?;
        scaled.extend(scale_lines(base, factor, line.recipe_id)?);
    }
    aggregate_by_item(scaled)
}

fn sort_rows(rows: &mut [RequirementRow]) {
    rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.item_id.cmp(&b.item_id)));
}

async fn build_rows<C>(
    db: &C,
    demand: &[DemandLine],
    scope: ReportScope,
) -> Result<Vec<RequirementRow>, ServiceError>
where
    C: ConnectionTrait + Sync,
{
    let mut cache = ResolutionCache::new();
    let grouped = resolve_demand(db, demand, &mut cache).await?;

    let items: HashMap<i32, inventory_item::Model> = inventory_item::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|item| (item.id, item))
        .collect();

    let mut rows = Vec::with_capacity(grouped.len());
    for (item_id, line) in &grouped {
        let item = items
            .get(item_id)
            .ok_or(ServiceError::ItemNotFound(*item_id))?;
        let row = RequirementRow {
            item_id: *item_id,
            name: line.name.clone(),
            unit: line.unit.clone(),
            total_needed: line.quantity,
            on_hand: item.quantity_on_hand,
            allocated: item.quantity_allocated,
            available: item.available(),
            net_needed: net_needed(line.quantity, item.quantity_on_hand, item.quantity_allocated),
        };
        if scope != ReportScope::ShortagesOnly || row.net_needed > Decimal::ZERO {
            rows.push(row);
        }
    }

    if scope == ReportScope::WithSurplus {
        rows.extend(
            items
                .values()
                .filter(|item| !grouped.contains_key(&item.id) && !item.quantity_on_hand.is_zero())
                .map(|item| RequirementRow {
                    item_id: item.id,
                    name: item.name.trim().to_string(),
                    unit: item.unit.trim().to_string(),
                    total_needed: Decimal::ZERO,
                    on_hand: item.quantity_on_hand,
                    allocated: item.quantity_allocated,
                    available: item.available(),
                    net_needed: Decimal::ZERO,
                }),
        );
    }

    sort_rows(&mut rows);
    debug!(
        rows = rows.len(),
        expansions = cache.expansions(),
        "Requirements computed"
    );
    Ok(rows)
}

/// Batch demand per product from stock minimums, scaled by `multiplier`.
async fn demand_from_minimums<C>(
    db: &C,
    multiplier: u32,
) -> Result<Vec<ProductDemand>, ServiceError>
where
    C: ConnectionTrait,
{
    let products = product::Entity::find()
        .order_by_asc(product::Column::Id)
        .all(db)
        .await?;
    let minimums = stock_minimum::Entity::find().all(db).await?;
    let stock = location_stock::Entity::find().all(db).await?;

    let mut demand = Vec::new();
    for product in products {
        let Some(jars_per_batch) = product.usable_jars_per_batch() else {
            continue;
        };

        let product_minimums: Vec<&stock_minimum::Model> = minimums
            .iter()
            .filter(|m| m.product_id == product.id)
            .collect();
        if product_minimums.is_empty() {
            continue;
        }

        let overflow =
            || ServiceError::quantity_overflow(format!("totalling stock of product {}", product.id));
        let min_total = checked_total(product_minimums.iter().map(|m| Decimal::from(m.min_jars)))
            .and_then(|total| total.checked_mul(Decimal::from(multiplier)))
            .ok_or_else(overflow)?;
        let locations: HashSet<i32> = product_minimums.iter().map(|m| m.location_id).collect();
        let stock_total = checked_total(
            stock
                .iter()
                .filter(|s| s.product_id == product.id && locations.contains(&s.location_id))
                .map(|s| s.quantity),
        )
        .ok_or_else(overflow)?;

        let jars = (min_total - stock_total).max(Decimal::ZERO);
        let batches = batches_needed(jars, jars_per_batch)?;
        if batches > 0 {
            demand.push(ProductDemand {
                product_id: product.id,
                product_name: product.product_name,
                recipe_id: product.recipe_id,
                jars_to_produce: jars,
                jars_per_batch,
                batches,
            });
        }
    }
    Ok(demand)
}

fn demand_lines(products: &[ProductDemand]) -> Vec<DemandLine> {
    products
        .iter()
        .map(|p| DemandLine {
            recipe_id: p.recipe_id,
            batches: p.batches,
        })
        .collect()
}

/// Nets aggregated recipe demand against the inventory ledger.
#[derive(Clone)]
pub struct RequirementsService {
    db_pool: Arc<DbPool>,
    planning: PlanningConfig,
}

impl RequirementsService {
    pub fn new(db_pool: Arc<DbPool>, planning: PlanningConfig) -> Self {
        Self { db_pool, planning }
    }

    /// Net raw-ingredient shortfall for the given batch demand, sorted by item name.
    #[instrument(skip(self))]
    pub async fn compute_requirements(
        &self,
        demand: &[DemandLine],
        scope: ReportScope,
    ) -> Result<Vec<RequirementRow>, ServiceError> {
        build_rows(self.db_pool.as_ref(), demand, scope).await
    }

    /// Shortfall for replenishing every product to its stock minimums.
    ///
    /// `forecast_multiplier` defaults to the configured default and must be an
    /// allowed value.
    #[instrument(skip(self))]
    pub async fn stock_requirements(
        &self,
        forecast_multiplier: Option<u32>,
    ) -> Result<StockRequirementsReport, ServiceError> {
        let multiplier = forecast_multiplier.unwrap_or(self.planning.default_forecast_months);
        if !self.planning.allows(multiplier) {
            return Err(ServiceError::validation(format!(
                "Forecast multiplier {} is not one of {:?}",
                multiplier, self.planning.allowed_forecast_months
            )));
        }
        self.stock_requirements_unchecked(multiplier).await
    }

    async fn stock_requirements_unchecked(
        &self,
        multiplier: u32,
    ) -> Result<StockRequirementsReport, ServiceError> {
        let db = self.db_pool.as_ref();
        let products = demand_from_minimums(db, multiplier).await?;
        let rows = build_rows(db, &demand_lines(&products), ReportScope::ShortagesOnly).await?;

        info!(
            forecast_multiplier = multiplier,
            products = products.len(),
            shortages = rows.len(),
            "Stock requirements computed"
        );
        Ok(StockRequirementsReport {
            forecast_multiplier: multiplier,
            products,
            rows,
        })
    }

    /// Ad-hoc plan: target jars per product, no minimums involved.
    #[instrument(skip(self))]
    pub async fn plan_production(
        &self,
        targets: &[PlanTarget],
    ) -> Result<ProductionPlan, ServiceError> {
        let db = self.db_pool.as_ref();

        let mut products = Vec::with_capacity(targets.len());
        for target in targets {
            if target.jars < Decimal::ZERO {
                return Err(ServiceError::validation(format!(
                    "Target jars for product {} cannot be negative",
                    target.product_id
                )));
            }
            let product = product::Entity::find_by_id(target.product_id)
                .one(db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", target.product_id))
                })?;
            let jars_per_batch = product.usable_jars_per_batch().ok_or_else(|| {
                ServiceError::validation(format!(
                    "Product {} has no jars_per_batch configured",
                    product.id
                ))
            })?;
            products.push(ProductDemand {
                product_id: product.id,
                product_name: product.product_name,
                recipe_id: product.recipe_id,
                jars_to_produce: target.jars,
                jars_per_batch,
                batches: batches_needed(target.jars, jars_per_batch)?,
            });
        }

        let rows = build_rows(db, &demand_lines(&products), ReportScope::Demanded).await?;
        Ok(ProductionPlan { products, rows })
    }

    /// One batch of every recipe, grouped by ingredient name and unit.
    #[instrument(skip(self))]
    pub async fn ingredient_totals(&self) -> Result<Vec<IngredientTotal>, ServiceError> {
        let db = self.db_pool.as_ref();
        let recipes = recipe::Entity::find()
            .order_by_asc(recipe::Column::Id)
            .all(db)
            .await?;

        let mut cache = ResolutionCache::new();
        let mut lines = Vec::new();
        for recipe in &recipes {
            lines.extend(resolve_with(db, recipe.id, &mut cache).await?);
        }
        aggregate_by_name_unit(lines)
    }

    #[instrument(skip(self))]
    pub async fn dashboard(&self) -> Result<DashboardSummary, ServiceError> {
        let db = self.db_pool.as_ref();

        let in_progress_batches = wip_batch::Entity::find()
            .filter(wip_batch::Column::Status.eq(BatchStatus::InProgress))
            .count(db)
            .await?;
        let open_purchase_orders = purchase_order::Entity::find()
            .filter(
                purchase_order::Column::Status
                    .is_in([PurchaseOrderStatus::Placed, PurchaseOrderStatus::Shipped]),
            )
            .count(db)
            .await?;
        let low_stock_items = self.stock_requirements_unchecked(1).await?.rows.len();

        Ok(DashboardSummary {
            in_progress_batches,
            open_purchase_orders,
            low_stock_items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(item_id: i32, name: &str, unit: &str, quantity: Decimal) -> BaseIngredient {
        BaseIngredient {
            item_id,
            name: name.into(),
            unit: unit.into(),
            quantity,
        }
    }

    #[test]
    fn nets_against_unreserved_stock() {
        assert_eq!(net_needed(dec!(100), dec!(80), dec!(20)), dec!(40));
        assert_eq!(net_needed(dec!(10), dec!(80), dec!(20)), Decimal::ZERO);
    }

    #[test]
    fn batch_count_rounds_up() {
        assert_eq!(batches_needed(dec!(25), dec!(12)).unwrap(), 3);
        assert_eq!(batches_needed(dec!(24), dec!(12)).unwrap(), 2);
        assert_eq!(batches_needed(dec!(0.5), dec!(12)).unwrap(), 1);
        assert_eq!(batches_needed(dec!(-4), dec!(12)).unwrap(), 0);
        assert!(batches_needed(dec!(10), Decimal::ZERO).is_err());
    }

    #[test]
    fn batch_count_beyond_decimal_range_is_rejected() {
        assert!(matches!(
            batches_needed(Decimal::MAX, dec!(0.0001)),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn sums_beyond_decimal_range_are_rejected() {
        let lines = vec![
            line(1, "Sugar", "grams", Decimal::MAX),
            line(1, "Sugar", "grams", dec!(1)),
        ];
        assert!(matches!(
            aggregate_by_item(lines.clone()),
            Err(ServiceError::ValidationError(_))
        ));
        assert!(matches!(
            aggregate_by_name_unit(lines),
            Err(ServiceError::ValidationError(_))
        ));
        assert!(matches!(
            scale_lines(vec![line(1, "Sugar", "grams", Decimal::MAX)], dec!(3), 9),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn groups_by_item_id() {
        let grouped = aggregate_by_item(vec![
            line(2, "Sugar", "grams", dec!(10)),
            line(1, "Butter", "grams", dec!(5)),
            line(2, "Sugar", "grams", dec!(2.5)),
        ])
        .unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&2].quantity, dec!(12.5));
        assert_eq!(grouped[&1].quantity, dec!(5));
    }

    #[test]
    fn groups_by_trimmed_name_and_unit_ignoring_case() {
        let totals = aggregate_by_name_unit(vec![
            line(1, "Sugar ", "Grams", dec!(10)),
            line(7, "sugar", "grams", dec!(5)),
            line(3, "Sugar", "mLs", dec!(1)),
        ])
        .unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].name, "Sugar");
        assert_eq!(totals[0].quantity, dec!(15));
        assert_eq!(totals[1].unit, "mLs");
    }

    #[test]
    fn report_scope_parses_kebab_case() {
        assert_eq!(
            "with-surplus".parse::<ReportScope>().unwrap(),
            ReportScope::WithSurplus
        );
        assert_eq!(ReportScope::ShortagesOnly.to_string(), "shortages-only");
    }
}
