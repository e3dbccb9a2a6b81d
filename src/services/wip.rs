use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    prelude::DateTimeWithTimeZone, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    db::DbPool,
    entities::{
        inventory_item, wip_allocation,
        wip_batch::{self, BatchStatus, BatchType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::{AdjustmentLink, BatchTarget},
    services::{
        bom::{resolve_with, ResolutionCache},
        inventory::{change_allocated, consume_allocated, insufficient, lock_item, post_adjustment},
        requirements::{aggregate_by_item, batches_needed, scale_lines},
        stock::{change_location_stock, find_location, find_product},
    },
};

/// Output unit recorded for product batches.
pub const PRODUCT_YIELD_UNIT: &str = "jars";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub item_id: i32,
    pub quantity: Decimal,
}

/// What a batch still needs, per inventory item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequirementRow {
    pub item_id: i32,
    pub name: String,
    pub unit: String,
    pub needed: Decimal,
    pub allocated: Decimal,
    pub remaining: Decimal,
    pub available: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequirements {
    pub batch: wip_batch::Model,
    pub batches: u32,
    pub rows: Vec<BatchRequirementRow>,
}

/// Validates allocation lines and sums duplicates per item, ordered by item id.
fn merge_lines(lines: &[AllocationLine]) -> Result<BTreeMap<i32, Decimal>, ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::validation("No allocation lines given"));
    }
    let mut merged = BTreeMap::new();
    for line in lines {
        if line.quantity <= Decimal::ZERO {
            return Err(ServiceError::validation(format!(
                "Allocation quantity for item {} must be positive",
                line.item_id
            )));
        }
        let total = merged.entry(line.item_id).or_insert(Decimal::ZERO);
        *total = total.checked_add(line.quantity).ok_or_else(|| {
            ServiceError::quantity_overflow(format!("merging allocations of item {}", line.item_id))
        })?;
    }
    Ok(merged)
}

/// Items touched by a completion, in the ascending order they must be locked.
fn completion_lock_order(consumed: &BTreeMap<i32, Decimal>, output_item: Option<i32>) -> Vec<i32> {
    let mut item_ids: Vec<i32> = consumed.keys().copied().collect();
    if let Some(output_id) = output_item {
        if let Err(position) = item_ids.binary_search(&output_id) {
            item_ids.insert(position, output_id);
        }
    }
    item_ids
}

async fn lock_batch<C>(db: &C, batch_id: i32) -> Result<wip_batch::Model, ServiceError>
where
    C: ConnectionTrait,
{
    wip_batch::Entity::find_by_id(batch_id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or(ServiceError::BatchNotFound(batch_id))
}

fn ensure_in_progress(batch: &wip_batch::Model, action: &str) -> Result<(), ServiceError> {
    if batch.is_in_progress() {
        Ok(())
    } else {
        Err(ServiceError::InvalidStatus(format!(
            "WIP batch {} is {}; cannot {}",
            batch.id, batch.status, action
        )))
    }
}

async fn batch_allocations<C>(
    db: &C,
    batch_id: i32,
) -> Result<Vec<wip_allocation::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(wip_allocation::Entity::find()
        .filter(wip_allocation::Column::WipBatchId.eq(batch_id))
        .order_by_asc(wip_allocation::Column::InventoryItemId)
        .all(db)
        .await?)
}

/// Adds `quantity` to the (batch, item) allocation row, creating it on first use.
async fn accumulate_allocation<C>(
    db: &C,
    batch_id: i32,
    item_id: i32,
    quantity: Decimal,
) -> Result<wip_allocation::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let now: DateTimeWithTimeZone = Utc::now().into();
    let existing = wip_allocation::Entity::find()
        .filter(wip_allocation::Column::WipBatchId.eq(batch_id))
        .filter(wip_allocation::Column::InventoryItemId.eq(item_id))
        .one(db)
        .await?;

    let row = match existing {
        Some(row) => {
            let total = row.quantity_allocated.checked_add(quantity).ok_or_else(|| {
                ServiceError::quantity_overflow(format!(
                    "allocating item {} to batch {}",
                    item_id, batch_id
                ))
            })?;
            let mut active: wip_allocation::ActiveModel = row.into();
            active.quantity_allocated = Set(total);
            active.updated_at = Set(now);
            active.update(db).await?
        }
        None => {
            wip_allocation::ActiveModel {
                wip_batch_id: Set(batch_id),
                inventory_item_id: Set(item_id),
                quantity_allocated: Set(quantity),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(db)
            .await?
        }
    };
    Ok(row)
}

/// Production batches and the stock reserved and consumed by them.
#[derive(Clone)]
pub struct WipService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl WipService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Starts a batch of the product's recipe, to be stocked at `location_id`.
    #[instrument(skip(self))]
    pub async fn start_product_batch(
        &self,
        product_id: i32,
        location_id: i32,
        target_jars: Option<Decimal>,
    ) -> Result<wip_batch::Model, ServiceError> {
        if matches!(target_jars, Some(jars) if jars <= Decimal::ZERO) {
            return Err(ServiceError::validation("Target jars must be positive"));
        }
        let db = self.db_pool.as_ref();
        let product = find_product(db, product_id).await?;
        find_location(db, location_id).await?;

        let batch = wip_batch::ActiveModel {
            recipe_id: Set(product.recipe_id),
            batch_type: Set(BatchType::Product),
            status: Set(BatchStatus::InProgress),
            product_id: Set(Some(product.id)),
            location_id: Set(Some(location_id)),
            target_quantity: Set(target_jars),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        }
        .insert(db)
        .await?;

        self.started(&batch);
        Ok(batch)
    }

    /// Starts a batch of the recipe linked to an intermediate inventory item.
    #[instrument(skip(self))]
    pub async fn start_intermediate_batch(
        &self,
        item_id: i32,
        target_quantity: Option<Decimal>,
    ) -> Result<wip_batch::Model, ServiceError> {
        if matches!(target_quantity, Some(quantity) if quantity <= Decimal::ZERO) {
            return Err(ServiceError::validation("Target quantity must be positive"));
        }
        let db = self.db_pool.as_ref();
        let item = inventory_item::Entity::find_by_id(item_id)
            .one(db)
            .await?
            .ok_or(ServiceError::ItemNotFound(item_id))?;
        let recipe_id = item.linked_recipe_id.ok_or_else(|| {
            ServiceError::validation(format!(
                "Inventory item '{}' is not linked to a recipe",
                item.name
            ))
        })?;

        let batch = wip_batch::ActiveModel {
            recipe_id: Set(recipe_id),
            batch_type: Set(BatchType::Intermediate),
            status: Set(BatchStatus::InProgress),
            inventory_item_id: Set(Some(item.id)),
            target_quantity: Set(target_quantity),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        }
        .insert(db)
        .await?;

        self.started(&batch);
        Ok(batch)
    }

    fn started(&self, batch: &wip_batch::Model) {
        counter!("batchline.wip.batches_started", 1);
        info!(
            batch_id = batch.id,
            recipe_id = batch.recipe_id,
            batch_type = %batch.batch_type,
            "WIP batch started"
        );
        self.event_sender.send(Event::BatchStarted {
            batch_id: batch.id,
            recipe_id: batch.recipe_id,
        });
    }

    #[instrument(skip(self))]
    pub async fn get_batch(&self, batch_id: i32) -> Result<wip_batch::Model, ServiceError> {
        wip_batch::Entity::find_by_id(batch_id)
            .one(self.db_pool.as_ref())
            .await?
            .ok_or(ServiceError::BatchNotFound(batch_id))
    }

    /// Batches newest first, optionally restricted to one status.
    #[instrument(skip(self))]
    pub async fn list_batches(
        &self,
        status: Option<BatchStatus>,
    ) -> Result<Vec<wip_batch::Model>, ServiceError> {
        let mut query = wip_batch::Entity::find()
            .order_by_desc(wip_batch::Column::CreatedAt)
            .order_by_desc(wip_batch::Column::Id);
        if let Some(status) = status {
            query = query.filter(wip_batch::Column::Status.eq(status));
        }
        Ok(query.all(self.db_pool.as_ref()).await?)
    }

    #[instrument(skip(self))]
    pub async fn allocations(
        &self,
        batch_id: i32,
    ) -> Result<Vec<wip_allocation::Model>, ServiceError> {
        self.get_batch(batch_id).await?;
        batch_allocations(self.db_pool.as_ref(), batch_id).await
    }

    /// Reserves `quantity` of one item for the batch.
    #[instrument(skip(self))]
    pub async fn allocate(
        &self,
        batch_id: i32,
        item_id: i32,
        quantity: Decimal,
    ) -> Result<wip_allocation::Model, ServiceError> {
        let mut rows = self
            .bulk_allocate(batch_id, &[AllocationLine { item_id, quantity }])
            .await?;
        rows.pop()
            .ok_or_else(|| ServiceError::InternalError("Allocation produced no row".into()))
    }

    /// Reserves several items at once. Either every line is applied or none is.
    ///
    /// Items are locked in ascending id order and all availability checks run
    /// before the first write.
    #[instrument(skip(self))]
    pub async fn bulk_allocate(
        &self,
        batch_id: i32,
        lines: &[AllocationLine],
    ) -> Result<Vec<wip_allocation::Model>, ServiceError> {
        let merged = merge_lines(lines)?;

        let txn = self.db_pool.begin().await?;

        let batch = lock_batch(&txn, batch_id).await?;
        ensure_in_progress(&batch, "allocate stock")?;

        let mut checked = Vec::with_capacity(merged.len());
        for (item_id, quantity) in merged {
            let item = lock_item(&txn, item_id).await?;
            if item.available() < quantity {
                warn!(
                    batch_id,
                    item_id,
                    requested = %quantity,
                    available = %item.available(),
                    "Allocation rejected"
                );
                return Err(insufficient(&item, quantity));
            }
            checked.push((item, quantity));
        }

        let mut rows = Vec::with_capacity(checked.len());
        let mut applied = Vec::with_capacity(checked.len());
        for (item, quantity) in checked {
            let item_id = item.id;
            change_allocated(&txn, item, quantity).await?;
            rows.push(accumulate_allocation(&txn, batch_id, item_id, quantity).await?);
            applied.push((item_id, quantity));
        }

        txn.commit().await?;

        counter!("batchline.wip.allocations", applied.len() as u64);
        info!(batch_id, lines = applied.len(), "Stock allocated to WIP batch");
        self.event_sender.send(Event::InventoryAllocated {
            batch_id,
            lines: applied,
        });
        Ok(rows)
    }

    /// Consumes the batch's reservations and books `actual_yield` as output.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        batch_id: i32,
        actual_yield: Decimal,
    ) -> Result<wip_batch::Model, ServiceError> {
        if actual_yield < Decimal::ZERO {
            return Err(ServiceError::validation("Actual yield cannot be negative"));
        }

        let txn = self.db_pool.begin().await?;

        let batch = lock_batch(&txn, batch_id).await?;
        ensure_in_progress(&batch, "complete it")?;
        let target = batch.target()?;

        let allocations = batch_allocations(&txn, batch_id).await?;
        if allocations.is_empty() {
            return Err(ServiceError::EmptyBatchCompletion(batch_id));
        }

        let reason = format!("WIP Batch #{} Completed", batch_id);
        let yield_reason = format!("{} (Yield)", reason);
        let link = AdjustmentLink::WipBatch(batch_id);
        let output_item = match target {
            BatchTarget::Intermediate { item_id } => Some(item_id),
            BatchTarget::Product { .. } => None,
        };
        let consumed: BTreeMap<i32, Decimal> = allocations
            .iter()
            .map(|a| (a.inventory_item_id, a.quantity_allocated))
            .collect();

        let mut output_unit = None;
        for item_id in completion_lock_order(&consumed, output_item) {
            let mut item = lock_item(&txn, item_id).await?;
            if let Some(quantity) = consumed.get(&item_id) {
                item = consume_allocated(&txn, item, *quantity, &reason, link).await?;
            }
            if output_item == Some(item_id) {
                output_unit = Some(item.unit.clone());
                post_adjustment(&txn, item, actual_yield, &yield_reason, link).await?;
            }
        }

        let yield_unit = match target {
            BatchTarget::Product {
                product_id,
                location_id,
            } => {
                change_location_stock(&txn, product_id, location_id, actual_yield).await?;
                PRODUCT_YIELD_UNIT.to_string()
            }
            BatchTarget::Intermediate { item_id } => {
                output_unit.ok_or(ServiceError::ItemNotFound(item_id))?
            }
        };

        let completed_at = Utc::now();
        let mut active: wip_batch::ActiveModel = batch.into();
        active.status = Set(BatchStatus::Completed);
        active.actual_yield = Set(Some(actual_yield));
        active.actual_yield_unit = Set(Some(yield_unit));
        active.completed_at = Set(Some(completed_at.into()));
        let completed = active.update(&txn).await?;

        txn.commit().await?;

        counter!("batchline.wip.batches_completed", 1);
        info!(batch_id, actual_yield = %actual_yield, "WIP batch completed");
        self.event_sender.send(Event::BatchCompleted {
            batch_id,
            actual_yield,
            completed_at,
        });
        Ok(completed)
    }

    /// Releases every reservation and removes the batch. Only In Progress batches can be deleted.
    #[instrument(skip(self))]
    pub async fn delete_batch(&self, batch_id: i32) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;

        let batch = lock_batch(&txn, batch_id).await?;
        ensure_in_progress(&batch, "delete it")?;

        let allocations = batch_allocations(&txn, batch_id).await?;
        let mut released = Vec::with_capacity(allocations.len());
        for allocation in &allocations {
            let item = lock_item(&txn, allocation.inventory_item_id).await?;
            change_allocated(&txn, item, -allocation.quantity_allocated).await?;
            released.push((allocation.inventory_item_id, allocation.quantity_allocated));
        }

        wip_allocation::Entity::delete_many()
            .filter(wip_allocation::Column::WipBatchId.eq(batch_id))
            .exec(&txn)
            .await?;
        wip_batch::Entity::delete_by_id(batch_id).exec(&txn).await?;

        txn.commit().await?;

        info!(batch_id, released = released.len(), "WIP batch deleted");
        self.event_sender
            .send(Event::BatchDeleted { batch_id, released });
        Ok(())
    }

    /// Per-item needs of the batch against what it already holds.
    #[instrument(skip(self))]
    pub async fn batch_requirements(
        &self,
        batch_id: i32,
    ) -> Result<BatchRequirements, ServiceError> {
        let db = self.db_pool.as_ref();
        let batch = self.get_batch(batch_id).await?;

        let batches = match batch.target()? {
            BatchTarget::Product { product_id, .. } => {
                let product = find_product(db, product_id).await?;
                match (batch.target_quantity, product.usable_jars_per_batch()) {
                    (Some(target), Some(jars_per_batch)) => {
                        batches_needed(target, jars_per_batch)?
                    }
                    _ => 1,
                }
            }
            BatchTarget::Intermediate { .. } => 1,
        };

        let mut cache = ResolutionCache::new();
        let factor = Decimal::from(batches);
        let resolved = resolve_with(db, batch.recipe_id, &mut cache).await?;
        let needed = aggregate_by_item(scale_lines(resolved, factor, batch.recipe_id)?)?;

        let allocated: HashMap<i32, Decimal> = batch_allocations(db, batch_id)
            .await?
            .into_iter()
            .map(|a| (a.inventory_item_id, a.quantity_allocated))
            .collect();

        let mut item_ids: Vec<i32> = needed.keys().copied().collect();
        item_ids.extend(allocated.keys().filter(|id| !needed.contains_key(*id)));
        let items: HashMap<i32, inventory_item::Model> = inventory_item::Entity::find()
            .filter(inventory_item::Column::Id.is_in(item_ids.clone()))
            .all(db)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        let mut rows = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            let item = items
                .get(&item_id)
                .ok_or(ServiceError::ItemNotFound(item_id))?;
            let needed_qty = needed.get(&item_id).map_or(Decimal::ZERO, |l| l.quantity);
            let allocated_qty = allocated.get(&item_id).copied().unwrap_or(Decimal::ZERO);
            rows.push(BatchRequirementRow {
                item_id,
                name: item.name.trim().to_string(),
                unit: item.unit.trim().to_string(),
                needed: needed_qty,
                allocated: allocated_qty,
                remaining: (needed_qty - allocated_qty).max(Decimal::ZERO),
                available: item.available(),
            });
        }
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.item_id.cmp(&b.item_id)));

        Ok(BatchRequirements {
            batch,
            batches,
            rows,
        })
    }
}
