use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    prelude::DateTimeWithTimeZone,
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{inventory_adjustment, inventory_item, recipe},
    errors::ServiceError,
    events::{Event, EventSender},
    models::AdjustmentLink,
};

pub const MANUAL_ADJUSTMENT_REASON: &str = "Manual Adjustment";

/// Reads an inventory item under an exclusive row lock.
///
/// Must be called inside a transaction; the lock is held until it ends.
pub(crate) async fn lock_item<C>(db: &C, item_id: i32) -> Result<inventory_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    inventory_item::Entity::find_by_id(item_id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or(ServiceError::ItemNotFound(item_id))
}

/// Applies on-hand and allocated deltas to a locked item.
///
/// Every on-hand change appends an adjustment row carrying the resulting
/// on-hand; allocation-only changes are not part of the audit trail.
async fn apply_change<C>(
    db: &C,
    item: inventory_item::Model,
    on_hand_delta: Decimal,
    allocated_delta: Decimal,
    reason: &str,
    link: AdjustmentLink,
) -> Result<inventory_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let overflow = || ServiceError::quantity_overflow(format!("updating item {}", item.id));
    let new_on_hand = item
        .quantity_on_hand
        .checked_add(on_hand_delta)
        .ok_or_else(overflow)?;
    let new_allocated = item
        .quantity_allocated
        .checked_add(allocated_delta)
        .ok_or_else(overflow)?;
    if new_allocated < Decimal::ZERO {
        return Err(ServiceError::InternalError(format!(
            "Allocated quantity of item {} would become negative ({})",
            item.id, new_allocated
        )));
    }

    let now: DateTimeWithTimeZone = Utc::now().into();
    let mut active: inventory_item::ActiveModel = item.into();
    active.quantity_on_hand = Set(new_on_hand);
    active.quantity_allocated = Set(new_allocated);
    active.updated_at = Set(now);
    let updated = active.update(db).await?;

    if !on_hand_delta.is_zero() {
        inventory_adjustment::ActiveModel {
            inventory_item_id: Set(updated.id),
            adjustment_quantity: Set(on_hand_delta),
            new_quantity_on_hand: Set(new_on_hand),
            reason: Set(reason.to_string()),
            purchase_order_id: Set(link.purchase_order_id()),
            wip_batch_id: Set(link.wip_batch_id()),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;

        counter!("batchline.ledger.adjustments", 1);
        info!(
            item_id = updated.id,
            delta = %on_hand_delta,
            new_on_hand = %new_on_hand,
            reason,
            "Inventory adjusted"
        );
    }

    Ok(updated)
}

/// Changes on-hand by `delta` and logs it.
pub(crate) async fn post_adjustment<C>(
    db: &C,
    item: inventory_item::Model,
    delta: Decimal,
    reason: &str,
    link: AdjustmentLink,
) -> Result<inventory_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    apply_change(db, item, delta, Decimal::ZERO, reason, link).await
}

/// Reserves (`delta > 0`) or releases (`delta < 0`) stock without touching on-hand.
pub(crate) async fn change_allocated<C>(
    db: &C,
    item: inventory_item::Model,
    delta: Decimal,
) -> Result<inventory_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    apply_change(db, item, Decimal::ZERO, delta, "", AdjustmentLink::Manual).await
}

/// Turns a reservation into consumption: on-hand and allocated both drop by `quantity`.
pub(crate) async fn consume_allocated<C>(
    db: &C,
    item: inventory_item::Model,
    quantity: Decimal,
    reason: &str,
    link: AdjustmentLink,
) -> Result<inventory_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    apply_change(db, item, -quantity, -quantity, reason, link).await
}

pub(crate) fn insufficient(item: &inventory_item::Model, requested: Decimal) -> ServiceError {
    ServiceError::InsufficientStock {
        item_id: item.id,
        item_name: item.name.clone(),
        requested,
        available: item.available(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewInventoryItem {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 50))]
    pub unit: String,
    pub quantity_on_hand: Decimal,
    pub linked_recipe_id: Option<i32>,
}

/// Raw inventory items and their adjustment trail.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates an item. `(name, unit)` must be unique ignoring case.
    #[instrument(skip(self))]
    pub async fn create_item(
        &self,
        input: NewInventoryItem,
    ) -> Result<inventory_item::Model, ServiceError> {
        let input = NewInventoryItem {
            name: input.name.trim().to_string(),
            unit: input.unit.trim().to_string(),
            ..input
        };
        input.validate()?;
        if input.quantity_on_hand < Decimal::ZERO {
            return Err(ServiceError::validation(
                "Initial quantity on hand cannot be negative",
            ));
        }

        let db = self.db_pool.as_ref();

        let duplicate = inventory_item::Entity::find()
            .filter(
                Expr::expr(Func::lower(Expr::col(inventory_item::Column::Name)))
                    .eq(input.name.to_lowercase()),
            )
            .filter(
                Expr::expr(Func::lower(Expr::col(inventory_item::Column::Unit)))
                    .eq(input.unit.to_lowercase()),
            )
            .one(db)
            .await?;
        if let Some(existing) = duplicate {
            return Err(ServiceError::validation(format!(
                "Inventory item '{}' ({}) already exists as item {}",
                input.name, input.unit, existing.id
            )));
        }

        if let Some(recipe_id) = input.linked_recipe_id {
            ensure_recipe_exists(db, recipe_id).await?;
        }

        let now: DateTimeWithTimeZone = Utc::now().into();
        let created = inventory_item::ActiveModel {
            name: Set(input.name),
            unit: Set(input.unit),
            quantity_on_hand: Set(input.quantity_on_hand),
            quantity_allocated: Set(Decimal::ZERO),
            linked_recipe_id: Set(input.linked_recipe_id),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(item_id = created.id, name = %created.name, "Inventory item created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_item(&self, item_id: i32) -> Result<inventory_item::Model, ServiceError> {
        inventory_item::Entity::find_by_id(item_id)
            .one(self.db_pool.as_ref())
            .await?
            .ok_or(ServiceError::ItemNotFound(item_id))
    }

    #[instrument(skip(self))]
    pub async fn list_items(&self) -> Result<Vec<inventory_item::Model>, ServiceError> {
        Ok(inventory_item::Entity::find()
            .order_by_asc(inventory_item::Column::Name)
            .order_by_asc(inventory_item::Column::Id)
            .all(self.db_pool.as_ref())
            .await?)
    }

    /// Marks the item as the output of `recipe_id`, or clears the link.
    #[instrument(skip(self))]
    pub async fn link_recipe(
        &self,
        item_id: i32,
        recipe_id: Option<i32>,
    ) -> Result<inventory_item::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let item = self.get_item(item_id).await?;
        if let Some(recipe_id) = recipe_id {
            ensure_recipe_exists(db, recipe_id).await?;
        }

        let mut active: inventory_item::ActiveModel = item.into();
        active.linked_recipe_id = Set(recipe_id);
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(db).await?)
    }

    /// Manual stock correction. The result may not leave less on hand than is allocated.
    #[instrument(skip(self))]
    pub async fn adjust(
        &self,
        item_id: i32,
        delta: Decimal,
        reason: Option<String>,
    ) -> Result<inventory_item::Model, ServiceError> {
        if delta.is_zero() {
            return Err(ServiceError::validation("Adjustment quantity cannot be zero"));
        }
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| MANUAL_ADJUSTMENT_REASON.to_string());

        let txn = self.db_pool.begin().await?;

        let item = lock_item(&txn, item_id).await?;
        if delta < Decimal::ZERO && item.available() < -delta {
            return Err(insufficient(&item, -delta));
        }
        let updated = post_adjustment(&txn, item, delta, &reason, AdjustmentLink::Manual).await?;

        txn.commit().await?;

        self.event_sender.send(Event::InventoryAdjusted {
            item_id,
            delta,
            new_on_hand: updated.quantity_on_hand,
            reason,
        });
        Ok(updated)
    }

    /// Adjustment rows, newest first.
    #[instrument(skip(self))]
    pub async fn adjustment_log(
        &self,
        item_id: Option<i32>,
        limit: Option<u64>,
    ) -> Result<Vec<inventory_adjustment::Model>, ServiceError> {
        let mut query = inventory_adjustment::Entity::find()
            .order_by_desc(inventory_adjustment::Column::CreatedAt)
            .order_by_desc(inventory_adjustment::Column::Id);
        if let Some(item_id) = item_id {
            query = query.filter(inventory_adjustment::Column::InventoryItemId.eq(item_id));
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        Ok(query.all(self.db_pool.as_ref()).await?)
    }
}

async fn ensure_recipe_exists<C>(db: &C, recipe_id: i32) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    recipe::Entity::find_by_id(recipe_id)
        .one(db)
        .await?
        .map(|_| ())
        .ok_or(ServiceError::RecipeNotFound(recipe_id))
}
