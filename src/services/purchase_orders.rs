use chrono::{NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    prelude::DateTimeWithTimeZone, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::{
    db::DbPool,
    entities::{
        inventory_item,
        purchase_order::{self, PurchaseOrderStatus},
        purchase_order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::AdjustmentLink,
    services::inventory::{insufficient, lock_item, post_adjustment},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub item_id: i32,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_name: Option<String>,
    pub order_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub status: Option<PurchaseOrderStatus>,
    #[serde(default)]
    pub lines: Vec<PurchaseOrderLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderDetail {
    pub order: purchase_order::Model,
    pub items: Vec<purchase_order_item::Model>,
}

fn validate_line(line: &PurchaseOrderLine) -> Result<(), ServiceError> {
    if line.quantity <= Decimal::ZERO {
        return Err(ServiceError::validation(format!(
            "Ordered quantity for item {} must be positive",
            line.item_id
        )));
    }
    if matches!(line.unit_cost, Some(cost) if cost < Decimal::ZERO) {
        return Err(ServiceError::validation("Unit cost cannot be negative"));
    }
    Ok(())
}

async fn lock_order<C>(db: &C, po_id: i32) -> Result<purchase_order::Model, ServiceError>
where
    C: ConnectionTrait,
{
    purchase_order::Entity::find_by_id(po_id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", po_id)))
}

async fn order_items<C>(
    db: &C,
    po_id: i32,
) -> Result<Vec<purchase_order_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(purchase_order_item::Entity::find()
        .filter(purchase_order_item::Column::PurchaseOrderId.eq(po_id))
        .order_by_asc(purchase_order_item::Column::InventoryItemId)
        .order_by_asc(purchase_order_item::Column::Id)
        .all(db)
        .await?)
}

async fn insert_line<C>(
    db: &C,
    po_id: i32,
    line: &PurchaseOrderLine,
) -> Result<purchase_order_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    validate_line(line)?;
    if inventory_item::Entity::find_by_id(line.item_id)
        .one(db)
        .await?
        .is_none()
    {
        return Err(ServiceError::ItemNotFound(line.item_id));
    }
    Ok(purchase_order_item::ActiveModel {
        purchase_order_id: Set(po_id),
        inventory_item_id: Set(line.item_id),
        quantity_ordered: Set(line.quantity),
        unit_cost: Set(line.unit_cost),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

/// Credits every line to on-hand, logged against the order.
async fn receive_items<C>(
    db: &C,
    po_id: i32,
    items: &[purchase_order_item::Model],
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let reason = format!("PO #{} Received", po_id);
    for line in items {
        let item = lock_item(db, line.inventory_item_id).await?;
        post_adjustment(
            db,
            item,
            line.quantity_ordered,
            &reason,
            AdjustmentLink::PurchaseOrder(po_id),
        )
        .await?;
    }
    Ok(())
}

/// Debits every line from on-hand. Fails rather than leave less on hand than is allocated.
async fn reverse_items<C>(
    db: &C,
    po_id: i32,
    items: &[purchase_order_item::Model],
    reason: &str,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    for line in items {
        let item = lock_item(db, line.inventory_item_id).await?;
        if item.available() < line.quantity_ordered {
            return Err(insufficient(&item, line.quantity_ordered));
        }
        post_adjustment(
            db,
            item,
            -line.quantity_ordered,
            reason,
            AdjustmentLink::PurchaseOrder(po_id),
        )
        .await?;
    }
    Ok(())
}

/// Purchase orders and the receipts they post to the inventory ledger.
#[derive(Clone)]
pub struct PurchaseOrderService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl PurchaseOrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates an order in Draft, or in the given status. Orders cannot be created as Received.
    #[instrument(skip(self))]
    pub async fn create_order(
        &self,
        input: NewPurchaseOrder,
    ) -> Result<PurchaseOrderDetail, ServiceError> {
        let status = input.status.unwrap_or(PurchaseOrderStatus::Draft);
        if status == PurchaseOrderStatus::Received {
            return Err(ServiceError::validation(
                "Create the order first, then mark it Received",
            ));
        }

        let now: DateTimeWithTimeZone = Utc::now().into();
        let txn = self.db_pool.begin().await?;

        let order = purchase_order::ActiveModel {
            supplier_name: Set(input
                .supplier_name
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())),
            status: Set(status),
            order_date: Set(input.order_date),
            notes: Set(input.notes),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(input.lines.len());
        for line in &input.lines {
            items.push(insert_line(&txn, order.id, line).await?);
        }

        txn.commit().await?;

        info!(purchase_order_id = order.id, lines = items.len(), "Purchase order created");
        Ok(PurchaseOrderDetail { order, items })
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, po_id: i32) -> Result<PurchaseOrderDetail, ServiceError> {
        let db = self.db_pool.as_ref();
        let order = purchase_order::Entity::find_by_id(po_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", po_id)))?;
        let items = order_items(db, po_id).await?;
        Ok(PurchaseOrderDetail { order, items })
    }

    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        po_id: i32,
        line: PurchaseOrderLine,
    ) -> Result<purchase_order_item::Model, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let order = lock_order(&txn, po_id).await?;
        if order.status == PurchaseOrderStatus::Received {
            return Err(ServiceError::InvalidStatus(format!(
                "Purchase order {} is Received; its lines cannot change",
                po_id
            )));
        }
        let row = insert_line(&txn, po_id, &line).await?;
        txn.commit().await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, po_id: i32, po_item_id: i32) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;
        let order = lock_order(&txn, po_id).await?;
        if order.status == PurchaseOrderStatus::Received {
            return Err(ServiceError::InvalidStatus(format!(
                "Purchase order {} is Received; its lines cannot change",
                po_id
            )));
        }
        let result = purchase_order_item::Entity::delete_many()
            .filter(purchase_order_item::Column::Id.eq(po_item_id))
            .filter(purchase_order_item::Column::PurchaseOrderId.eq(po_id))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Line {} not found on purchase order {}",
                po_item_id, po_id
            )));
        }
        txn.commit().await?;
        Ok(())
    }

    /// Moves the order to `status`, posting or reversing receipt when Received is entered or left.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        po_id: i32,
        status: PurchaseOrderStatus,
    ) -> Result<purchase_order::Model, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let order = lock_order(&txn, po_id).await?;
        let old_status = order.status;
        if old_status == status {
            return Ok(order);
        }

        let items = order_items(&txn, po_id).await?;
        let mut active: purchase_order::ActiveModel = order.into();

        if status == PurchaseOrderStatus::Received {
            if items.is_empty() {
                return Err(ServiceError::validation(format!(
                    "Purchase order {} has no lines to receive",
                    po_id
                )));
            }
            receive_items(&txn, po_id, &items).await?;
            active.received_at = Set(Some(Utc::now().into()));
        } else if old_status == PurchaseOrderStatus::Received {
            let reason = format!("PO #{} Status Reverted (Un-Received)", po_id);
            reverse_items(&txn, po_id, &items, &reason).await?;
            active.received_at = Set(None);
        }

        active.status = Set(status);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        counter!("batchline.purchase_orders.status_changes", 1);
        info!(
            purchase_order_id = po_id,
            old_status = %old_status,
            new_status = %status,
            "Purchase order status changed"
        );
        self.event_sender.send(Event::PurchaseOrderStatusChanged {
            purchase_order_id: po_id,
            old_status: old_status.to_string(),
            new_status: status.to_string(),
        });
        Ok(updated)
    }

    /// Deletes the order and its lines, reversing the receipt first if it was Received.
    #[instrument(skip(self))]
    pub async fn delete_order(&self, po_id: i32) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;

        let order = lock_order(&txn, po_id).await?;
        let items = order_items(&txn, po_id).await?;
        let reversed = order.status == PurchaseOrderStatus::Received;
        if reversed {
            let reason = format!("PO #{} Deleted (Reversal)", po_id);
            reverse_items(&txn, po_id, &items, &reason).await?;
        }

        purchase_order_item::Entity::delete_many()
            .filter(purchase_order_item::Column::PurchaseOrderId.eq(po_id))
            .exec(&txn)
            .await?;
        purchase_order::Entity::delete_by_id(po_id).exec(&txn).await?;

        txn.commit().await?;

        info!(purchase_order_id = po_id, reversed, "Purchase order deleted");
        self.event_sender.send(Event::PurchaseOrderDeleted {
            purchase_order_id: po_id,
            reversed,
        });
        Ok(())
    }
}
