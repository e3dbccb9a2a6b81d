use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Stock reserved for a batch. One row per (batch, item); repeat allocations accumulate.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wip_allocations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub wip_batch_id: i32,
    pub inventory_item_id: i32,
    pub quantity_allocated: Decimal,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::wip_batch::Entity",
        from = "Column::WipBatchId",
        to = "super::wip_batch::Column::Id"
    )]
    WipBatch,
    #[sea_orm(
        belongs_to = "super::inventory_item::Entity",
        from = "Column::InventoryItemId",
        to = "super::inventory_item::Column::Id"
    )]
    InventoryItem,
}

impl Related<super::wip_batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WipBatch.def()
    }
}

impl Related<super::inventory_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
