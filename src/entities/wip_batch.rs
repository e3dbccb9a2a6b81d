use crate::errors::ServiceError;
use crate::models::BatchTarget;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum BatchType {
    #[sea_orm(string_value = "PRODUCT")]
    #[strum(serialize = "PRODUCT")]
    Product,
    #[sea_orm(string_value = "INTERMEDIATE")]
    #[strum(serialize = "INTERMEDIATE")]
    Intermediate,
}

/// Deleted batches are removed rather than stored with a status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum BatchStatus {
    #[sea_orm(string_value = "In Progress")]
    #[strum(serialize = "In Progress")]
    InProgress,
    #[sea_orm(string_value = "Completed")]
    #[strum(serialize = "Completed")]
    Completed,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wip_batches")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub recipe_id: i32,
    pub batch_type: BatchType,
    pub status: BatchStatus,
    pub product_id: Option<i32>,
    pub location_id: Option<i32>,
    pub inventory_item_id: Option<i32>,
    /// Planned output: jars for product batches, item units for intermediates.
    pub target_quantity: Option<Decimal>,
    pub actual_yield: Option<Decimal>,
    pub actual_yield_unit: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub completed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::wip_allocation::Entity")]
    Allocations,
}

impl Related<super::wip_allocation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_in_progress(&self) -> bool {
        self.status == BatchStatus::InProgress
    }

    pub fn target(&self) -> Result<BatchTarget, ServiceError> {
        match (self.batch_type, self.product_id, self.location_id, self.inventory_item_id) {
            (BatchType::Product, Some(product_id), Some(location_id), _) => {
                Ok(BatchTarget::Product {
                    product_id,
                    location_id,
                })
            }
            (BatchType::Intermediate, _, _, Some(item_id)) => {
                Ok(BatchTarget::Intermediate { item_id })
            }
            _ => Err(ServiceError::InternalError(format!(
                "WIP batch {} has no output target for type {}",
                self.id, self.batch_type
            ))),
        }
    }
}
