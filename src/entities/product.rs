use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sellable product made from a sold recipe.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub recipe_id: i32,
    #[sea_orm(unique)]
    pub sku: String,
    pub product_name: String,
    /// Sellable units (jars) produced by one batch of the recipe.
    pub jars_per_batch: Option<Decimal>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::recipe::Entity",
        from = "Column::RecipeId",
        to = "super::recipe::Column::Id"
    )]
    Recipe,
}

impl Related<super::recipe::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recipe.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Conversion factor usable for batch counts, if one is configured.
    pub fn usable_jars_per_batch(&self) -> Option<Decimal> {
        self.jars_per_batch.filter(|jpb| *jpb > Decimal::ZERO)
    }
}
