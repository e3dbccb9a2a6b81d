use crate::errors::ServiceError;
use crate::models::IngredientLine;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Ingredient edge of a recipe. Exactly one of `inventory_item_id` and
/// `sub_recipe_id` is set; rows are only written through [`IngredientLine`].
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ingredients")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub recipe_id: i32,
    pub inventory_item_id: Option<i32>,
    pub sub_recipe_id: Option<i32>,
    pub quantity: Decimal,
    pub unit: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::recipe::Entity",
        from = "Column::RecipeId",
        to = "super::recipe::Column::Id"
    )]
    Recipe,
    #[sea_orm(
        belongs_to = "super::inventory_item::Entity",
        from = "Column::InventoryItemId",
        to = "super::inventory_item::Column::Id"
    )]
    InventoryItem,
}

impl Related<super::recipe::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recipe.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Typed view of the edge. Rows referencing both or neither target are rejected.
    pub fn line(&self) -> Result<IngredientLine, ServiceError> {
        match (self.inventory_item_id, self.sub_recipe_id) {
            (Some(item_id), None) => Ok(IngredientLine::raw(item_id, self.quantity, &self.unit)),
            (None, Some(recipe_id)) => Ok(IngredientLine::sub_recipe(
                recipe_id,
                self.quantity,
                &self.unit,
            )),
            _ => Err(ServiceError::ValidationError(format!(
                "Ingredient {} of recipe {} must reference exactly one of an inventory item or a sub-recipe",
                self.id, self.recipe_id
            ))),
        }
    }
}

impl ActiveModel {
    pub fn from_line(recipe_id: i32, line: &IngredientLine) -> Self {
        let (inventory_item_id, sub_recipe_id) = match line {
            IngredientLine::Raw { item_id, .. } => (Some(*item_id), None),
            IngredientLine::SubRecipe { recipe_id, .. } => (None, Some(*recipe_id)),
        };
        ActiveModel {
            recipe_id: sea_orm::Set(recipe_id),
            inventory_item_id: sea_orm::Set(inventory_item_id),
            sub_recipe_id: sea_orm::Set(sub_recipe_id),
            quantity: sea_orm::Set(line.quantity()),
            unit: sea_orm::Set(line.unit().trim().to_string()),
            ..Default::default()
        }
    }
}
