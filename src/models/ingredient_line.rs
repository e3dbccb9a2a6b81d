use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One ingredient of a recipe: either a raw inventory item or a sub-recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngredientLine {
    Raw {
        item_id: i32,
        quantity: Decimal,
        unit: String,
    },
    SubRecipe {
        recipe_id: i32,
        quantity: Decimal,
        unit: String,
    },
}

impl IngredientLine {
    pub fn raw(item_id: i32, quantity: Decimal, unit: impl Into<String>) -> Self {
        IngredientLine::Raw {
            item_id,
            quantity,
            unit: unit.into(),
        }
    }

    pub fn sub_recipe(recipe_id: i32, quantity: Decimal, unit: impl Into<String>) -> Self {
        IngredientLine::SubRecipe {
            recipe_id,
            quantity,
            unit: unit.into(),
        }
    }

    pub fn quantity(&self) -> Decimal {
        match self {
            IngredientLine::Raw { quantity, .. } | IngredientLine::SubRecipe { quantity, .. } => {
                *quantity
            }
        }
    }

    pub fn unit(&self) -> &str {
        match self {
            IngredientLine::Raw { unit, .. } | IngredientLine::SubRecipe { unit, .. } => unit,
        }
    }
}

/// A raw ingredient requirement after sub-recipes have been expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseIngredient {
    pub item_id: i32,
    pub name: String,
    pub unit: String,
    pub quantity: Decimal,
}

impl BaseIngredient {
    /// Copy with the quantity multiplied by `factor`; `None` when the product overflows.
    pub fn checked_scaled(&self, factor: Decimal) -> Option<Self> {
        Some(Self {
            quantity: self.quantity.checked_mul(factor)?,
            ..self.clone()
        })
    }
}

/// Sum of `values`, or `None` once the running total leaves the decimal range.
pub fn checked_total<I>(values: I) -> Option<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, value| acc.checked_add(value))
}

/// Back-reference recorded on an inventory adjustment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentLink {
    Manual,
    PurchaseOrder(i32),
    WipBatch(i32),
}

impl AdjustmentLink {
    pub fn purchase_order_id(&self) -> Option<i32> {
        match self {
            AdjustmentLink::PurchaseOrder(id) => Some(*id),
            _ => None,
        }
    }

    pub fn wip_batch_id(&self) -> Option<i32> {
        match self {
            AdjustmentLink::WipBatch(id) => Some(*id),
            _ => None,
        }
    }
}
