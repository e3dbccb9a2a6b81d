//! Domain types that are not persisted as tables of their own.

pub mod batch_target;
pub mod ingredient_line;
pub mod yield_unit;

pub use batch_target::BatchTarget;
pub use ingredient_line::{checked_total, AdjustmentLink, BaseIngredient, IngredientLine};
pub use yield_unit::YieldUnit;
