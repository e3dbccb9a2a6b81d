use serde::{Deserialize, Serialize};

/// What a WIP batch produces once completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchTarget {
    /// Sellable units credited to a (product, location) stock row.
    Product { product_id: i32, location_id: i32 },
    /// Quantity credited to the on-hand of an intermediate inventory item.
    Intermediate { item_id: i32 },
}
