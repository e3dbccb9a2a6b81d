pub mod ingredient;
pub mod inventory_adjustment;
pub mod inventory_item;
pub mod location;
pub mod location_stock;
pub mod product;
pub mod purchase_order;
pub mod purchase_order_item;
pub mod recipe;
pub mod stock_minimum;
pub mod wip_allocation;
pub mod wip_batch;
