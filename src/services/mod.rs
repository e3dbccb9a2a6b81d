// Recipe graph and resolution
pub mod bom;
pub mod recipes;

// Inventory ledger and finished goods
pub mod inventory;
pub mod stock;

// Planning
pub mod requirements;

// Ledger mutation sources
pub mod purchase_orders;
pub mod wip;

// Service factory for dependency injection
pub mod factory;

pub use factory::{ServiceContainer, ServiceFactory};
