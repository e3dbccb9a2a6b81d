//! Batchline library
//!
//! Recipe bill-of-materials resolution, ingredient requirements netting and the
//! inventory ledger behind production batches and purchase order receipts.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod models;
pub mod services;

pub use errors::ServiceError;
pub use services::{ServiceContainer, ServiceFactory};

use std::sync::Arc;

/// Connected pool, event channel and services for one process.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: ServiceContainer,
}

impl AppState {
    /// Wires every service onto `db` and returns the state with the first event subscriber.
    pub fn new(
        db: Arc<db::DbPool>,
        config: config::AppConfig,
    ) -> (Self, tokio::sync::broadcast::Receiver<events::Event>) {
        let (sender, receiver) = events::EventSender::channel(config.event_channel_capacity);
        let event_sender = Arc::new(sender);
        let factory = ServiceFactory::new(db.clone(), event_sender.clone(), config.planning.clone());
        let services = ServiceContainer::new(&factory);
        (
            Self {
                db,
                config,
                event_sender,
                services,
            },
            receiver,
        )
    }
}
