use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Domain events published after a ledger transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RecipeSaved {
        recipe_id: i32,
        ingredient_count: usize,
    },
    InventoryAdjusted {
        item_id: i32,
        delta: Decimal,
        new_on_hand: Decimal,
        reason: String,
    },
    BatchStarted {
        batch_id: i32,
        recipe_id: i32,
    },
    InventoryAllocated {
        batch_id: i32,
        lines: Vec<(i32, Decimal)>,
    },
    BatchCompleted {
        batch_id: i32,
        actual_yield: Decimal,
        completed_at: DateTime<Utc>,
    },
    BatchDeleted {
        batch_id: i32,
        released: Vec<(i32, Decimal)>,
    },
    PurchaseOrderStatusChanged {
        purchase_order_id: i32,
        old_status: String,
        new_status: String,
    },
    PurchaseOrderDeleted {
        purchase_order_id: i32,
        reversed: bool,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: broadcast::Sender<Event>,
}

impl EventSender {
    /// Creates a sender together with a first subscriber.
    pub fn channel(capacity: usize) -> (Self, broadcast::Receiver<Event>) {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn send(&self, event: Event) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            debug!("No event subscribers; dropped {:?}", event);
        }
    }
}

/// Logs every event until all senders are dropped.
pub async fn process_events(mut rx: broadcast::Receiver<Event>) {
    info!("Starting event processing loop");

    loop {
        match rx.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event consumer lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    info!("Event processing loop stopped");
}

fn log_event(event: &Event) {
    match event {
        Event::InventoryAdjusted {
            item_id,
            delta,
            new_on_hand,
            reason,
        } => info!(
            item_id,
            delta = %delta,
            new_on_hand = %new_on_hand,
            reason = %reason,
            "Inventory adjusted"
        ),
        Event::BatchCompleted {
            batch_id,
            actual_yield,
            ..
        } => info!(batch_id, actual_yield = %actual_yield, "WIP batch completed"),
        other => info!("Received event: {:?}", other),
    }
}
