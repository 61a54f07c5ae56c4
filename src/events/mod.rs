use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

/// Domain events emitted by the services. Delivery is best effort: a send
/// failure is logged and never propagated to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    UserRegistered(Uuid),
    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    ProductDeleted(Uuid),
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemRemoved { cart_id: Uuid, item_id: Uuid },
    CartCleared(Uuid),
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),
    PaymentSucceeded { intent_id: String },
    PaymentFailed { intent_id: String },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("failed to send event: {}", e))
    }

    /// Fire-and-forget send used on hot paths.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event.clone()).await {
            error!(?event, error = %e, "dropping domain event");
        }
    }
}

/// Drains the event channel for the life of the process. Currently events are
/// only logged; downstream consumers subscribe here when they appear.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(?event, "domain event");
    }
}
