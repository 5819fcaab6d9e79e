use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Events are informational; losing one never rolls back committed state.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping domain event");
        }
    }
}

/// Domain events emitted after a state change has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartItemUpserted {
        owner: String,
        product_id: Uuid,
        quantity: i32,
    },
    CartCleared {
        owner: String,
        removed: u64,
    },

    // Order events
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        owner: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),

    // Payment events
    PaymentCreated {
        payment_id: Uuid,
        order_id: Uuid,
        payment_reference: String,
    },
    PaymentInitialized {
        order_id: Uuid,
        payment_reference: String,
    },
    PaymentCompleted {
        payment_id: Uuid,
        order_id: Uuid,
        payment_reference: String,
        amount: Decimal,
    },
    PaymentRefunded {
        payment_id: Uuid,
        order_id: Uuid,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CartItemUpserted { .. } => "cart_item_upserted",
            Event::CartCleared { .. } => "cart_cleared",
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::OrderCancelled(_) => "order_cancelled",
            Event::PaymentCreated { .. } => "payment_created",
            Event::PaymentInitialized { .. } => "payment_initialized",
            Event::PaymentCompleted { .. } => "payment_completed",
            Event::PaymentRefunded { .. } => "payment_refunded",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
                owner,
            } => {
                info!(%order_id, %order_number, %owner, "Order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "Order status changed");
            }
            Event::PaymentCompleted {
                payment_id,
                order_id,
                payment_reference,
                amount,
            } => {
                info!(%payment_id, %order_id, %payment_reference, %amount, "Payment completed");
            }
            other => {
                info!(event = other.name(), payload = ?other, "Domain event");
            }
        }
    }

    info!("Event channel closed; event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        let order_id = Uuid::new_v4();
        sender.send(Event::OrderCancelled(order_id)).await.unwrap();

        assert_eq!(rx.recv().await, Some(Event::OrderCancelled(order_id)));
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        assert!(sender.send(Event::OrderCancelled(Uuid::new_v4())).await.is_err());
        // Must not panic
        sender
            .send_or_log(Event::CartCleared {
                owner: "session:abc".into(),
                removed: 2,
            })
            .await;
    }

    #[tokio::test]
    async fn process_events_stops_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(process_events(rx));

        EventSender::new(tx)
            .send_or_log(Event::PaymentInitialized {
                order_id: Uuid::new_v4(),
                payment_reference: "PAY-x".into(),
            })
            .await;

        handle.await.unwrap();
    }
}
