use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::entities::{OrderItemStatus, PaymentStatus, RefundStatus};

/// Default capacity of the in-process event channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a bounded channel and returns both halves.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the receiver is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events published after a state change has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: i64,
        user_id: i64,
    },
    PaymentStatusChanged {
        order_id: i64,
        status: PaymentStatus,
    },
    OrderItemStatusChanged {
        item_id: i64,
        from: OrderItemStatus,
        to: OrderItemStatus,
    },
    OrderItemCancelled {
        item_id: i64,
    },
    RefundRequested {
        refund_id: i64,
        order_item_id: i64,
    },
    RefundDecided {
        refund_id: i64,
        status: RefundStatus,
    },
}

/// Drains the channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated { order_id, user_id } => {
                info!(order_id, user_id, "order created");
            }
            Event::PaymentStatusChanged { order_id, status } => {
                info!(order_id, status = %status, "payment status changed");
            }
            Event::OrderItemStatusChanged { item_id, from, to } => {
                info!(item_id, from = %from, to = %to, "order item status changed");
            }
            Event::OrderItemCancelled { item_id } => {
                info!(item_id, "order item cancelled");
            }
            Event::RefundRequested {
                refund_id,
                order_item_id,
            } => {
                info!(refund_id, order_item_id, "refund requested");
            }
            Event::RefundDecided { refund_id, status } => {
                info!(refund_id, status = %status, "refund decided");
            }
        }
    }

    info!("Event processing loop stopped");
}
