use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the checkout and order services. Emission is
/// best-effort; a full channel or missing consumer never fails a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CheckoutSessionCreated {
        user_id: Uuid,
        session_id: String,
        total_minor_units: i64,
    },
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),
    CouponIssued {
        user_id: Uuid,
        code: String,
    },
    CouponRedeemed {
        user_id: Uuid,
        code: String,
    },
    TransactionFlagged {
        user_id: Uuid,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, logging instead of failing when the bus is down.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("Failed to publish event: {}", e);
        }
    }
}

/// Consumer task: drains the bus and logs each event. Downstream fan-out
/// (email, analytics) hangs off this loop in deployments that need it.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "event: order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id = %order_id, from = %old_status, to = %new_status, "event: order status changed");
            }
            Event::OrderCancelled(order_id) => {
                info!(order_id = %order_id, "event: order cancelled");
            }
            Event::CheckoutSessionCreated {
                user_id,
                session_id,
                total_minor_units,
            } => {
                info!(user_id = %user_id, session_id = %session_id, total = total_minor_units, "event: checkout session created");
            }
            Event::CouponIssued { user_id, code } => {
                info!(user_id = %user_id, code = %code, "event: coupon issued");
            }
            Event::CouponRedeemed { user_id, code } => {
                info!(user_id = %user_id, code = %code, "event: coupon redeemed");
            }
            Event::TransactionFlagged { user_id, reason } => {
                info!(user_id = %user_id, reason = %reason, "event: transaction flagged");
            }
        }
    }
}
