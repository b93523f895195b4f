use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{fraud_log, order},
    errors::ServiceError,
    events::{Event, EventSender},
    reasoning::{strip_code_fences, ReasoningService},
    services::checkout::CartLine,
};

const REPORT_PAGE_SIZE: u64 = 100;

/// Verdict shape the reasoning service is instructed to return.
#[derive(Debug, Deserialize)]
struct FraudVerdict {
    is_fraud: bool,
    #[serde(default)]
    reason: String,
}

/// Advisory fraud heuristic. Runs inline during session creation, writes an
/// audit row when a transaction is flagged, and never changes the outcome of
/// checkout: every failure inside the gate is logged and swallowed.
#[derive(Clone)]
pub struct FraudGate {
    db: Arc<DatabaseConnection>,
    reasoning: Arc<dyn ReasoningService>,
    event_sender: EventSender,
}

impl FraudGate {
    pub fn new(
        db: Arc<DatabaseConnection>,
        reasoning: Arc<dyn ReasoningService>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            reasoning,
            event_sender,
        }
    }

    /// Fail-open entry point: infallible by contract.
    #[instrument(skip(self, cart), fields(user_id = %user_id, total = total_minor_units))]
    pub async fn screen(&self, user_id: Uuid, cart: &[CartLine], total_minor_units: i64) {
        if let Err(e) = self.try_screen(user_id, cart, total_minor_units).await {
            warn!("Fraud screening skipped: {}", e);
        }
    }

    async fn try_screen(
        &self,
        user_id: Uuid,
        cart: &[CartLine],
        total_minor_units: i64,
    ) -> Result<(), ServiceError> {
        let order_count = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .count(&*self.db)
            .await?;

        // Device fingerprinting is not wired up; every request reports a
        // known device so the loyal-user rule stays exercisable.
        let is_new_device = false;

        let amount_major = Decimal::new(total_minor_units, 2);
        let prompt = build_prompt(order_count, is_new_device, amount_major);

        let text = self.reasoning.generate(&prompt).await?;
        let verdict: FraudVerdict = serde_json::from_str(&strip_code_fences(&text))?;

        if !verdict.is_fraud {
            return Ok(());
        }

        let reason = if verdict.reason.is_empty() {
            "Model flagged high risk".to_string()
        } else {
            verdict.reason
        };

        let details = json!({
            "products": cart
                .iter()
                .map(|line| json!({
                    "id": line.product_id,
                    "name": line.name,
                    "price": line.price,
                    "quantity": line.quantity,
                }))
                .collect::<Vec<_>>(),
            "ai_context": {
                "order_count": order_count,
                "is_new_device": is_new_device,
            },
        });

        let log = fraud_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            transaction_amount: Set(amount_major),
            reason: Set(reason.clone()),
            details: Set(Some(details.to_string())),
            created_at: Set(Utc::now()),
        };
        log.insert(&*self.db).await?;

        info!(reason = %reason, "Transaction flagged as potential fraud");
        self.event_sender
            .send(Event::TransactionFlagged { user_id, reason })
            .await;

        Ok(())
    }

    /// Operator-facing report: the only reader of the audit trail.
    pub async fn recent_logs(&self) -> Result<Vec<fraud_log::Model>, ServiceError> {
        let rows = fraud_log::Entity::find()
            .order_by_desc(fraud_log::Column::CreatedAt)
            .limit(REPORT_PAGE_SIZE)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }
}

fn build_prompt(order_count: u64, is_new_device: bool, amount_major: Decimal) -> String {
    format!(
        "Analyze this transaction for potential fraud.\n\
         User Order Count: {order_count}\n\
         Is New Device: {}\n\
         Transaction Amount: ${amount_major}\n\
         \n\
         Fraud Rules:\n\
         - High amount (>$1000) with new device is suspicious.\n\
         - Very high amount (>$5000) is always suspicious.\n\
         - Low order count (0-5) with high amount is suspicious.\n\
         - Otherwise likely safe.\n\
         \n\
         Return ONLY a JSON object: {{ \"is_fraud\": boolean, \"reason\": \"short explanation\" }}\n\
         Do not use markdown.",
        if is_new_device { "Yes" } else { "No" }
    )
}
