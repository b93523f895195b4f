use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::order::{self, Entity as OrderEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Parses a stored or client-supplied status string.
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        Self::from_str(raw)
            .map_err(|_| ServiceError::ValidationError(format!("Unknown order status: {raw}")))
    }

    /// Customers may only walk away before fulfilment starts.
    pub fn is_cancellable(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }
}

/// Order Lifecycle Manager. The operator path is an unconstrained overwrite
/// of the five-valued status; only the customer cancel path carries a
/// transition rule.
#[derive(Clone)]
pub struct OrderLifecycleService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderLifecycleService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Operator transition: sets any of the five statuses regardless of the
    /// current one. Unknown status strings are rejected before this point.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn set_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let found = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let old_status = found.status.clone();

        let mut active: order::ActiveModel = found.into();
        active.status = Set(new_status.to_string());
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&*self.db).await?;

        info!(from = %old_status, to = %new_status, "Order status overwritten");
        self.event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: new_status.to_string(),
            })
            .await;

        Ok(updated)
    }

    /// Customer cancellation: owner only, and only from Pending or
    /// Processing. A label change with no compensating action.
    #[instrument(skip(self), fields(order_id = %order_id, user_id = %acting_user))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        acting_user: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let found = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        if found.user_id != acting_user {
            warn!("Cancellation attempt by non-owner");
            return Err(ServiceError::Forbidden(
                "Not authorized to cancel this order".to_string(),
            ));
        }

        let current = OrderStatus::parse(&found.status)?;
        if !current.is_cancellable() {
            return Err(ServiceError::InvalidTransition(format!(
                "Cannot cancel order in status {current}"
            )));
        }

        let mut active: order::ActiveModel = found.into();
        active.status = Set(OrderStatus::Cancelled.to_string());
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&*self.db).await?;

        info!("Order cancelled by owner");
        self.event_sender.send(Event::OrderCancelled(order_id)).await;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use tokio::sync::mpsc;

    fn sender() -> EventSender {
        let (tx, _rx) = mpsc::channel(8);
        EventSender::new(tx)
    }

    fn order_with_status(user_id: Uuid, status: OrderStatus) -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            user_id,
            total_amount: dec!(100.00),
            checkout_session_id: "cs_test_1".to_string(),
            status: status.to_string(),
            shipping_address: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[rstest]
    #[case(OrderStatus::Pending, true)]
    #[case(OrderStatus::Processing, true)]
    #[case(OrderStatus::Shipped, false)]
    #[case(OrderStatus::Delivered, false)]
    #[case(OrderStatus::Cancelled, false)]
    fn cancellability_matrix(#[case] status: OrderStatus, #[case] expected: bool) {
        assert_eq!(status.is_cancellable(), expected);
    }

    #[test]
    fn unknown_status_strings_are_rejected() {
        assert!(OrderStatus::parse("Refunded").is_err());
        assert!(OrderStatus::parse("pending").is_err());
        assert_eq!(OrderStatus::parse("Shipped").unwrap(), OrderStatus::Shipped);
    }

    #[tokio::test]
    async fn owner_cannot_cancel_a_shipped_order() {
        let user_id = Uuid::new_v4();
        let found = order_with_status(user_id, OrderStatus::Shipped);
        let order_id = found.id;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![found]])
            .into_connection();

        let service = OrderLifecycleService::new(Arc::new(db), sender());
        let err = service.cancel(order_id, user_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn stranger_cannot_cancel_a_pending_order() {
        let owner = Uuid::new_v4();
        let found = order_with_status(owner, OrderStatus::Pending);
        let order_id = found.id;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![found]])
            .into_connection();

        let service = OrderLifecycleService::new(Arc::new(db), sender());
        let err = service.cancel(order_id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn owner_cancels_a_pending_order() {
        let owner = Uuid::new_v4();
        let found = order_with_status(owner, OrderStatus::Pending);
        let order_id = found.id;
        let mut cancelled = found.clone();
        cancelled.status = OrderStatus::Cancelled.to_string();
        cancelled.updated_at = Some(Utc::now());

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![found]])
            .append_query_results([vec![cancelled]])
            .into_connection();

        let service = OrderLifecycleService::new(Arc::new(db), sender());
        let updated = service.cancel(order_id, owner).await.expect("cancelled");
        assert_eq!(updated.status, "Cancelled");
    }

    #[tokio::test]
    async fn operator_overwrite_ignores_the_current_status() {
        let owner = Uuid::new_v4();
        // Delivered is terminal in practice, yet the operator path may still
        // rewrite it; the permissive machine is deliberate.
        let found = order_with_status(owner, OrderStatus::Delivered);
        let order_id = found.id;
        let mut reverted = found.clone();
        reverted.status = OrderStatus::Processing.to_string();
        reverted.updated_at = Some(Utc::now());

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![found]])
            .append_query_results([vec![reverted]])
            .into_connection();

        let service = OrderLifecycleService::new(Arc::new(db), sender());
        let updated = service
            .set_status(order_id, OrderStatus::Processing)
            .await
            .expect("overwritten");
        assert_eq!(updated.status, "Processing");
    }

    #[tokio::test]
    async fn missing_orders_are_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results::<order::Model, _, _>([vec![]])
            .into_connection();

        let service = OrderLifecycleService::new(Arc::new(db), sender());
        let err = service
            .set_status(Uuid::new_v4(), OrderStatus::Shipped)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
