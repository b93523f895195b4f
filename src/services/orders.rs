use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{order, order_item, product, user},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{PaymentGateway, PaymentStatus},
    services::checkout::Address,
    services::coupons::CouponService,
    services::metadata::SessionMetadata,
    services::order_status::OrderStatus,
};

/// Result of confirming one gateway session. All three cases return
/// successfully to the caller; only `Created` carries a new order.
#[derive(Debug)]
pub enum ConfirmationOutcome {
    Created(order::Model),
    /// An order for this session already exists; nothing was written.
    AlreadyRecorded,
    /// The gateway has not reported the session as paid; nothing was written.
    AwaitingPayment,
}

/// One frozen line joined with its product for read endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemView {
    pub product_id: Uuid,
    pub name: Option<String>,
    pub image: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OwnerSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub status: String,
    pub total_amount: Decimal,
    pub shipping_address: Option<Address>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerSummary>,
}

/// Order Materializer and read side. Turns a paid gateway session's
/// metadata snapshot into exactly one persisted order.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    coupons: CouponService,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        coupons: CouponService,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            gateway,
            coupons,
            event_sender,
        }
    }

    /// Idempotent confirmation handler for one external session identifier.
    ///
    /// The UNIQUE index on `orders.checkout_session_id` is the arbiter for
    /// concurrent confirmations; the pre-insert lookup is only a fast path.
    /// A coupon deactivated here is not rolled back if the insert later
    /// fails: deactivating twice is harmless, and retrying the confirmation
    /// re-runs the no-op deactivate before the insert.
    #[instrument(skip(self))]
    pub async fn confirm_checkout(
        &self,
        session_id: &str,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        let session = self.gateway.retrieve_session(session_id).await?;

        if session.payment_status != PaymentStatus::Paid {
            info!("Session not paid yet; nothing to materialize");
            return Ok(ConfirmationOutcome::AwaitingPayment);
        }

        let meta = SessionMetadata::from_map(&session.metadata)?;

        if let Some(existing) = order::Entity::find()
            .filter(order::Column::CheckoutSessionId.eq(session_id))
            .one(&*self.db)
            .await?
        {
            info!(order_id = %existing.id, "Session already materialized");
            return Ok(ConfirmationOutcome::AlreadyRecorded);
        }

        if !meta.coupon_code.is_empty() {
            self.coupons
                .deactivate(meta.user_id, &meta.coupon_code)
                .await?;
        }

        // The gateway-confirmed amount is authoritative; line items are a
        // frozen snapshot, never summed back into the total.
        let total_amount = Decimal::new(session.amount_total, 2);

        let txn = self.db.begin().await?;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let active = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(meta.user_id),
            total_amount: Set(total_amount),
            checkout_session_id: Set(session_id.to_string()),
            status: Set(OrderStatus::Pending.to_string()),
            shipping_address: Set(Some(serde_json::to_string(&meta.shipping_address)?)),
            created_at: Set(now),
            updated_at: Set(None),
        };

        let created = match active.insert(&txn).await {
            Ok(model) => model,
            Err(e) => {
                if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    // Lost the race to a concurrent confirmation.
                    warn!("Duplicate confirmation for session; treating as already recorded");
                    txn.rollback().await.ok();
                    return Ok(ConfirmationOutcome::AlreadyRecorded);
                }
                error!("Failed to persist order: {}", e);
                return Err(ServiceError::OrderCreation(e.to_string()));
            }
        };

        for line in &meta.lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.id),
                quantity: Set(line.quantity),
                unit_price: Set(line.price),
            };
            item.insert(&txn).await.map_err(|e| {
                error!("Failed to persist order line: {}", e);
                ServiceError::OrderCreation(e.to_string())
            })?;
        }

        txn.commit()
            .await
            .map_err(|e| ServiceError::OrderCreation(e.to_string()))?;

        info!(order_id = %order_id, total = %total_amount, "Order created from paid session");
        self.event_sender.send(Event::OrderCreated(order_id)).await;

        Ok(ConfirmationOutcome::Created(created))
    }

    /// Operator listing: every order, newest first, with owner and product
    /// details joined in.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<OrderView>, ServiceError> {
        let rows = order::Entity::find()
            .find_also_related(user::Entity)
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut views = Vec::with_capacity(rows.len());
        for (order, owner) in rows {
            let items = self.items_for(order.id).await?;
            views.push(to_view(
                order,
                items,
                owner.map(|u| OwnerSummary {
                    id: u.id,
                    name: u.name,
                    email: u.email,
                }),
            ));
        }
        Ok(views)
    }

    /// Owner-scoped listing, newest first, with product details joined in.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OrderView>, ServiceError> {
        let rows = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut views = Vec::with_capacity(rows.len());
        for order in rows {
            let items = self.items_for(order.id).await?;
            views.push(to_view(order, items, None));
        }
        Ok(views)
    }

    async fn items_for(&self, order_id: Uuid) -> Result<Vec<OrderItemView>, ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .find_also_related(product::Entity)
            .all(&*self.db)
            .await?;

        Ok(items
            .into_iter()
            .map(|(item, product)| OrderItemView {
                product_id: item.product_id,
                name: product.as_ref().map(|p| p.name.clone()),
                image: product.map(|p| p.image),
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect())
    }
}

fn to_view(
    order: order::Model,
    items: Vec<OrderItemView>,
    owner: Option<OwnerSummary>,
) -> OrderView {
    let shipping_address = order
        .shipping_address
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok());

    OrderView {
        id: order.id,
        status: order.status,
        total_amount: order.total_amount,
        shipping_address,
        created_at: order.created_at,
        items,
        owner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MockPaymentGateway, SessionState};
    use rust_decimal_macros::dec;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn sender() -> EventSender {
        let (tx, _rx) = mpsc::channel(8);
        EventSender::new(tx)
    }

    fn address() -> Address {
        Address {
            street: "12 Harbor Way".to_string(),
            city: "Portsmouth".to_string(),
            state: "NH".to_string(),
            postal_code: "03801".to_string(),
            country: "US".to_string(),
            village: None,
            phone: None,
        }
    }

    fn paid_session(session_id: &str, amount_total: i64, coupon_code: &str) -> SessionState {
        let meta = SessionMetadata {
            user_id: Uuid::new_v4(),
            coupon_code: coupon_code.to_string(),
            lines: vec![crate::services::metadata::SessionLine {
                id: Uuid::new_v4(),
                quantity: 2,
                price: dec!(50.00),
            }],
            shipping_address: address(),
        };
        SessionState {
            id: session_id.to_string(),
            payment_status: PaymentStatus::Paid,
            amount_total,
            metadata: meta.to_map().expect("metadata"),
        }
    }

    fn persisted_order(session_id: &str, total: Decimal) -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            total_amount: total,
            checkout_session_id: session_id.to_string(),
            status: "Pending".to_string(),
            shipping_address: Some(serde_json::to_string(&address()).unwrap()),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn service(db: DatabaseConnection, gateway: MockPaymentGateway) -> OrderService {
        let db = Arc::new(db);
        let coupons = CouponService::new(db.clone(), sender());
        OrderService::new(db, Arc::new(gateway), coupons, sender())
    }

    #[tokio::test]
    async fn unpaid_sessions_are_a_silent_no_op() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_retrieve_session().returning(|id| {
            Ok(SessionState {
                id: id.to_string(),
                payment_status: PaymentStatus::Unpaid,
                amount_total: 0,
                metadata: HashMap::new(),
            })
        });

        // No DB interaction is prepared: an unpaid session must not touch it.
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let service = service(db, gateway);

        let outcome = service.confirm_checkout("cs_unpaid").await.expect("no-op");
        assert!(matches!(outcome, ConfirmationOutcome::AwaitingPayment));
    }

    #[tokio::test]
    async fn paid_session_materializes_one_pending_order() {
        let session = paid_session("cs_paid_1", 10_000, "");
        let item_model = order_item::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id: session_line_product(&session),
            quantity: 2,
            unit_price: dec!(50.00),
        };

        let mut gateway = MockPaymentGateway::new();
        let returned = session.clone();
        gateway
            .expect_retrieve_session()
            .returning(move |_| Ok(returned.clone()));

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // fast-path lookup: no existing order
            .append_query_results::<order::Model, _, _>([vec![]])
            // order insert returning
            .append_query_results([vec![persisted_order("cs_paid_1", dec!(100.00))]])
            // item insert returning
            .append_query_results([vec![item_model]])
            .into_connection();

        let service = service(db, gateway);
        let outcome = service.confirm_checkout("cs_paid_1").await.expect("created");

        match outcome {
            ConfirmationOutcome::Created(order) => {
                // The stored total is the gateway-confirmed amount.
                assert_eq!(order.total_amount, dec!(100.00));
                assert_eq!(order.status, "Pending");
                assert_eq!(order.checkout_session_id, "cs_paid_1");
            }
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_confirmation_is_a_no_op() {
        let session = paid_session("cs_paid_2", 10_000, "");

        let mut gateway = MockPaymentGateway::new();
        let returned = session.clone();
        gateway
            .expect_retrieve_session()
            .returning(move |_| Ok(returned.clone()));

        // Fast-path lookup finds the order from the first confirmation; no
        // insert statements are prepared, so reaching one would fail.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![persisted_order("cs_paid_2", dec!(100.00))]])
            .into_connection();

        let service = service(db, gateway);
        let outcome = service.confirm_checkout("cs_paid_2").await.expect("no-op");
        assert!(matches!(outcome, ConfirmationOutcome::AlreadyRecorded));
    }

    #[tokio::test]
    async fn redeemed_coupon_is_deactivated_before_the_order_is_written() {
        let session = paid_session("cs_paid_3", 9_000, "GIFTAB12CD");
        let user_id = SessionMetadata::from_map(&session.metadata)
            .unwrap()
            .user_id;

        let coupon_row = crate::entities::coupon::Model {
            id: Uuid::new_v4(),
            code: "GIFTAB12CD".to_string(),
            discount_percentage: 10,
            user_id,
            is_active: true,
            expiration_date: Utc::now() + chrono::Duration::days(30),
            created_at: Utc::now(),
            updated_at: None,
        };
        let mut deactivated = coupon_row.clone();
        deactivated.is_active = false;

        let item_model = order_item::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id: session_line_product(&session),
            quantity: 2,
            unit_price: dec!(50.00),
        };

        let mut gateway = MockPaymentGateway::new();
        let returned = session.clone();
        gateway
            .expect_retrieve_session()
            .returning(move |_| Ok(returned.clone()));

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // fast-path lookup: no existing order
            .append_query_results::<order::Model, _, _>([vec![]])
            // coupon lookup for deactivation
            .append_query_results([vec![coupon_row]])
            // coupon update returning
            .append_query_results([vec![deactivated]])
            // order insert returning
            .append_query_results([vec![persisted_order("cs_paid_3", dec!(90.00))]])
            // item insert returning
            .append_query_results([vec![item_model]])
            .into_connection();

        let service = service(db, gateway);
        let outcome = service
            .confirm_checkout("cs_paid_3")
            .await
            .expect("created");
        assert!(matches!(outcome, ConfirmationOutcome::Created(_)));
    }

    fn session_line_product(session: &SessionState) -> Uuid {
        SessionMetadata::from_map(&session.metadata).unwrap().lines[0].id
    }
}
