use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{CreateSessionRequest, GatewayLineItem, PaymentGateway},
    services::coupons::CouponService,
    services::fraud::FraudGate,
    services::metadata::{SessionLine, SessionMetadata},
};

/// Post-discount minor-unit total at which a loyalty coupon is issued.
pub const REWARD_THRESHOLD_MINOR_UNITS: i64 = 20_000;

/// One client-supplied cart line. Unit price is asserted by the client and
/// trusted as-is; the gateway-confirmed total is what the order records.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    pub price: Decimal,
    pub quantity: i32,
}

/// Free-form shipping address captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub village: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// What the caller gets back: an opaque gateway session handle plus the
/// charged total in major units.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutQuote {
    pub session_id: String,
    pub total_amount: Decimal,
}

/// Checkout Session Builder: prices a cart in integer minor units, applies
/// at most one owner-matching coupon, runs the advisory fraud gate, issues
/// the optimistic reward coupon, and opens a hosted gateway session carrying
/// the reconstruction snapshot.
#[derive(Clone)]
pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    coupons: CouponService,
    fraud: FraudGate,
    event_sender: EventSender,
    client_url: String,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        coupons: CouponService,
        fraud: FraudGate,
        event_sender: EventSender,
        client_url: String,
    ) -> Self {
        Self {
            gateway,
            coupons,
            fraud,
            event_sender,
            client_url,
        }
    }

    #[instrument(skip(self, cart, shipping_address), fields(user_id = %user_id, lines = cart.len()))]
    pub async fn create_session(
        &self,
        user_id: Uuid,
        cart: Vec<CartLine>,
        coupon_code: Option<String>,
        shipping_address: Address,
    ) -> Result<CheckoutQuote, ServiceError> {
        let (line_items, mut total) = price_cart(&cart)?;

        let requested_code = coupon_code.unwrap_or_default();
        let coupon = if requested_code.is_empty() {
            None
        } else {
            self.coupons.find_active(user_id, &requested_code).await?
        };

        if let Some(coupon) = &coupon {
            total -= percentage_of(total, coupon.discount_percentage);
        }

        // Advisory only; nothing below depends on its outcome.
        self.fraud.screen(user_id, &cart, total).await;

        // Optimistic issuance: the reward exists even if this session is
        // abandoned, and a gateway failure below does not roll it back.
        if total >= REWARD_THRESHOLD_MINOR_UNITS {
            self.coupons.issue_reward(user_id).await?;
        }

        let discount_coupon_id = match &coupon {
            Some(coupon) => Some(
                self.gateway
                    .create_percentage_coupon(coupon.discount_percentage)
                    .await?,
            ),
            None => None,
        };

        let metadata = SessionMetadata {
            user_id,
            coupon_code: requested_code,
            lines: cart
                .iter()
                .map(|line| SessionLine {
                    id: line.product_id,
                    quantity: line.quantity,
                    price: line.price,
                })
                .collect(),
            shipping_address,
        }
        .to_map()?;

        let session = self
            .gateway
            .create_session(CreateSessionRequest {
                line_items,
                success_url: format!(
                    "{}/purchase-success?session_id={{CHECKOUT_SESSION_ID}}",
                    self.client_url
                ),
                cancel_url: format!("{}/purchase-cancel", self.client_url),
                discount_coupon_id,
                metadata,
            })
            .await?;

        info!(session_id = %session.id, total_minor_units = total, "Checkout session created");
        self.event_sender
            .send(Event::CheckoutSessionCreated {
                user_id,
                session_id: session.id.clone(),
                total_minor_units: total,
            })
            .await;

        Ok(CheckoutQuote {
            session_id: session.id,
            total_amount: minor_to_major(total),
        })
    }
}

/// Prices every line in integer minor units and sums the cart.
fn price_cart(cart: &[CartLine]) -> Result<(Vec<GatewayLineItem>, i64), ServiceError> {
    if cart.is_empty() {
        return Err(ServiceError::InvalidCart(
            "cart must contain at least one line".to_string(),
        ));
    }

    let mut total: i64 = 0;
    let mut items = Vec::with_capacity(cart.len());

    for line in cart {
        if line.quantity < 1 {
            return Err(ServiceError::InvalidCart(format!(
                "quantity for {} must be at least 1",
                line.name
            )));
        }
        if line.price < Decimal::ZERO {
            return Err(ServiceError::InvalidCart(format!(
                "price for {} must not be negative",
                line.name
            )));
        }

        let unit_amount = to_minor_units(line.price)?;
        total += unit_amount * i64::from(line.quantity);

        items.push(GatewayLineItem {
            name: line.name.clone(),
            image: line.image.clone(),
            unit_amount,
            quantity: i64::from(line.quantity),
        });
    }

    Ok((items, total))
}

/// `round(price * 100)`, half away from zero.
fn to_minor_units(price: Decimal) -> Result<i64, ServiceError> {
    (price * dec!(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError("price out of range".to_string()))
}

/// `round(total * pct / 100)` in minor units, half away from zero.
fn percentage_of(total: i64, pct: i32) -> i64 {
    (Decimal::from(total) * Decimal::from(pct) / dec!(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

fn minor_to_major(total: i64) -> Decimal {
    Decimal::new(total, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::coupon;
    use crate::gateway::{GatewaySession, MockPaymentGateway};
    use crate::reasoning::MockReasoningService;
    use chrono::{Duration, Utc};
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult};
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

    fn line(price: Decimal, quantity: i32) -> CartLine {
        CartLine {
            product_id: Uuid::new_v4(),
            name: "Desk Lamp".to_string(),
            image: None,
            price,
            quantity,
        }
    }

    fn failing_reasoning() -> Arc<MockReasoningService> {
        let mut reasoning = MockReasoningService::new();
        reasoning.expect_generate().returning(|_| {
            Err(ServiceError::ExternalServiceError(
                "connection refused".to_string(),
            ))
        });
        Arc::new(reasoning)
    }

    fn service(db: DatabaseConnection, gateway: MockPaymentGateway) -> CheckoutService {
        let db = Arc::new(db);
        let coupons = CouponService::new(db.clone(), sender());
        let fraud = FraudGate::new(db, failing_reasoning(), sender());
        CheckoutService::new(
            Arc::new(gateway),
            coupons,
            fraud,
            sender(),
            "https://shop.example".to_string(),
        )
    }

    #[test]
    fn totals_are_exact_sums_of_minor_units() {
        let cart = vec![line(dec!(50.00), 2), line(dec!(19.99), 3)];
        let (items, total) = price_cart(&cart).expect("priced");

        assert_eq!(items[0].unit_amount, 5000);
        assert_eq!(items[1].unit_amount, 1999);
        assert_eq!(total, 5000 * 2 + 1999 * 3);
    }

    #[test]
    fn fractional_minor_units_round_half_away_from_zero() {
        assert_eq!(to_minor_units(dec!(10.005)).unwrap(), 1001);
        assert_eq!(to_minor_units(dec!(10.004)).unwrap(), 1000);
    }

    #[test]
    fn ten_percent_off_ten_thousand_is_nine_thousand() {
        let total = 10_000 - percentage_of(10_000, 10);
        assert_eq!(total, 9_000);
    }

    #[test]
    fn odd_totals_round_the_discount_once() {
        // 15% of 999 is 149.85, rounded to 150; applied to the sum, not per line.
        assert_eq!(percentage_of(999, 15), 150);
    }

    #[test]
    fn empty_carts_are_rejected() {
        let err = price_cart(&[]).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCart(_)));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let err = price_cart(&[line(dec!(5.00), 0)]).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCart(_)));
    }

    #[tokio::test]
    async fn session_is_created_without_a_coupon() {
        // Only the fraud gate touches the DB here, and its count query is
        // allowed to fail (no prepared results): fail-open.
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_percentage_coupon().never();
        gateway.expect_create_session().returning(|request| {
            assert_eq!(request.line_items.len(), 1);
            assert_eq!(request.line_items[0].unit_amount, 5000);
            assert!(request.discount_coupon_id.is_none());
            assert_eq!(request.metadata.get("coupon_code").unwrap(), "");
            Ok(GatewaySession {
                id: "cs_test_123".to_string(),
            })
        });

        let service = service(db, gateway);
        let quote = service
            .create_session(Uuid::new_v4(), vec![line(dec!(50.00), 2)], None, address())
            .await
            .expect("session");

        assert_eq!(quote.session_id, "cs_test_123");
        assert_eq!(quote.total_amount, dec!(100.00));
    }

    #[tokio::test]
    async fn active_coupon_discounts_the_summed_total() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let coupon = coupon::Model {
            id: Uuid::new_v4(),
            code: "GIFTAB12CD".to_string(),
            discount_percentage: 10,
            user_id,
            is_active: true,
            expiration_date: now + Duration::days(30),
            created_at: now,
            updated_at: None,
        };

        // First query: the coupon lookup. The fraud gate's count query then
        // finds no prepared result and fails open.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![coupon]])
            .into_connection();

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_percentage_coupon()
            .withf(|pct| *pct == 10)
            .returning(|_| Ok("gw_coupon_1".to_string()));
        gateway.expect_create_session().returning(|request| {
            assert_eq!(
                request.discount_coupon_id.as_deref(),
                Some("gw_coupon_1")
            );
            assert_eq!(
                request.metadata.get("coupon_code").unwrap(),
                "GIFTAB12CD"
            );
            Ok(GatewaySession {
                id: "cs_test_456".to_string(),
            })
        });

        let service = service(db, gateway);
        let quote = service
            .create_session(
                user_id,
                vec![line(dec!(50.00), 2)],
                Some("GIFTAB12CD".to_string()),
                address(),
            )
            .await
            .expect("session");

        // 10000 minor units at 10% off -> 9000 -> 90.00 major.
        assert_eq!(quote.total_amount, dec!(90.00));
    }

    #[tokio::test]
    async fn unknown_coupon_code_is_silently_ignored() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results::<coupon::Model, _, _>([vec![]])
            .into_connection();

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_percentage_coupon().never();
        gateway.expect_create_session().returning(|request| {
            assert!(request.discount_coupon_id.is_none());
            // The requested code is still recorded on the session snapshot.
            assert_eq!(request.metadata.get("coupon_code").unwrap(), "NOPE");
            Ok(GatewaySession {
                id: "cs_test_789".to_string(),
            })
        });

        let service = service(db, gateway);
        let quote = service
            .create_session(
                Uuid::new_v4(),
                vec![line(dec!(50.00), 2)],
                Some("NOPE".to_string()),
                address(),
            )
            .await
            .expect("session");

        assert_eq!(quote.total_amount, dec!(100.00));
    }

    #[tokio::test]
    async fn large_totals_issue_the_reward_before_the_gateway_call() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let issued = coupon::Model {
            id: Uuid::new_v4(),
            code: "GIFTNEW123".to_string(),
            discount_percentage: 10,
            user_id,
            is_active: true,
            expiration_date: now + Duration::days(30),
            created_at: now,
            updated_at: None,
        };

        // Fraud count fails open (query error), then the reward replace runs:
        // delete (exec) + insert returning (query).
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([sea_orm::DbErr::Custom("count unavailable".to_string())])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .append_query_results([vec![issued]])
            .into_connection();

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_session().returning(|_| {
            Ok(GatewaySession {
                id: "cs_test_big".to_string(),
            })
        });

        let service = service(db, gateway);
        let quote = service
            .create_session(user_id, vec![line(dec!(100.00), 2)], None, address())
            .await
            .expect("session");

        // 20000 minor units meets the threshold exactly.
        assert_eq!(quote.total_amount, dec!(200.00));
    }

    #[tokio::test]
    async fn reasoning_failure_never_blocks_checkout() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_session().returning(|_| {
            Ok(GatewaySession {
                id: "cs_fail_open".to_string(),
            })
        });

        let service = service(db, gateway);
        let quote = service
            .create_session(Uuid::new_v4(), vec![line(dec!(60.00), 1)], None, address())
            .await
            .expect("session despite advisory failure");

        assert_eq!(quote.session_id, "cs_fail_open");
    }

    #[tokio::test]
    async fn gateway_failure_surfaces_as_checkout_session_error() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_session().returning(|_| {
            Err(ServiceError::CheckoutSession(
                "gateway returned 500".to_string(),
            ))
        });

        let service = service(db, gateway);
        let err = service
            .create_session(Uuid::new_v4(), vec![line(dec!(60.00), 1)], None, address())
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::CheckoutSession(_)));
    }
}
