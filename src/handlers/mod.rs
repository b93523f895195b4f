use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    cache::CacheClient,
    events::EventSender,
    gateway::PaymentGateway,
    reasoning::ReasoningService,
    services::{
        checkout::CheckoutService, coupons::CouponService, fraud::FraudGate,
        order_status::OrderLifecycleService, orders::OrderService, products::ProductService,
    },
};

pub mod checkout;
pub mod coupons;
pub mod fraud_logs;
pub mod orders;
pub mod products;

/// Aggregated services handed to HTTP handlers through `AppState`.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub lifecycle: Arc<OrderLifecycleService>,
    pub coupons: Arc<CouponService>,
    pub products: Arc<ProductService>,
    pub fraud: Arc<FraudGate>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        redis: Arc<redis::Client>,
        gateway: Arc<dyn PaymentGateway>,
        reasoning: Arc<dyn ReasoningService>,
        client_url: String,
    ) -> Self {
        let cache = CacheClient::new(redis);
        let coupons = CouponService::new(db.clone(), event_sender.clone());
        let fraud = FraudGate::new(db.clone(), reasoning, event_sender.clone());

        let checkout = CheckoutService::new(
            gateway.clone(),
            coupons.clone(),
            fraud.clone(),
            event_sender.clone(),
            client_url,
        );
        let orders = OrderService::new(
            db.clone(),
            gateway,
            coupons.clone(),
            event_sender.clone(),
        );
        let lifecycle = OrderLifecycleService::new(db.clone(), event_sender);
        let products = ProductService::new(db, cache);

        Self {
            checkout: Arc::new(checkout),
            orders: Arc::new(orders),
            lifecycle: Arc::new(lifecycle),
            coupons: Arc::new(coupons),
            products: Arc::new(products),
            fraud: Arc::new(fraud),
        }
    }
}
