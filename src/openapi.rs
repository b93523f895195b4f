use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "SecureShop API",
        description = "Storefront backend: checkout sessions, order lifecycle, coupon ledger, product catalog, and the operator fraud-log report."
    ),
    paths(
        crate::handlers::checkout::create_session,
        crate::handlers::checkout::confirm_checkout,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::my_orders,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::cancel_order,
        crate::handlers::coupons::my_coupon,
        crate::handlers::coupons::validate_coupon,
        crate::handlers::products::list_products,
        crate::handlers::products::featured_products,
        crate::handlers::products::products_by_category,
        crate::handlers::products::create_product,
        crate::handlers::products::toggle_featured,
        crate::handlers::fraud_logs::list_fraud_logs,
    ),
    tags(
        (name = "Checkout", description = "Session creation and payment confirmation"),
        (name = "Orders", description = "Order listings and lifecycle transitions"),
        (name = "Coupons", description = "Loyalty coupon ledger"),
        (name = "Products", description = "Catalog reads and featured snapshot"),
        (name = "FraudLogs", description = "Operator-facing fraud audit report"),
    )
)]
pub struct ApiDoc;
