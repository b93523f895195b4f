use axum::{extract::State, response::Json, routing::post, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::checkout::{Address, CartLine, CheckoutQuote},
    services::orders::ConfirmationOutcome,
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCheckoutSessionRequest {
    /// Cart lines as asserted by the client.
    #[serde(default)]
    pub products: Vec<CartLine>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    pub shipping_address: Address,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmCheckoutRequest {
    pub session_id: String,
}

/// Explicit confirmation outcome. All three cases are HTTP 200.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmationView {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    pub message: String,
}

/// Create a hosted checkout session for the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/checkout/session",
    request_body = CreateCheckoutSessionRequest,
    responses(
        (status = 200, description = "Session created", body = ApiResponse<CheckoutQuote>),
        (status = 400, description = "Invalid or empty cart", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway failure", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn create_session(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateCheckoutSessionRequest>,
) -> Result<Json<ApiResponse<CheckoutQuote>>, ServiceError> {
    let quote = state
        .services
        .checkout
        .create_session(
            auth_user.user_id,
            request.products,
            request.coupon_code,
            request.shipping_address,
        )
        .await?;

    Ok(Json(ApiResponse::success(quote)))
}

/// Confirm a paid session and materialize its order
#[utoipa::path(
    post,
    path = "/api/v1/checkout/success",
    request_body = ConfirmCheckoutRequest,
    responses(
        (status = 200, description = "Confirmation processed", body = ApiResponse<ConfirmationView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 500, description = "Order persistence failed", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway failure", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn confirm_checkout(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Json(request): Json<ConfirmCheckoutRequest>,
) -> Result<Json<ApiResponse<ConfirmationView>>, ServiceError> {
    let outcome = state
        .services
        .orders
        .confirm_checkout(&request.session_id)
        .await?;

    let view = match outcome {
        ConfirmationOutcome::Created(order) => ConfirmationView {
            outcome: "created".to_string(),
            order_id: Some(order.id),
            message: "Payment successful, order created, and coupon deactivated if used."
                .to_string(),
        },
        ConfirmationOutcome::AlreadyRecorded => ConfirmationView {
            outcome: "already_recorded".to_string(),
            order_id: None,
            message: "An order for this session has already been recorded.".to_string(),
        },
        ConfirmationOutcome::AwaitingPayment => ConfirmationView {
            outcome: "awaiting_payment".to_string(),
            order_id: None,
            message: "The payment session has not been completed.".to_string(),
        },
    };

    Ok(Json(ApiResponse::success(view)))
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/session", post(create_session))
        .route("/success", post(confirm_checkout))
}
