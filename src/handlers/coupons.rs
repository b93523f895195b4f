use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{auth::AuthUser, entities::coupon, errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateCouponRequest {
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidatedCoupon {
    pub message: String,
    pub code: String,
    pub discount_percentage: i32,
}

/// The caller's coupon, if any
#[utoipa::path(
    get,
    path = "/api/v1/coupons",
    responses(
        (status = 200, description = "Coupon (or null)", body = ApiResponse<Option<coupon::Model>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    tag = "Coupons"
)]
pub async fn my_coupon(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Option<coupon::Model>>>, ServiceError> {
    let coupon = state.services.coupons.for_user(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(coupon)))
}

/// Validate a coupon code against the caller's ledger entry
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Coupon is valid", body = ApiResponse<ValidatedCoupon>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found or expired", body = crate::errors::ErrorResponse),
    ),
    tag = "Coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<ValidateCouponRequest>,
) -> Result<Json<ApiResponse<ValidatedCoupon>>, ServiceError> {
    let coupon = state
        .services
        .coupons
        .find_active(auth_user.user_id, &request.code)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Coupon not found".to_string()))?;

    // The stored expiry is only enforced here, at read time.
    if coupon.expiration_date < Utc::now() {
        state
            .services
            .coupons
            .deactivate(auth_user.user_id, &coupon.code)
            .await?;
        return Err(ServiceError::NotFound("Coupon expired".to_string()));
    }

    Ok(Json(ApiResponse::success(ValidatedCoupon {
        message: "Coupon is valid".to_string(),
        code: coupon.code,
        discount_percentage: coupon.discount_percentage,
    })))
}

pub fn coupons_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(my_coupon))
        .route("/validate", post(validate_coupon))
}
