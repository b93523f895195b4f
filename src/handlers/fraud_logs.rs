use axum::{extract::State, response::Json, routing::get, Router};

use crate::{auth::AuthUser, entities::fraud_log, errors::ServiceError, ApiResponse, AppState};

/// Recent fraud audit rows (operator only). The sole reader of the table.
#[utoipa::path(
    get,
    path = "/api/v1/fraud-logs",
    responses(
        (status = 200, description = "Fraud logs retrieved", body = ApiResponse<Vec<fraud_log::Model>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    tag = "FraudLogs"
)]
pub async fn list_fraud_logs(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<fraud_log::Model>>>, ServiceError> {
    auth_user.require_admin()?;
    let logs = state.services.fraud.recent_logs().await?;
    Ok(Json(ApiResponse::success(logs)))
}

pub fn fraud_logs_routes() -> Router<AppState> {
    Router::new().route("/", get(list_fraud_logs))
}
