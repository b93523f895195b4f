//! Shared harness for integration tests: a full router over a mocked
//! database with fake gateway/reasoning seams.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use secureshop_api as api;

use secureshop_api::errors::ServiceError;
use secureshop_api::gateway::{CreateSessionRequest, GatewaySession, PaymentGateway, SessionState};
use secureshop_api::reasoning::ReasoningService;

/// Gateway stub: hands out a fixed session id and replays a canned session
/// state on retrieval.
pub struct FakeGateway {
    pub session: Option<SessionState>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_session(
        &self,
        _request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        Ok(GatewaySession {
            id: "cs_test_integration".to_string(),
        })
    }

    async fn retrieve_session(&self, _session_id: &str) -> Result<SessionState, ServiceError> {
        self.session
            .clone()
            .ok_or_else(|| ServiceError::ExternalServiceError("unknown session".to_string()))
    }

    async fn create_percentage_coupon(&self, _percent_off: i32) -> Result<String, ServiceError> {
        Ok("gw_coupon_test".to_string())
    }
}

/// Reasoning stub that is always down; checkout must not care.
pub struct UnreachableReasoning;

#[async_trait]
impl ReasoningService for UnreachableReasoning {
    async fn generate(&self, _prompt: &str) -> Result<String, ServiceError> {
        Err(ServiceError::ExternalServiceError(
            "connection refused".to_string(),
        ))
    }
}

fn test_config() -> api::config::AppConfig {
    api::config::AppConfig {
        database_url: "sqlite::memory:".to_string(),
        redis_url: "redis://127.0.0.1:63992".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        auto_migrate: false,
        cors_allowed_origins: None,
        client_url: "http://localhost:5173".to_string(),
        payment_api_base: "https://api.stripe.test".to_string(),
        payment_secret_key: "sk_test_integration".to_string(),
        payment_timeout_secs: 5,
        reasoning_api_base: "https://reasoning.test".to_string(),
        reasoning_api_key: String::new(),
        reasoning_model: "test-model".to_string(),
        reasoning_timeout_secs: 5,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 1,
        db_acquire_timeout_secs: 1,
    }
}

/// Builds the v1 router over the given mocked connection and gateway stub.
pub fn build_app(db: DatabaseConnection, gateway: FakeGateway) -> Router {
    let db = Arc::new(db);
    // No redis listens here; every cache path degrades to a miss.
    let redis = Arc::new(redis::Client::open("redis://127.0.0.1:63992/").expect("redis url"));

    let (event_tx, _event_rx) = mpsc::channel(64);
    let event_sender = api::events::EventSender::new(event_tx);

    let services = api::handlers::AppServices::new(
        db.clone(),
        event_sender.clone(),
        redis.clone(),
        Arc::new(gateway),
        Arc::new(UnreachableReasoning),
        "http://localhost:5173".to_string(),
    );

    let state = api::AppState {
        db,
        config: test_config(),
        event_sender,
        services,
        redis,
    };

    Router::new()
        .nest("/api/v1", api::api_v1_routes())
        .with_state(state)
}

/// Fires one request at the app, optionally authenticated via the identity
/// headers the upstream session layer would set.
pub async fn send_request(
    app: Router,
    method: Method,
    uri: &str,
    identity: Option<(Uuid, &str)>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some((user_id, role)) = identity {
        builder = builder
            .header("x-user-id", user_id.to_string())
            .header("x-user-role", role);
    }

    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    app.oneshot(request).await.expect("response")
}

pub async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
