use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, instrument};

use crate::errors::ServiceError;

/// One priced line as the gateway wants it: integer minor currency units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayLineItem {
    pub name: String,
    pub image: Option<String>,
    pub unit_amount: i64,
    pub quantity: i64,
}

/// Inputs for a hosted checkout session. `metadata` is an opaque bag the
/// caller uses to stash its own JSON snapshot for later reconstruction.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub line_items: Vec<GatewayLineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub discount_coupon_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct GatewaySession {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Paid,
    Unpaid,
}

/// Session state as reported by the gateway at confirmation time.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: String,
    pub payment_status: PaymentStatus,
    /// Confirmed total in minor units.
    pub amount_total: i64,
    pub metadata: HashMap<String, String>,
}

/// Seam to the external payment processor. Money crosses this boundary in
/// integer minor units only.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionState, ServiceError>;

    /// Registers a single-use percentage discount with the gateway and
    /// returns its opaque identifier.
    async fn create_percentage_coupon(&self, percent_off: i32) -> Result<String, ServiceError>;
}

/// Production gateway client speaking a Stripe-style form-encoded REST API.
pub struct HttpPaymentGateway {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    id: String,
    #[serde(default)]
    payment_status: String,
    #[serde(default)]
    amount_total: i64,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CouponPayload {
    id: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, secret_key: String, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url,
            secret_key,
        }
    }

    /// Flattens a session request into the gateway's bracketed form encoding.
    fn session_form(request: &CreateSessionRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            (
                "payment_method_types[0]".to_string(),
                "card".to_string(),
            ),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
        ];

        for (i, item) in request.line_items.iter().enumerate() {
            form.push((
                format!("line_items[{i}][price_data][currency]"),
                "usd".to_string(),
            ));
            form.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                item.name.clone(),
            ));
            if let Some(image) = &item.image {
                form.push((
                    format!("line_items[{i}][price_data][product_data][images][0]"),
                    image.clone(),
                ));
            }
            form.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                item.unit_amount.to_string(),
            ));
            form.push((format!("line_items[{i}][quantity]"), item.quantity.to_string()));
        }

        if let Some(coupon_id) = &request.discount_coupon_id {
            form.push(("discounts[0][coupon]".to_string(), coupon_id.clone()));
        }

        for (key, value) in &request.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        form
    }

    fn parse_status(raw: &str) -> PaymentStatus {
        if raw == "paid" {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Unpaid
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(lines = request.line_items.len()))]
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let form = Self::session_form(&request);

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!("Payment gateway unreachable: {}", e);
                ServiceError::CheckoutSession(format!("gateway request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "Payment gateway rejected session: {}", body);
            return Err(ServiceError::CheckoutSession(format!(
                "gateway returned {status}"
            )));
        }

        let payload: SessionPayload = response
            .json()
            .await
            .map_err(|e| ServiceError::CheckoutSession(format!("malformed gateway response: {e}")))?;

        Ok(GatewaySession { id: payload.id })
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<SessionState, ServiceError> {
        let response = self
            .http
            .get(format!(
                "{}/v1/checkout/sessions/{}",
                self.base_url, session_id
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                error!("Payment gateway unreachable: {}", e);
                ServiceError::ExternalServiceError(format!("gateway request failed: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway returned {}",
                response.status()
            )));
        }

        let payload: SessionPayload = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("malformed gateway response: {e}"))
        })?;

        Ok(SessionState {
            id: payload.id,
            payment_status: Self::parse_status(&payload.payment_status),
            amount_total: payload.amount_total,
            metadata: payload.metadata,
        })
    }

    #[instrument(skip(self))]
    async fn create_percentage_coupon(&self, percent_off: i32) -> Result<String, ServiceError> {
        let form = [
            ("percent_off", percent_off.to_string()),
            ("duration", "once".to_string()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/coupons", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| ServiceError::CheckoutSession(format!("gateway request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ServiceError::CheckoutSession(format!(
                "gateway returned {}",
                response.status()
            )));
        }

        let payload: CouponPayload = response
            .json()
            .await
            .map_err(|e| ServiceError::CheckoutSession(format!("malformed gateway response: {e}")))?;

        Ok(payload.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> CreateSessionRequest {
        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), "u-1".to_string());
        CreateSessionRequest {
            line_items: vec![GatewayLineItem {
                name: "Desk Lamp".to_string(),
                image: Some("https://img.example/lamp.png".to_string()),
                unit_amount: 5000,
                quantity: 2,
            }],
            success_url: "https://shop.example/purchase-success?session_id={CHECKOUT_SESSION_ID}"
                .to_string(),
            cancel_url: "https://shop.example/purchase-cancel".to_string(),
            discount_coupon_id: Some("gw_coupon_1".to_string()),
            metadata,
        }
    }

    #[test]
    fn session_form_flattens_line_items_in_minor_units() {
        let form = HttpPaymentGateway::session_form(&sample_request());

        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("mode"), Some("payment"));
        assert_eq!(
            get("line_items[0][price_data][unit_amount]"),
            Some("5000")
        );
        assert_eq!(get("line_items[0][quantity]"), Some("2"));
        assert_eq!(get("discounts[0][coupon]"), Some("gw_coupon_1"));
        assert_eq!(get("metadata[user_id]"), Some("u-1"));
    }

    #[test]
    fn only_paid_maps_to_paid() {
        assert_eq!(
            HttpPaymentGateway::parse_status("paid"),
            PaymentStatus::Paid
        );
        assert_eq!(
            HttpPaymentGateway::parse_status("unpaid"),
            PaymentStatus::Unpaid
        );
        assert_eq!(
            HttpPaymentGateway::parse_status("no_payment_required"),
            PaymentStatus::Unpaid
        );
    }
}
