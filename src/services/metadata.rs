use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::checkout::Address;

const META_USER_ID: &str = "user_id";
const META_COUPON_CODE: &str = "coupon_code";
const META_PRODUCTS: &str = "products";
const META_SHIPPING_ADDRESS: &str = "shipping_address";

/// One line of the frozen cart snapshot. Prices are client-asserted major
/// units, recorded as-is; the order total never derives from these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLine {
    pub id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
}

/// Snapshot stashed in the gateway session's metadata bag at creation time
/// and read back at confirmation. This is the sole source of truth for
/// building the order; the cart is never re-read.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    pub user_id: Uuid,
    /// The coupon code as requested, possibly empty, recorded even when it
    /// resolved to no discount.
    pub coupon_code: String,
    pub lines: Vec<SessionLine>,
    pub shipping_address: Address,
}

impl SessionMetadata {
    pub fn to_map(&self) -> Result<HashMap<String, String>, ServiceError> {
        let mut map = HashMap::new();
        map.insert(META_USER_ID.to_string(), self.user_id.to_string());
        map.insert(META_COUPON_CODE.to_string(), self.coupon_code.clone());
        map.insert(
            META_PRODUCTS.to_string(),
            serde_json::to_string(&self.lines)?,
        );
        map.insert(
            META_SHIPPING_ADDRESS.to_string(),
            serde_json::to_string(&self.shipping_address)?,
        );
        Ok(map)
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ServiceError> {
        let user_id = map
            .get(META_USER_ID)
            .ok_or_else(|| {
                ServiceError::SerializationError("session metadata missing user id".to_string())
            })
            .and_then(|raw| {
                Uuid::parse_str(raw).map_err(|_| {
                    ServiceError::SerializationError("malformed user id in session".to_string())
                })
            })?;

        let coupon_code = map.get(META_COUPON_CODE).cloned().unwrap_or_default();

        let lines: Vec<SessionLine> = serde_json::from_str(
            map.get(META_PRODUCTS).map(String::as_str).unwrap_or("[]"),
        )?;

        let shipping_address: Address = serde_json::from_str(
            map.get(META_SHIPPING_ADDRESS)
                .map(String::as_str)
                .ok_or_else(|| {
                    ServiceError::SerializationError(
                        "session metadata missing shipping address".to_string(),
                    )
                })?,
        )?;

        Ok(Self {
            user_id,
            coupon_code,
            lines,
            shipping_address,
        })
    }
}
