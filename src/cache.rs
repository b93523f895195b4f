use std::sync::Arc;

use redis::AsyncCommands;
use tracing::warn;

/// Key for the featured-products snapshot, the only value this service caches.
pub const FEATURED_PRODUCTS_KEY: &str = "featured_products";

/// Thin wrapper over the redis client. Every failure mode (no backend,
/// refused connection, command error) degrades to a cache miss; reads and
/// writes here must never fail a request.
#[derive(Clone)]
pub struct CacheClient {
    client: Arc<redis::Client>,
}

impl CacheClient {
    pub fn new(client: Arc<redis::Client>) -> Self {
        Self { client }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = match self.client.get_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(key = %key, "Cache unavailable, treating as miss: {}", e);
                return None;
            }
        };

        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, "Cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str) {
        let mut conn = match self.client.get_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(key = %key, "Cache unavailable, skipping write: {}", e);
                return;
            }
        };

        if let Err(e) = conn.set::<_, _, ()>(key, value).await {
            warn!(key = %key, "Cache write failed: {}", e);
        }
    }

    pub async fn delete(&self, key: &str) {
        let mut conn = match self.client.get_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(key = %key, "Cache unavailable, skipping delete: {}", e);
                return;
            }
        };

        if let Err(e) = conn.del::<_, ()>(key).await {
            warn!(key = %key, "Cache delete failed: {}", e);
        }
    }

    /// Connectivity probe for the health endpoint.
    pub async fn ping(&self) -> bool {
        match self.client.get_async_connection().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        }
    }
}
