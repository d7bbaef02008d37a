// =============================================================================
// PRODUCT CACHE
// =============================================================================
// Read-through Redis cache for single-product reads.
//
// Keys: "product:<uuid>" → product JSON, with a TTL.
//
// The cache is an optimisation only: every Redis failure is logged and
// treated as a miss, never surfaced to the client. Entries are deleted
// whenever this service changes the product (stock reservation, restore,
// admin edits).
// =============================================================================

use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::metrics;
use crate::models::Product;

#[derive(Clone)]
pub struct ProductCache {
    conn: ConnectionManager,
    ttl_secs: u64,
}

fn cache_key(product_id: Uuid) -> String {
    format!("product:{product_id}")
}

impl ProductCache {
    pub async fn connect(redis_url: &str, ttl_secs: u64) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, ttl_secs })
    }

    pub async fn get(&self, product_id: Uuid) -> Option<Product> {
        let cached: Result<Option<String>, _> = redis::cmd("GET")
            .arg(cache_key(product_id))
            .query_async(&mut self.conn.clone())
            .await;

        match cached {
            Ok(Some(json)) => match serde_json::from_str::<Product>(&json) {
                Ok(product) => {
                    metrics::record_cache_lookup("hit");
                    Some(product)
                }
                Err(e) => {
                    tracing::warn!(product_id = %product_id, error = %e, "Discarding undecodable cache entry");
                    metrics::record_cache_lookup("error");
                    None
                }
            },
            Ok(None) => {
                metrics::record_cache_lookup("miss");
                None
            }
            Err(e) => {
                tracing::warn!(product_id = %product_id, error = %e, "Cache read failed");
                metrics::record_cache_lookup("error");
                None
            }
        }
    }

    pub async fn put(&self, product: &Product) {
        let json = match serde_json::to_string(product) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(product_id = %product.id, error = %e, "Failed to encode product for cache");
                return;
            }
        };

        let result: Result<(), _> = redis::cmd("SETEX")
            .arg(cache_key(product.id))
            .arg(self.ttl_secs)
            .arg(json)
            .query_async(&mut self.conn.clone())
            .await;
        if let Err(e) = result {
            tracing::warn!(product_id = %product.id, error = %e, "Cache write failed");
        }
    }

    pub async fn invalidate<I>(&self, product_ids: I)
    where
        I: IntoIterator<Item = Uuid>,
    {
        let keys: Vec<String> = product_ids.into_iter().map(cache_key).collect();
        if keys.is_empty() {
            return;
        }

        let result: Result<(), _> = redis::cmd("DEL")
            .arg(&keys)
            .query_async(&mut self.conn.clone())
            .await;
        if let Err(e) = result {
            tracing::warn!(keys = ?keys, error = %e, "Cache invalidation failed");
        }
    }

    pub async fn ping(&self) -> bool {
        redis::cmd("PING")
            .query_async::<_, String>(&mut self.conn.clone())
            .await
            .is_ok()
    }
}
