use redis::AsyncCommands;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Best-effort JSON cache over redis. Misses and connection failures are
/// logged and swallowed: a cache problem must never fail the caller.
#[derive(Clone)]
pub struct CacheLayer {
    conn: Option<redis::aio::ConnectionManager>,
    ttl_secs: u64,
}

impl CacheLayer {
    pub async fn connect(redis_url: &str, ttl_secs: u64) -> Self {
        let conn = match redis::Client::open(redis_url) {
            Ok(client) => match redis::aio::ConnectionManager::new(client).await {
                Ok(conn) => {
                    log::info!("Cache layer connected to redis");
                    Some(conn)
                }
                Err(e) => {
                    log::warn!("Cache layer unavailable ({}); running without cache", e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Invalid redis URL for cache ({}); running without cache", e);
                None
            }
        };
        Self { conn, ttl_secs }
    }

    /// A cache instance that never hits the network. Used by tests and by
    /// deployments without redis.
    pub fn disabled() -> Self {
        Self { conn: None, ttl_secs: 0 }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone()?;
        match conn.get::<_, Option<String>>(full_key(key)).await {
            Ok(Some(body)) => match serde_json::from_str(&body) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::warn!("Cache entry {} failed to decode: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::debug!("Cache get {} failed: {}", key, e);
                None
            }
        }
    }

    /// Idempotent write with the configured TTL.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let Some(mut conn) = self.conn.clone() else { return };
        let body = match serde_json::to_string(value) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Cache value for {} failed to encode: {}", key, e);
                return;
            }
        };
        if let Err(e) = conn
            .set_ex::<_, _, ()>(full_key(key), body, self.ttl_secs)
            .await
        {
            log::debug!("Cache set {} failed: {}", key, e);
        }
    }

    pub async fn delete(&self, key: &str) {
        let Some(mut conn) = self.conn.clone() else { return };
        if let Err(e) = conn.del::<_, ()>(full_key(key)).await {
            log::debug!("Cache delete {} failed: {}", key, e);
        }
    }
}

fn full_key(key: &str) -> String {
    format!("arremate:cache:{}", key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_cache_is_silent() {
        let cache = CacheLayer::disabled();
        cache.set("k", &42u32).await;
        let got: Option<u32> = cache.get("k").await;
        assert!(got.is_none());
        cache.delete("k").await;
    }
}
