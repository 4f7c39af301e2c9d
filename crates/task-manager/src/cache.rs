//! Optional auxiliary cache with pluggable backend
//!
//! The task manager writes through this cache and reads from it before
//! the authoritative store. Backends are external KV stores keyed by
//! string with TTL'd JSON blobs; only the in-memory backend ships here.
//! A failed cache operation must never fail the user-visible call.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Async KV cache of TTL'd JSON blobs
#[async_trait]
pub trait TaskCache: Send + Sync {
    /// Fetch a value; `None` on miss or expiry
    async fn get(&self, key: &str) -> std::result::Result<Option<Value>, String>;

    /// Store a value with a TTL
    async fn put(&self, key: &str, value: Value, ttl: Duration)
        -> std::result::Result<(), String>;

    /// Drop a key
    async fn delete(&self, key: &str) -> std::result::Result<(), String>;
}

/// In-memory [`TaskCache`] backend with lazy expiry
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (Value, Instant)>>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live (possibly expired, not yet reaped) entries
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskCache for MemoryCache {
    async fn get(&self, key: &str) -> std::result::Result<Option<Value>, String> {
        let expired = {
            let entries = self.entries.read().unwrap();
            match entries.get(key) {
                Some((value, expires_at)) => {
                    if Instant::now() < *expires_at {
                        return Ok(Some(value.clone()));
                    }
                    true
                }
                None => false,
            }
        };

        if expired {
            self.entries.write().unwrap().remove(key);
        }
        Ok(None)
    }

    async fn put(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> std::result::Result<(), String> {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), String> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_delete() {
        let cache = MemoryCache::new();
        cache
            .put("task:1", json!({"status": "pending"}), Duration::from_secs(60))
            .await
            .unwrap();

        let hit = cache.get("task:1").await.unwrap();
        assert_eq!(hit.unwrap()["status"], "pending");

        cache.delete("task:1").await.unwrap();
        assert!(cache.get("task:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expiry() {
        let cache = MemoryCache::new();
        cache
            .put("blip", json!(1), Duration::from_millis(20))
            .await
            .unwrap();

        assert!(cache.get("blip").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("blip").await.unwrap().is_none());
        // Expired entry was reaped on read
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_miss_is_none_not_error() {
        let cache = MemoryCache::new();
        assert!(cache.get("nothing").await.unwrap().is_none());
    }
}
