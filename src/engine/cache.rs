use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Read-side cache for aggregated tree views.
///
/// Values are opaque JSON; keys are convention (`tree:{topic_id}`).
/// Correctness never depends on the cache, only read latency does.
#[async_trait]
pub trait TreeCache: Send + Sync {
    /// Get an unexpired value.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Store a value with a TTL.
    async fn set(&self, key: &str, value: Value, ttl_secs: u64);

    /// Remove every entry whose key starts with the prefix. Returns the
    /// number of entries dropped.
    async fn invalidate_prefix(&self, prefix: &str) -> usize;
}

struct CacheEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// Process-local TTL cache.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TreeCache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => Some(entry.value.clone()),
            Some(_) => {
                // Expired, drop eagerly
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: u64) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Utc::now() + Duration::seconds(ttl_secs as i64),
            },
        );
    }

    async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let dropped = before - entries.len();
        if dropped > 0 {
            debug!(prefix, dropped, "Cache entries invalidated");
        }
        dropped
    }
}

/// Cache key for a topic's aggregated tree.
pub fn tree_cache_key(topic_id: &str) -> String {
    format!("tree:{}", topic_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = InMemoryCache::new();
        cache.set("tree:t-1", json!({"id": "t-1"}), 60).await;

        assert_eq!(cache.get("tree:t-1").await, Some(json!({"id": "t-1"})));
        assert_eq!(cache.get("tree:t-2").await, None);
    }

    #[tokio::test]
    async fn test_expired_entry_absent() {
        let cache = InMemoryCache::new();
        cache.set("tree:t-1", json!(1), 0).await;
        assert_eq!(cache.get("tree:t-1").await, None);
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let cache = InMemoryCache::new();
        cache.set("tree:t-1", json!(1), 60).await;
        cache.set("tree:t-2", json!(2), 60).await;
        cache.set("status:t-1", json!(3), 60).await;

        assert_eq!(cache.invalidate_prefix("tree:").await, 2);
        assert_eq!(cache.get("tree:t-1").await, None);
        assert_eq!(cache.get("status:t-1").await, Some(json!(3)));
    }

    #[test]
    fn test_tree_cache_key() {
        assert_eq!(tree_cache_key("abc"), "tree:abc");
    }
}
