//! Abstract KV cache plus an in-memory, TTL-aware implementation.
//!
//! A single `Arc<RwLock<HashMap<_, _>>>` shared across readers,
//! single-writer per key family, replacement by atomic key-set.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[async_trait]
pub trait KvCache<V: Clone + Send + Sync>: Send + Sync {
    async fn get(&self, key: &str) -> Option<V>;
    async fn set(&self, key: &str, value: V, ttl: Duration);
    async fn invalidate_prefix(&self, prefix: &str);
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// In-memory `KvCache`. One instance is shared (via `Arc`) between the Pool
/// Manager (sole writer for `health:*` and `pool:*` keys) and any number of
/// readers (Resolver, API layer).
pub struct InMemoryKvCache<V> {
    entries: Arc<RwLock<HashMap<String, Entry<V>>>>,
}

impl<V> Default for InMemoryKvCache<V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<V> InMemoryKvCache<V> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<V: Clone + Send + Sync> KvCache<V> for InMemoryKvCache<V> {
    async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        entries.get(key).and_then(|e| {
            if Instant::now() < e.expires_at {
                Some(e.value.clone())
            } else {
                None
            }
        })
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|k, _| !k.starts_with(prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expires_after_ttl() {
        let cache: InMemoryKvCache<u32> = InMemoryKvCache::new();
        cache.set("k", 42, Duration::from_millis(10)).await;
        assert_eq!(cache.get("k").await, Some(42));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn invalidate_prefix_clears_matching_keys_only() {
        let cache: InMemoryKvCache<u32> = InMemoryKvCache::new();
        cache.set("pool:claude", 1, Duration::from_secs(60)).await;
        cache.set("health:abc", 2, Duration::from_secs(60)).await;
        cache.invalidate_prefix("pool:").await;
        assert_eq!(cache.get("pool:claude").await, None);
        assert_eq!(cache.get("health:abc").await, Some(2));
    }
}
