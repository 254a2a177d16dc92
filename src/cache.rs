//! Key/value cache shared across requests.
//!
//! The gateway keeps its only cross-request mutable state here: manifest
//! cache, precache tickets, shuffled catalogs and the proxy's public IP.
//! Entries are scoped to one logical identity each, so concurrent writers
//! simply race and the last write wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// Cache backend contract.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Read a live entry. With `update_ttl` the entry's TTL is re-armed.
    async fn get(&self, key: &str, update_ttl: bool) -> Option<Value>;

    /// Store `value` for `ttl_secs` seconds, replacing any previous entry.
    async fn set(&self, key: &str, value: Value, ttl_secs: u64);

    /// Remaining lifetime of a live entry in whole seconds.
    async fn get_ttl(&self, key: &str) -> Option<u64>;
}

/// Read and deserialize an entry, treating shape mismatches as misses.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    let value = cache.get(key, false).await?;
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!(key, error = %e, "Discarding cache entry with unexpected shape");
            None
        }
    }
}

/// Serialize and store an entry. Serialization failures are logged and skipped.
pub async fn set_json<T: Serialize + Sync>(cache: &dyn Cache, key: &str, value: &T, ttl_secs: u64) {
    match serde_json::to_value(value) {
        Ok(json) => cache.set(key, json, ttl_secs).await,
        Err(e) => debug!(key, error = %e, "Skipping cache write"),
    }
}

struct Entry {
    value: Value,
    ttl: Duration,
    expires_at: Instant,
}

/// In-process cache with per-entry expiry.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries.
    pub async fn sweep(&self) {
        let now = Instant::now();
        self.entries.write().await.retain(|_, e| e.expires_at > now);
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str, update_ttl: bool) -> Option<Value> {
        let now = Instant::now();
        if update_ttl {
            let mut entries = self.entries.write().await;
            let entry = entries.get_mut(key).filter(|e| e.expires_at > now)?;
            entry.expires_at = now + entry.ttl;
            return Some(entry.value.clone());
        }

        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: u64) {
        let ttl = Duration::from_secs(ttl_secs);
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                ttl,
                expires_at: now + ttl,
            },
        );
    }

    async fn get_ttl(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| (e.expires_at - now).as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get() {
        let cache = MemoryCache::new();
        cache.set("k", json!({"a": 1}), 60).await;
        assert_eq!(cache.get("k", false).await, Some(json!({"a": 1})));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn zero_ttl_entries_are_invisible() {
        let cache = MemoryCache::new();
        cache.set("k", json!(true), 0).await;
        assert_eq!(cache.get("k", false).await, None);
        assert_eq!(cache.get_ttl("k").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn ttl_reports_remaining_seconds() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), 120).await;
        let ttl = cache.get_ttl("k").await.unwrap();
        assert!(ttl > 100 && ttl <= 120);
    }

    #[tokio::test]
    async fn update_ttl_rearms_entry() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), 120).await;
        assert!(cache.get("k", true).await.is_some());
        assert!(cache.get_ttl("k").await.unwrap() >= 119);
    }

    #[tokio::test]
    async fn typed_helpers_round_trip() {
        let cache = MemoryCache::new();
        set_json(&cache, "list", &vec!["a".to_string(), "b".to_string()], 60).await;
        let list: Option<Vec<String>> = get_json(&cache, "list").await;
        assert_eq!(list.unwrap(), vec!["a", "b"]);

        let wrong: Option<u32> = get_json(&cache, "list").await;
        assert!(wrong.is_none());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), 60).await;
        cache.set("k", json!(2), 60).await;
        assert_eq!(cache.get("k", false).await, Some(json!(2)));
    }
}
