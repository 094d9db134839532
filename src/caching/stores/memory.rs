//! # In-Memory Cache Store
//!
//! Process-local [`CacheStore`] used for development, single-node deployments
//! and tests. Expiry is TTL-only: entries are dropped lazily when touched after
//! their deadline, or in bulk by [`InMemoryCache::purge_expired`]. There is no
//! size-based eviction.

use super::CacheStore;
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// In-memory cache implementation
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }

    /// Spawn a background task that purges expired entries periodically.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_cleanup(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                cache.purge_expired();
            }
        })
    }

    fn live_entry(&self, key: &str) -> Option<MemoryEntry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.value().clone();
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry)
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.live_entry(key).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(matches!(self.entries.remove(key), Some((_, e)) if !e.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.live_entry(key).is_some())
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        let now = Instant::now();

        // The entry guard holds the shard lock, so read-modify-write is atomic
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    entry.value = b"1".to_vec();
                    entry.expires_at = None;
                    return Ok(1);
                }

                let current: i64 = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| CacheError::Store {
                        message: format!("value at '{}' is not an integer", key),
                    })?;
                let next = current + 1;
                entry.value = next.to_string().into_bytes();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry {
                    value: b"1".to_vec(),
                    expires_at: None,
                });
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .live_entry(key)
            .and_then(|e| e.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now)))
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let cache = InMemoryCache::new();

        cache
            .set("key", b"value", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("key").await.unwrap(), Some(b"value".to_vec()));
        assert!(cache.exists("key").await.unwrap());

        assert!(cache.delete("key").await.unwrap());
        assert!(!cache.delete("key").await.unwrap());
        assert_eq!(cache.get("key").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let cache = InMemoryCache::new();
        cache
            .set("short", b"v", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(cache.exists("short").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_and_expire() {
        let cache = InMemoryCache::new();

        assert_eq!(cache.increment("hits").await.unwrap(), 1);
        assert_eq!(cache.increment("hits").await.unwrap(), 2);
        assert_eq!(cache.ttl("hits").await.unwrap(), None);

        assert!(cache.expire("hits", Duration::from_secs(10)).await.unwrap());
        assert_eq!(
            cache.ttl("hits").await.unwrap(),
            Some(Duration::from_secs(10))
        );

        tokio::time::advance(Duration::from_secs(11)).await;
        // Expired counters restart at one
        assert_eq!(cache.increment("hits").await.unwrap(), 1);
        assert!(!cache.expire("missing", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_non_integer() {
        let cache = InMemoryCache::new();
        cache
            .set("text", b"hello", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(
            cache.increment("text").await,
            Err(CacheError::Store { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = InMemoryCache::new();
        cache.set("a", b"1", Duration::from_secs(1)).await.unwrap();
        cache.set("b", b"2", Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let cache = InMemoryCache::new();
        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.increment("shared").await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.increment("shared").await.unwrap(), 51);
    }
}
