//! # Cache Client
//!
//! Best-effort wrapper around one [`CacheStore`] connection.
//!
//! Every failure is logged as a warning and turned into a miss or a `false`
//! flag. Nothing here returns an error.

use super::CacheStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared cache client
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// Snapshot of cache client counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheClientStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

impl CacheClientStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Read and deserialize a value; any failure is a miss
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key, true).await
    }

    /// Like [`get`](Self::get) but leaves the hit/miss counters alone, for
    /// bookkeeping keys such as rate limit counters. Failures still count
    /// as errors.
    pub async fn get_untracked<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key, false).await
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str, track: bool) -> Option<T> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.record_miss(track);
                debug!(key, "Cache miss");
                return None;
            }
            Err(e) => {
                self.record_error();
                self.record_miss(track);
                warn!(key, error = %e, "Cache get failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                if track {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                debug!(key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                self.record_error();
                self.record_miss(track);
                warn!(key, error = %e, "Cached value could not be decoded, treating as miss");
                None
            }
        }
    }

    /// Serialize and store a value; `false` when the write did not happen
    pub async fn set_with_ttl<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.record_error();
                warn!(key, error = %e, "Value could not be encoded for caching");
                return false;
            }
        };

        match self.store.set(key, &bytes, ttl).await {
            Ok(()) => {
                debug!(key, ttl_secs = ttl.as_secs(), "Cache set");
                true
            }
            Err(e) => {
                self.record_error();
                warn!(key, error = %e, "Cache set failed");
                false
            }
        }
    }

    /// Remove a key; `false` on store failure (a missing key is still `true`)
    pub async fn delete(&self, key: &str) -> bool {
        match self.store.delete(key).await {
            Ok(removed) => {
                debug!(key, removed, "Cache delete");
                true
            }
            Err(e) => {
                self.record_error();
                warn!(key, error = %e, "Cache delete failed");
                false
            }
        }
    }

    /// Atomic increment; `None` on store failure
    pub async fn increment(&self, key: &str) -> Option<i64> {
        match self.store.increment(key).await {
            Ok(count) => Some(count),
            Err(e) => {
                self.record_error();
                warn!(key, error = %e, "Cache increment failed");
                None
            }
        }
    }

    /// Set a key's expiry; `false` when the key is missing or the store failed
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        match self.store.expire(key, ttl).await {
            Ok(applied) => applied,
            Err(e) => {
                self.record_error();
                warn!(key, error = %e, "Cache expire failed");
                false
            }
        }
    }

    /// Remaining TTL; `None` when unknown
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        match self.store.ttl(key).await {
            Ok(ttl) => ttl,
            Err(e) => {
                self.record_error();
                warn!(key, error = %e, "Cache ttl lookup failed");
                None
            }
        }
    }

    pub async fn is_healthy(&self) -> bool {
        match self.store.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(error = %e, "Cache health check failed");
                false
            }
        }
    }

    pub fn stats(&self) -> CacheClientStats {
        CacheClientStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self, track: bool) {
        if track {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("stats", &self.stats())
            .finish()
    }
}
