//! # Cache Stores Module
//!
//! Redis-backed and in-memory implementations of the key-value store the
//! cache client and rate limiter run on.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryCache;
pub use redis_store::{RedisCache, RedisCacheConfig};

use super::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Trait for cache store implementations
///
/// Values are opaque bytes; serialization happens one level up in the
/// [`CacheClient`](crate::caching::CacheClient).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value from the cache
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set a value in the cache with TTL
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Delete a value from the cache; `true` when something was removed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Check if a key exists in the cache
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Atomically increment an integer counter, creating it at 1.
    ///
    /// A counter created this way has no expiry until [`expire`](Self::expire)
    /// is called.
    async fn increment(&self, key: &str) -> CacheResult<i64>;

    /// Set the expiry of an existing key; `false` when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Remaining time to live; `None` when the key is missing or never expires
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;
}
