//! # Caching Module
//!
//! Key-value caching for the data layer.
//!
//! ## Architecture
//! 1. **Cache Stores**: Redis and in-memory implementations of [`CacheStore`]
//! 2. **Cache Client**: best-effort wrapper that serializes values and never
//!    lets a store failure escape
//! 3. **Key Generator**: deterministic `<backend>:<collection>:id:<id>` /
//!    `...:query:<canonical json>` keys
//! 4. **Cache-Aside**: read-through and invalidation shared by every repository
//!
//! ## Usage Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use newsroom_data::caching::{CacheAside, CacheClient, InMemoryCache};
//!
//! # async fn demo() {
//! let client = Arc::new(CacheClient::new(Arc::new(InMemoryCache::new())));
//! let articles = CacheAside::new(client, "mongo", "articles", Duration::from_secs(3600));
//!
//! let key = articles.key_for_id("a1");
//! articles.invalidate_entity("a1").await;
//! # let _ = key;
//! # }
//! ```

pub mod cache_aside;
pub mod client;
pub mod key_generator;
pub mod stores;

pub use cache_aside::CacheAside;
pub use client::{CacheClient, CacheClientStats};
pub use key_generator::{canonical_json, CacheKeyCodec};
pub use stores::{CacheStore, InMemoryCache, RedisCache, RedisCacheConfig};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache configuration error: {message}")]
    Configuration { message: String },

    #[error("Cache not available")]
    Unavailable,
}
