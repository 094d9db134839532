//! # Newsroom Data Layer
//!
//! Cached, multi-backend data access for the newsroom platform: articles,
//! users and organizations stored in a document store or a relational
//! database, read through a shared key-value cache, plus a fixed-window
//! rate limiter with blocking that runs on the same cache.
//!
//! ## Architecture
//! - [`caching`]: cache stores, the fail-open [`CacheClient`], deterministic
//!   keys and the cache-aside decorator every repository composes
//! - [`repository`]: the [`Repository`] contract with a document-store and a
//!   relational implementation
//! - [`middleware`]: the [`RateLimiter`]
//! - [`context`]: explicit construction of all of the above from a
//!   [`DataLayerConfig`]
//!
//! ## Usage Example
//! ```rust,no_run
//! use newsroom_data::{DataLayer, DataLayerConfig, Repository};
//! use newsroom_data::core::types::{entity, QueryOptions, WriteOptions};
//! use serde_json::json;
//!
//! # async fn demo() -> newsroom_data::DataResult<()> {
//! let layer = DataLayer::connect(DataLayerConfig::from_env()?).await?;
//! let articles = layer.articles();
//!
//! let created = articles
//!     .create(entity(json!({"title": "Hello"})), &WriteOptions::new())
//!     .await?;
//! let found = articles.find(&entity(json!({"title": "Hello"})), &QueryOptions::new()).await?;
//! # let _ = (created, found);
//! # Ok(())
//! # }
//! ```

/// Error types, configuration and the entity/options types shared by every module
pub mod core;

/// Key-value cache stores, cache client and cache-aside decorator
pub mod caching;

/// Rate limiting on top of the cache client
pub mod middleware;

/// Structured logging setup
pub mod observability;

/// Repository contract and its document and relational implementations
pub mod repository;

/// Data layer bootstrap
pub mod context;

pub use caching::{CacheAside, CacheClient, CacheKeyCodec, CacheStore, InMemoryCache, RedisCache};
pub use context::{DataLayer, DataLayerHealth};
pub use core::config::DataLayerConfig;
pub use core::error::{DataError, DataResult};
pub use core::types::{Criteria, DeleteOutcome, Entity, QueryOptions, WriteOptions};
pub use middleware::rate_limiting::{RateLimitDecision, RateLimiter};
pub use repository::{DocumentRepository, RelationalRepository, Repository, RepositorySettings};
