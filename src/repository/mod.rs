//! # Repositories
//!
//! One capability contract, [`Repository`], with two independent
//! implementations:
//! - [`document::DocumentRepository`] over a schema-less document store
//! - [`relational::RelationalRepository`] over a table on a SQL pool
//!
//! Both compose a [`CacheAside`] for read-through and invalidation.
//! Absence is `None`, never an error.

pub mod criteria;
pub mod document;
pub mod relational;

pub use document::DocumentRepository;
pub use relational::RelationalRepository;

use crate::caching::{CacheAside, CacheClient, CacheKeyCodec};
use crate::core::error::DataResult;
use crate::core::types::{Criteria, DeleteOutcome, Entity, QueryOptions, WriteOptions};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Operations every repository exposes
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_by_id(&self, id: &str, options: &QueryOptions) -> DataResult<Option<Entity>>;

    async fn find_one(
        &self,
        criteria: &Criteria,
        options: &QueryOptions,
    ) -> DataResult<Option<Entity>>;

    /// Every match, fully materialized
    async fn find(&self, criteria: &Criteria, options: &QueryOptions) -> DataResult<Vec<Entity>>;

    async fn create(&self, data: Entity, options: &WriteOptions) -> DataResult<Entity>;

    /// `None` when no entity has `id`
    async fn update(
        &self,
        id: &str,
        data: Entity,
        options: &WriteOptions,
    ) -> DataResult<Option<Entity>>;

    async fn delete(&self, id: &str, options: &WriteOptions) -> DataResult<DeleteOutcome>;

    async fn count(&self, criteria: &Criteria, options: &QueryOptions) -> DataResult<u64>;

    async fn exists(&self, criteria: &Criteria, options: &QueryOptions) -> DataResult<bool>;
}

/// Which write an entity is validated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    /// `data` may be partial
    Update,
}

/// Entity shape check supplied by the caller.
///
/// Errors are passed through to the caller untouched.
pub trait EntityValidator: Send + Sync {
    fn validate(&self, collection: &str, entity: &Entity, kind: WriteKind) -> DataResult<()>;
}

/// Per-repository cache settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySettings {
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    /// Replaces the default `<backend>:<collection>:` key prefix
    pub key_prefix: Option<String>,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: Duration::from_secs(3600),
            key_prefix: None,
        }
    }
}

impl RepositorySettings {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache_ttl: ttl,
            ..Default::default()
        }
    }

    pub fn uncached() -> Self {
        Self {
            cache_enabled: false,
            ..Default::default()
        }
    }

    pub fn key_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub(crate) fn cache_aside(
        &self,
        client: Arc<CacheClient>,
        backend: &str,
        collection: &str,
    ) -> CacheAside {
        let codec = match &self.key_prefix {
            Some(prefix) => CacheKeyCodec::with_prefix(prefix.clone()),
            None => CacheKeyCodec::new(backend, collection),
        };
        CacheAside::with_codec(client, codec, self.cache_ttl).enabled(self.cache_enabled)
    }
}
