//! # Data Layer
//!
//! Explicit construction of the shared components: cache store, cache
//! client, rate limiter, document store and (optionally) the PostgreSQL
//! pool. Repositories are handed out bound to a collection or table with
//! the TTL configured for its domain area.

use crate::caching::{CacheClient, CacheStore, InMemoryCache, RedisCache, RedisCacheConfig};
use crate::core::config::{CacheBackendKind, DataLayerConfig};
use crate::core::error::{DataError, DataResult};
use crate::middleware::rate_limiting::RateLimiter;
use crate::repository::document::{DocumentRepository, DocumentStore, InMemoryDocumentStore};
use crate::repository::relational::{PgConnectionPool, RelationalRepository};
use crate::repository::RepositorySettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Interval of the in-memory cache expiry sweep
const MEMORY_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Health of the backing services
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DataLayerHealth {
    pub cache: bool,
    /// `None` when no relational backend is configured
    pub database: Option<bool>,
}

impl DataLayerHealth {
    pub fn is_healthy(&self) -> bool {
        self.cache && self.database.unwrap_or(true)
    }
}

/// Shared data-layer components
pub struct DataLayer {
    config: DataLayerConfig,
    cache: Arc<CacheClient>,
    rate_limiter: Arc<RateLimiter>,
    documents: Arc<dyn DocumentStore>,
    pg_pool: Option<Arc<PgConnectionPool>>,
    cleanup_task: Option<JoinHandle<()>>,
}

impl DataLayer {
    /// Connect every configured backend
    pub async fn connect(config: DataLayerConfig) -> DataResult<Self> {
        config.validate()?;

        let (store, cleanup_task): (Arc<dyn CacheStore>, _) = match config.cache.backend {
            CacheBackendKind::Redis => {
                let redis = RedisCache::new(RedisCacheConfig::from(&config.cache)).await?;
                (Arc::new(redis), None)
            }
            CacheBackendKind::Memory => {
                let memory = InMemoryCache::new();
                let task = memory.spawn_cleanup(MEMORY_CLEANUP_INTERVAL);
                info!("Using in-memory cache store");
                (Arc::new(memory), Some(task))
            }
        };

        let pg_pool = match config.database.url {
            Some(_) => Some(Arc::new(PgConnectionPool::connect(&config.database).await?)),
            None => {
                info!("No database.url configured; relational repositories unavailable");
                None
            }
        };

        Ok(Self::assemble(
            config,
            store,
            Arc::new(InMemoryDocumentStore::new()),
            pg_pool,
            cleanup_task,
        ))
    }

    /// Build a data layer over caller-supplied stores
    pub fn with_stores(
        config: DataLayerConfig,
        cache_store: Arc<dyn CacheStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self::assemble(config, cache_store, documents, None, None)
    }

    fn assemble(
        config: DataLayerConfig,
        cache_store: Arc<dyn CacheStore>,
        documents: Arc<dyn DocumentStore>,
        pg_pool: Option<Arc<PgConnectionPool>>,
        cleanup_task: Option<JoinHandle<()>>,
    ) -> Self {
        let cache = Arc::new(CacheClient::new(cache_store));
        let rate_limiter = Arc::new(RateLimiter::new(cache.clone(), config.rate_limit.clone()));

        Self {
            config,
            cache,
            rate_limiter,
            documents,
            pg_pool,
            cleanup_task,
        }
    }

    pub fn config(&self) -> &DataLayerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheClient> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn document_store(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn pg_pool(&self) -> Option<&Arc<PgConnectionPool>> {
        self.pg_pool.as_ref()
    }

    /// Entity TTL settings shared by articles, users and organizations
    pub fn entity_settings(&self) -> RepositorySettings {
        RepositorySettings::with_ttl(self.config.ttl.entity)
    }

    /// Document repository for `collection`
    pub fn documents(&self, collection: &str) -> DocumentRepository {
        self.documents_with(collection, &self.entity_settings())
    }

    pub fn articles(&self) -> DocumentRepository {
        self.documents("articles")
    }

    pub fn users(&self) -> DocumentRepository {
        self.documents("users")
    }

    pub fn organizations(&self) -> DocumentRepository {
        self.documents("organizations")
    }

    pub fn documents_with(
        &self,
        collection: &str,
        settings: &RepositorySettings,
    ) -> DocumentRepository {
        DocumentRepository::new(self.documents.clone(), collection, self.cache.clone(), settings)
    }

    /// Repository for "popular" aggregate listings over `collection`
    pub fn popular(&self, collection: &str) -> DocumentRepository {
        let settings = RepositorySettings::with_ttl(self.config.ttl.popular)
            .key_prefix(format!("popular:{}:", collection));
        self.documents_with(collection, &settings)
    }

    /// Relational repository for `table`
    pub fn table(&self, table: &str) -> DataResult<RelationalRepository<PgConnectionPool>> {
        let pool = self
            .pg_pool
            .clone()
            .ok_or_else(|| DataError::config("database.url is not set"))?;
        RelationalRepository::new(pool, table, self.cache.clone(), &self.entity_settings())
    }

    pub async fn health_check(&self) -> DataLayerHealth {
        let database = match &self.pg_pool {
            Some(pool) => Some(pool.health_check().await),
            None => None,
        };
        DataLayerHealth {
            cache: self.cache.is_healthy().await,
            database,
        }
    }

    /// Stop background tasks and close the pool
    pub async fn shutdown(mut self) {
        if let Some(task) = self.cleanup_task.take() {
            task.abort();
        }
        if let Some(pool) = self.pg_pool.take() {
            pool.close().await;
        }

        let stats = self.cache.stats();
        if stats.errors > 0 {
            warn!(errors = stats.errors, "Cache reported errors during this run");
        }
        info!(
            hits = stats.hits,
            misses = stats.misses,
            hit_ratio = stats.hit_ratio(),
            "Data layer shut down"
        );
    }
}

impl std::fmt::Debug for DataLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLayer")
            .field("cache", &self.cache)
            .field("relational", &self.pg_pool.is_some())
            .finish()
    }
}
