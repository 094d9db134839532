//! # Relational-Store Repository
//!
//! Repository over one table of a relational backend. Criteria are rendered
//! to parameterized SQL by [`SqlBuilder`]; statements run on a
//! [`ConnectionPool`]. Reads go through the cache-aside layer, writes
//! invalidate the touched row and the table's collection key.
//!
//! Column types are fetched from the pool once, on the first statement, and
//! every later statement casts its parameters to them.

pub mod pool;
pub mod postgres;
pub mod sql_builder;

pub use pool::{ConnectionPool, QueryOutput, SqlConnection};
pub use postgres::{PgConnectionPool, PgSqlConnection};
pub use sql_builder::{ColumnTypes, KeyType, SqlBuilder, SqlValue, Statement};

use super::{EntityValidator, Repository, RepositorySettings, WriteKind};
use crate::caching::{CacheAside, CacheClient};
use crate::core::error::{DataError, DataResult};
use crate::core::types::{Criteria, DeleteOutcome, Entity, QueryOptions, WriteOptions};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Map;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, instrument};

/// Cache key backend tag for relational tables
pub const BACKEND: &str = "pg";

/// Repository over one table
pub struct RelationalRepository<P: ConnectionPool> {
    pool: Arc<P>,
    builder: SqlBuilder,
    typed: OnceCell<SqlBuilder>,
    cache: CacheAside,
    validator: Option<Arc<dyn EntityValidator>>,
}

impl<P: ConnectionPool> RelationalRepository<P> {
    /// Repository over `table` with a text primary key named `id`
    pub fn new(
        pool: Arc<P>,
        table: &str,
        client: Arc<CacheClient>,
        settings: &RepositorySettings,
    ) -> DataResult<Self> {
        Ok(Self {
            pool,
            builder: SqlBuilder::new(table, "id", KeyType::Text)?,
            typed: OnceCell::new(),
            cache: settings.cache_aside(client, BACKEND, table),
            validator: None,
        })
    }

    /// Use a different primary key column and binding
    pub fn with_primary_key(mut self, column: &str, key_type: KeyType) -> DataResult<Self> {
        self.builder = SqlBuilder::new(self.builder.table(), column, key_type)?;
        self.typed = OnceCell::new();
        Ok(self)
    }

    pub fn with_validator(mut self, validator: Arc<dyn EntityValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn table(&self) -> &str {
        self.builder.table()
    }

    pub fn cache(&self) -> &CacheAside {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    fn validate(&self, data: &Entity, kind: WriteKind, options: &WriteOptions) -> DataResult<()> {
        match &self.validator {
            Some(validator) if options.validate => validator.validate(self.table(), data, kind),
            _ => Ok(()),
        }
    }

    fn invalidates(&self, options: &WriteOptions) -> bool {
        self.cache.is_enabled() || options.use_cache == Some(true)
    }

    /// Builder carrying the table's column types, loaded on first use
    async fn typed_builder(&self) -> DataResult<&SqlBuilder> {
        self.typed
            .get_or_try_init(|| async {
                let types = self.pool.column_types(self.builder.table()).await?;
                debug!(table = %self.builder.table(), columns = types.len(), "Column types loaded");
                Ok::<_, DataError>(self.builder.clone().with_column_types(types))
            })
            .await
    }

    /// Build a statement with typed placeholders. Before the column types
    /// are loaded the untyped builder runs first, so malformed criteria
    /// still fail without touching the pool.
    async fn statement<F>(&self, build: F) -> DataResult<Statement>
    where
        F: Fn(&SqlBuilder) -> DataResult<Statement> + Send + Sync,
    {
        if let Some(typed) = self.typed.get() {
            return build(typed);
        }
        build(&self.builder)?;
        build(self.typed_builder().await?)
    }

    async fn fetch(&self, statement: Statement) -> DataResult<QueryOutput> {
        self.pool.query(&statement.sql, &statement.params).await
    }

    /// Run raw SQL on the pool. Bypasses the cache; callers that write
    /// through it should call `cache().invalidate_collection()`.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> DataResult<QueryOutput> {
        self.pool.query(sql, params).await
    }

    /// Run `work` inside BEGIN/COMMIT on a single connection.
    ///
    /// Any error from `work` rolls the transaction back and is returned
    /// unchanged. The connection goes back to the pool either way. The
    /// collection key is invalidated only after a successful commit.
    #[instrument(skip(self, work), fields(table = %self.builder.table()))]
    pub async fn transaction<T, F>(&self, work: F) -> DataResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut P::Connection) -> BoxFuture<'c, DataResult<T>> + Send,
    {
        let mut connection = self.pool.acquire().await?;

        if let Err(e) = connection.query("BEGIN", &[]).await {
            self.pool.release(connection).await;
            return Err(DataError::transaction(format!("BEGIN failed: {}", e)));
        }

        let outcome = match work(&mut connection).await {
            Ok(value) => match connection.query("COMMIT", &[]).await {
                Ok(_) => Ok(value),
                Err(e) => Err(DataError::transaction(format!("COMMIT failed: {}", e))),
            },
            Err(e) => {
                if let Err(rollback_err) = connection.query("ROLLBACK", &[]).await {
                    error!(error = %rollback_err, "Failed to roll back transaction");
                }
                debug!(error = %e, "Transaction rolled back");
                Err(e)
            }
        };

        self.pool.release(connection).await;

        if outcome.is_ok() && self.cache.is_enabled() {
            self.cache.invalidate_collection().await;
        }
        outcome
    }

    async fn load_by_id(&self, id: &str, options: &QueryOptions) -> DataResult<Option<Entity>> {
        let statement = self.statement(|b| b.select_by_id(id, options)).await?;
        Ok(self.fetch(statement).await?.first())
    }
}

#[async_trait]
impl<P: ConnectionPool> Repository for RelationalRepository<P> {
    async fn find_by_id(&self, id: &str, options: &QueryOptions) -> DataResult<Option<Entity>> {
        // Shaped lookups would outlive invalidation of the identity key
        let use_cache = self.cache.should_use(options.use_cache) && options.is_unshaped();
        let key = self.cache.key_for_id(id);

        self.cache
            .read_optional(&key, use_cache, || self.load_by_id(id, options))
            .await
    }

    async fn find_one(
        &self,
        criteria: &Criteria,
        options: &QueryOptions,
    ) -> DataResult<Option<Entity>> {
        let statement = self.statement(|b| b.select(criteria, options, Some(1))).await?;
        let key = self.cache.operation_key("findOne", criteria, options);

        self.cache
            .read_optional(&key, self.cache.should_use(options.use_cache), || async move {
                self.fetch(statement).await.map(QueryOutput::first)
            })
            .await
    }

    async fn find(&self, criteria: &Criteria, options: &QueryOptions) -> DataResult<Vec<Entity>> {
        let statement = self.statement(|b| b.select(criteria, options, None)).await?;
        let key = self.cache.operation_key("find", criteria, options);

        self.cache
            .read_through(&key, self.cache.should_use(options.use_cache), || async move {
                self.fetch(statement).await.map(|output| output.rows)
            })
            .await
    }

    async fn create(&self, data: Entity, options: &WriteOptions) -> DataResult<Entity> {
        self.validate(&data, WriteKind::Create, options)?;
        let statement = self
            .statement(|b| b.insert(&data, options.returning))
            .await?;

        let created = self
            .fetch(statement)
            .await?
            .first()
            .ok_or_else(|| DataError::query("INSERT returned no row"))?;

        if self.invalidates(options) {
            self.cache.invalidate_collection().await;
        }
        Ok(created)
    }

    async fn update(
        &self,
        id: &str,
        data: Entity,
        options: &WriteOptions,
    ) -> DataResult<Option<Entity>> {
        self.validate(&data, WriteKind::Update, options)?;
        let statement = self
            .statement(|b| b.update(id, &data, options.returning))
            .await?;

        let updated = self.fetch(statement).await?.first();

        if updated.is_some() && self.invalidates(options) {
            self.cache.invalidate_entity(id).await;
        }
        Ok(updated)
    }

    async fn delete(&self, id: &str, options: &WriteOptions) -> DataResult<DeleteOutcome> {
        let statement = self
            .statement(|b| b.delete(id, options.return_deleted))
            .await?;
        let output = self.fetch(statement).await?;

        let outcome = DeleteOutcome {
            deleted: output.rows_affected > 0,
            entity: output.first(),
        };

        if outcome.deleted && self.invalidates(options) {
            self.cache.invalidate_entity(id).await;
        }
        Ok(outcome)
    }

    async fn count(&self, criteria: &Criteria, options: &QueryOptions) -> DataResult<u64> {
        let statement = self.statement(|b| b.count(criteria)).await?;
        let key = self.cache.operation_key("count", criteria, &Map::new());

        self.cache
            .read_through(&key, self.cache.should_use(options.use_cache), || async move {
                self.fetch(statement).await.map(|output| {
                    output
                        .first()
                        .and_then(|row| row.get("count").and_then(|c| c.as_u64()))
                        .unwrap_or(0)
                })
            })
            .await
    }

    async fn exists(&self, criteria: &Criteria, options: &QueryOptions) -> DataResult<bool> {
        let statement = self.statement(|b| b.exists(criteria)).await?;
        let key = self.cache.operation_key("exists", criteria, &Map::new());

        self.cache
            .read_through(&key, self.cache.should_use(options.use_cache), || async move {
                self.fetch(statement).await.map(|output| {
                    output
                        .first()
                        .and_then(|row| row.get("exists").and_then(|e| e.as_bool()))
                        .unwrap_or(false)
                })
            })
            .await
    }
}
