//! # Document-Store Repository
//!
//! Repository over one collection of a [`DocumentStore`]. Adds
//! [`DocumentRepository::aggregate`] and [`DocumentRepository::bulk_write`]
//! to the shared [`Repository`] surface.

pub mod memory;
pub mod pipeline;
pub mod store;

pub use memory::InMemoryDocumentStore;
pub use pipeline::run_pipeline;
pub use store::{document_id, BulkOperation, BulkWriteResult, DocumentQuery, DocumentStore, ID_FIELD};

use super::{EntityValidator, Repository, RepositorySettings, WriteKind};
use crate::caching::{CacheAside, CacheClient};
use crate::core::error::{DataError, DataResult};
use crate::core::types::{Criteria, DeleteOutcome, Entity, QueryOptions, WriteOptions};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Cache key backend tag for document collections
pub const BACKEND: &str = "mongo";

/// Repository over one collection
pub struct DocumentRepository {
    store: Arc<dyn DocumentStore>,
    collection: String,
    cache: CacheAside,
    validator: Option<Arc<dyn EntityValidator>>,
}

impl DocumentRepository {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: &str,
        client: Arc<CacheClient>,
        settings: &RepositorySettings,
    ) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            cache: settings.cache_aside(client, BACKEND, collection),
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn EntityValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn cache(&self) -> &CacheAside {
        &self.cache
    }

    fn validate(&self, data: &Entity, kind: WriteKind, options: &WriteOptions) -> DataResult<()> {
        match &self.validator {
            Some(validator) if options.validate => validator.validate(&self.collection, data, kind),
            _ => Ok(()),
        }
    }

    fn invalidates(&self, options: &WriteOptions) -> bool {
        self.cache.is_enabled() || options.use_cache == Some(true)
    }

    /// Run an aggregation pipeline; the whole result array is cached under
    /// a key derived from the full pipeline.
    pub async fn aggregate(
        &self,
        pipeline: &[Value],
        options: &QueryOptions,
    ) -> DataResult<Vec<Value>> {
        let key = self.cache.operation_key("aggregate", pipeline, &Map::new());

        self.cache
            .read_through(&key, self.cache.should_use(options.use_cache), || {
                self.store.aggregate(&self.collection, pipeline)
            })
            .await
    }

    /// Apply a batch of inserts, updates and deletes atomically.
    ///
    /// Inserted documents are validated up front; nothing is written when
    /// one of them fails.
    pub async fn bulk_write(
        &self,
        operations: Vec<BulkOperation>,
        options: &WriteOptions,
    ) -> DataResult<BulkWriteResult> {
        for operation in &operations {
            if let BulkOperation::InsertOne { document } = operation {
                self.validate(document, WriteKind::Create, options)?;
            }
        }

        let result = self.store.bulk_write(&self.collection, operations).await?;

        if self.invalidates(options) {
            for id in &result.affected_ids {
                self.cache.client().delete(&self.cache.key_for_id(id)).await;
            }
            self.cache.invalidate_collection().await;
        }
        debug!(
            collection = %self.collection,
            affected = result.affected_ids.len(),
            "Bulk write completed"
        );
        Ok(result)
    }

    async fn first(&self, query: DocumentQuery) -> DataResult<Option<Entity>> {
        Ok(self
            .store
            .find(&self.collection, &query)
            .await?
            .into_iter()
            .next())
    }
}

#[async_trait]
impl Repository for DocumentRepository {
    async fn find_by_id(&self, id: &str, options: &QueryOptions) -> DataResult<Option<Entity>> {
        // Shaped lookups would outlive invalidation of the identity key
        let use_cache = self.cache.should_use(options.use_cache) && options.is_unshaped();
        let key = self.cache.key_for_id(id);

        self.cache
            .read_optional(&key, use_cache, || self.first(DocumentQuery::by_id(id, options)))
            .await
    }

    async fn find_one(
        &self,
        criteria: &Criteria,
        options: &QueryOptions,
    ) -> DataResult<Option<Entity>> {
        let mut query = DocumentQuery::new(criteria.clone(), options);
        query.limit = Some(1);
        let key = self.cache.operation_key("findOne", criteria, options);

        self.cache
            .read_optional(&key, self.cache.should_use(options.use_cache), || self.first(query))
            .await
    }

    async fn find(&self, criteria: &Criteria, options: &QueryOptions) -> DataResult<Vec<Entity>> {
        let query = DocumentQuery::new(criteria.clone(), options);
        let key = self.cache.operation_key("find", criteria, options);

        self.cache
            .read_through(&key, self.cache.should_use(options.use_cache), || async move {
                self.store.find(&self.collection, &query).await
            })
            .await
    }

    async fn create(&self, data: Entity, options: &WriteOptions) -> DataResult<Entity> {
        self.validate(&data, WriteKind::Create, options)?;

        let created = self.store.insert(&self.collection, data).await?;

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
        if data.is_empty() {
            return Err(DataError::validation("update requires at least one field"));
        }
        self.validate(&data, WriteKind::Update, options)?;

        let updated = self
            .store
            .find_and_update(&self.collection, id, data, options.update_mode, options.upsert)
            .await?;

        if updated.is_some() && self.invalidates(options) {
            self.cache.invalidate_entity(id).await;
        }
        Ok(updated)
    }

    async fn delete(&self, id: &str, options: &WriteOptions) -> DataResult<DeleteOutcome> {
        let removed = self.store.find_and_delete(&self.collection, id).await?;

        let outcome = DeleteOutcome {
            deleted: removed.is_some(),
            entity: removed.filter(|_| options.return_deleted),
        };

        if outcome.deleted && self.invalidates(options) {
            self.cache.invalidate_entity(id).await;
        }
        Ok(outcome)
    }

    async fn count(&self, criteria: &Criteria, options: &QueryOptions) -> DataResult<u64> {
        let key = self.cache.operation_key("count", criteria, &Map::new());

        self.cache
            .read_through(&key, self.cache.should_use(options.use_cache), || {
                self.store.count(&self.collection, criteria)
            })
            .await
    }

    async fn exists(&self, criteria: &Criteria, options: &QueryOptions) -> DataResult<bool> {
        let query = DocumentQuery {
            filter: criteria.clone(),
            projection: Some(vec![ID_FIELD.to_string()]),
            limit: Some(1),
            ..Default::default()
        };
        let key = self.cache.operation_key("exists", criteria, &Map::new());

        self.cache
            .read_through(&key, self.cache.should_use(options.use_cache), || async move {
                self.store
                    .find(&self.collection, &query)
                    .await
                    .map(|found| !found.is_empty())
            })
            .await
    }
}
