//! Document backend surface used by the document repository.

use crate::core::error::DataResult;
use crate::core::types::{Criteria, Entity, Populate, QueryOptions, SortKey, UpdateMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field holding a document's identity
pub const ID_FIELD: &str = "_id";

/// A find over one collection
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentQuery {
    /// Identity to match, compared the same way as `find_and_update`
    /// and `find_and_delete` compare it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub filter: Criteria,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub populate: Vec<Populate>,
}

impl DocumentQuery {
    pub fn new(filter: Criteria, options: &QueryOptions) -> Self {
        Self {
            id: None,
            filter,
            projection: options.select.clone(),
            sort: options.sort.clone(),
            skip: options.offset,
            limit: options.limit,
            populate: options.populate.clone(),
        }
    }

    /// Lookup of a single document by `_id`
    pub fn by_id(id: &str, options: &QueryOptions) -> Self {
        Self {
            id: Some(id.to_string()),
            limit: Some(1),
            skip: None,
            sort: Vec::new(),
            ..Self::new(Criteria::new(), options)
        }
    }
}

/// One step of a bulk write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BulkOperation {
    InsertOne {
        document: Entity,
    },
    UpdateOne {
        filter: Criteria,
        update: Entity,
        #[serde(default)]
        upsert: bool,
    },
    UpdateMany {
        filter: Criteria,
        update: Entity,
    },
    DeleteOne {
        filter: Criteria,
    },
    DeleteMany {
        filter: Criteria,
    },
}

/// Totals of a bulk write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkWriteResult {
    pub inserted: u64,
    pub modified: u64,
    pub deleted: u64,
    pub upserted: u64,
    /// `_id`s of every inserted, modified or deleted document
    pub affected_ids: Vec<String>,
}

/// Native operations of a document backend
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, collection: &str, query: &DocumentQuery) -> DataResult<Vec<Entity>>;

    /// Insert a document, assigning `_id` when absent; returns the stored document
    async fn insert(&self, collection: &str, document: Entity) -> DataResult<Entity>;

    /// Atomic find-and-update by `_id`; returns the document after the update
    async fn find_and_update(
        &self,
        collection: &str,
        id: &str,
        update: Entity,
        mode: UpdateMode,
        upsert: bool,
    ) -> DataResult<Option<Entity>>;

    /// Atomic find-and-delete by `_id`; returns the removed document
    async fn find_and_delete(&self, collection: &str, id: &str) -> DataResult<Option<Entity>>;

    async fn count(&self, collection: &str, filter: &Criteria) -> DataResult<u64>;

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> DataResult<Vec<Value>>;

    /// Apply every operation or none of them
    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<BulkOperation>,
    ) -> DataResult<BulkWriteResult>;
}

/// `_id` of a document as a string
pub fn document_id(document: &Entity) -> Option<String> {
    match document.get(ID_FIELD)? {
        Value::String(id) => Some(id.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
