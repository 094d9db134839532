//! # In-Memory Document Store
//!
//! Process-local [`DocumentStore`] with the query surface of a document
//! database: filters, projection, populate, sort/skip/limit, aggregation
//! pipelines and all-or-nothing bulk writes. Every method holds the lock
//! only for synchronous work, so single operations are atomic.

use super::pipeline::run_pipeline;
use super::store::{document_id, BulkOperation, BulkWriteResult, DocumentQuery, DocumentStore, ID_FIELD};
use crate::core::error::{DataError, DataResult};
use crate::core::types::{Criteria, Entity, Populate, SortDirection, UpdateMode};
use crate::repository::criteria::{compare_values, lookup, matches_all, parse_criteria, Condition};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// In-memory document store
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Entity>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection`
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn matching(&self, collection: &str, id: Option<&str>, conditions: &[Condition]) -> Vec<Entity> {
        self.collections
            .read()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| id.map_or(true, |id| has_id(doc, id)))
                    .filter(|doc| matches_all(conditions, doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn populate(&self, documents: &mut [Entity], populate: &[Populate]) {
        if populate.is_empty() {
            return;
        }

        let collections = self.collections.read();
        for spec in populate {
            let related = collections.get(&spec.from);
            let resolve = |id: &Value| -> Option<Value> {
                let id = match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                related?
                    .iter()
                    .find(|doc| document_id(doc).as_deref() == Some(id.as_str()))
                    .map(|doc| Value::Object(project(doc.clone(), spec.select.as_deref())))
            };

            for doc in documents.iter_mut() {
                let Some(current) = doc.get(&spec.field) else {
                    continue;
                };
                let expanded = match current {
                    Value::Array(ids) => Value::Array(ids.iter().filter_map(&resolve).collect()),
                    Value::Null => Value::Null,
                    id => resolve(id).unwrap_or(Value::Null),
                };
                doc.insert(spec.field.clone(), expanded);
            }
        }
    }
}

/// Keep `fields` (plus `_id`), or everything when there is no projection
fn project(document: Entity, fields: Option<&[String]>) -> Entity {
    let Some(fields) = fields.filter(|f| !f.is_empty()) else {
        return document;
    };
    document
        .into_iter()
        .filter(|(field, _)| field == ID_FIELD || fields.iter().any(|f| f == field))
        .collect()
}

static NULL: Value = Value::Null;

fn sort_documents(documents: &mut [Entity], query: &DocumentQuery) {
    if query.sort.is_empty() {
        return;
    }
    documents.sort_by(|a, b| {
        for key in &query.sort {
            let left = lookup(a, &key.field).unwrap_or(&NULL);
            let right = lookup(b, &key.field).unwrap_or(&NULL);
            let ordering = match key.direction {
                SortDirection::Asc => compare_values(left, right),
                SortDirection::Desc => compare_values(right, left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn has_id(document: &Entity, id: &str) -> bool {
    document_id(document).as_deref() == Some(id)
}

fn apply_update(document: &mut Entity, update: Entity, mode: UpdateMode) {
    let id = document.get(ID_FIELD).cloned();
    match mode {
        UpdateMode::Merge => {
            for (field, value) in update {
                if field != ID_FIELD {
                    document.insert(field, value);
                }
            }
        }
        UpdateMode::Replace => {
            *document = update;
            document.remove(ID_FIELD);
        }
    }
    if let Some(id) = id {
        document.insert(ID_FIELD.to_string(), id);
    }
}

/// Insert into `documents`, assigning `_id` when missing
fn insert_into(documents: &mut Vec<Entity>, mut document: Entity) -> DataResult<Entity> {
    let id = match document_id(&document) {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            document.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
    };

    if documents.iter().any(|doc| has_id(doc, &id)) {
        return Err(DataError::document(format!("duplicate key: _id '{}'", id)));
    }

    documents.push(document.clone());
    Ok(document)
}

fn apply_bulk(
    documents: &mut Vec<Entity>,
    operation: BulkOperation,
    result: &mut BulkWriteResult,
) -> DataResult<()> {
    match operation {
        BulkOperation::InsertOne { document } => {
            let stored = insert_into(documents, document)?;
            result.inserted += 1;
            result.affected_ids.extend(document_id(&stored));
        }
        BulkOperation::UpdateOne {
            filter,
            update,
            upsert,
        } => {
            let conditions = parse_criteria(&filter)?;
            match documents.iter_mut().find(|doc| matches_all(&conditions, doc)) {
                Some(doc) => {
                    apply_update(doc, update, UpdateMode::Merge);
                    result.modified += 1;
                    result.affected_ids.extend(document_id(doc));
                }
                None if upsert => {
                    // Equality fields of the filter seed the new document
                    let mut seed: Entity = filter
                        .into_iter()
                        .filter(|(_, value)| !value.is_object() && !value.is_array())
                        .collect();
                    apply_update(&mut seed, update, UpdateMode::Merge);
                    let stored = insert_into(documents, seed)?;
                    result.upserted += 1;
                    result.affected_ids.extend(document_id(&stored));
                }
                None => {}
            }
        }
        BulkOperation::UpdateMany { filter, update } => {
            let conditions = parse_criteria(&filter)?;
            for doc in documents
                .iter_mut()
                .filter(|doc| matches_all(&conditions, doc))
            {
                apply_update(doc, update.clone(), UpdateMode::Merge);
                result.modified += 1;
                result.affected_ids.extend(document_id(doc));
            }
        }
        BulkOperation::DeleteOne { filter } => {
            let conditions = parse_criteria(&filter)?;
            if let Some(position) = documents
                .iter()
                .position(|doc| matches_all(&conditions, doc))
            {
                let removed = documents.remove(position);
                result.deleted += 1;
                result.affected_ids.extend(document_id(&removed));
            }
        }
        BulkOperation::DeleteMany { filter } => {
            let conditions = parse_criteria(&filter)?;
            let mut kept = Vec::with_capacity(documents.len());
            for doc in documents.drain(..) {
                if matches_all(&conditions, &doc) {
                    result.deleted += 1;
                    result.affected_ids.extend(document_id(&doc));
                } else {
                    kept.push(doc);
                }
            }
            *documents = kept;
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find(&self, collection: &str, query: &DocumentQuery) -> DataResult<Vec<Entity>> {
        let conditions = parse_criteria(&query.filter)?;
        let mut documents = self.matching(collection, query.id.as_deref(), &conditions);

        sort_documents(&mut documents, query);

        let skip = query.skip.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let mut documents: Vec<Entity> = documents.into_iter().skip(skip).take(limit).collect();

        self.populate(&mut documents, &query.populate);

        Ok(documents
            .into_iter()
            .map(|doc| project(doc, query.projection.as_deref()))
            .collect())
    }

    async fn insert(&self, collection: &str, document: Entity) -> DataResult<Entity> {
        let mut collections = self.collections.write();
        let documents = collections.entry(collection.to_string()).or_default();
        let stored = insert_into(documents, document)?;
        debug!(collection, id = ?document_id(&stored), "Inserted document");
        Ok(stored)
    }

    async fn find_and_update(
        &self,
        collection: &str,
        id: &str,
        update: Entity,
        mode: UpdateMode,
        upsert: bool,
    ) -> DataResult<Option<Entity>> {
        let mut collections = self.collections.write();
        let documents = collections.entry(collection.to_string()).or_default();

        if let Some(doc) = documents.iter_mut().find(|doc| has_id(doc, id)) {
            apply_update(doc, update, mode);
            return Ok(Some(doc.clone()));
        }

        if !upsert {
            return Ok(None);
        }

        let mut document = Entity::new();
        document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        apply_update(&mut document, update, mode);
        insert_into(documents, document).map(Some)
    }

    async fn find_and_delete(&self, collection: &str, id: &str) -> DataResult<Option<Entity>> {
        let mut collections = self.collections.write();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(None);
        };
        Ok(documents
            .iter()
            .position(|doc| has_id(doc, id))
            .map(|position| documents.remove(position)))
    }

    async fn count(&self, collection: &str, filter: &Criteria) -> DataResult<u64> {
        let conditions = parse_criteria(filter)?;
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|doc| matches_all(&conditions, doc)).count())
            .unwrap_or(0) as u64)
    }

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> DataResult<Vec<Value>> {
        let documents: Vec<Value> = self
            .collections
            .read()
            .get(collection)
            .map(|docs| docs.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default();
        run_pipeline(documents, pipeline)
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<BulkOperation>,
    ) -> DataResult<BulkWriteResult> {
        let mut collections = self.collections.write();
        let mut working = collections.get(collection).cloned().unwrap_or_default();
        let mut result = BulkWriteResult::default();

        for operation in operations {
            apply_bulk(&mut working, operation, &mut result)?;
        }

        collections.insert(collection.to_string(), working);
        debug!(
            collection,
            inserted = result.inserted,
            modified = result.modified,
            deleted = result.deleted,
            "Bulk write applied"
        );
        Ok(result)
    }
}
