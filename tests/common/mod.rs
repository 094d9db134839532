//! Fakes shared by the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use newsroom_data::caching::{CacheClient, CacheError, CacheResult, CacheStore, InMemoryCache};
use newsroom_data::core::error::{DataError, DataResult};
use newsroom_data::core::types::{Criteria, Entity, UpdateMode};
use newsroom_data::repository::document::{
    BulkOperation, BulkWriteResult, DocumentQuery, DocumentStore, InMemoryDocumentStore,
};
use newsroom_data::repository::relational::{
    ColumnTypes, ConnectionPool, QueryOutput, SqlConnection, SqlValue,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cache client over a fresh in-memory store, plus the store for inspection
pub fn memory_cache() -> (Arc<CacheClient>, InMemoryCache) {
    let store = InMemoryCache::new();
    (Arc::new(CacheClient::new(Arc::new(store.clone()))), store)
}

/// In-memory document store that counts backend reads
#[derive(Default)]
pub struct CountingDocumentStore {
    inner: InMemoryDocumentStore,
    reads: AtomicUsize,
}

impl CountingDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for CountingDocumentStore {
    async fn find(&self, collection: &str, query: &DocumentQuery) -> DataResult<Vec<Entity>> {
        self.read();
        self.inner.find(collection, query).await
    }

    async fn insert(&self, collection: &str, document: Entity) -> DataResult<Entity> {
        self.inner.insert(collection, document).await
    }

    async fn find_and_update(
        &self,
        collection: &str,
        id: &str,
        update: Entity,
        mode: UpdateMode,
        upsert: bool,
    ) -> DataResult<Option<Entity>> {
        self.inner
            .find_and_update(collection, id, update, mode, upsert)
            .await
    }

    async fn find_and_delete(&self, collection: &str, id: &str) -> DataResult<Option<Entity>> {
        self.inner.find_and_delete(collection, id).await
    }

    async fn count(&self, collection: &str, filter: &Criteria) -> DataResult<u64> {
        self.read();
        self.inner.count(collection, filter).await
    }

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> DataResult<Vec<Value>> {
        self.read();
        self.inner.aggregate(collection, pipeline).await
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<BulkOperation>,
    ) -> DataResult<BulkWriteResult> {
        self.inner.bulk_write(collection, operations).await
    }
}

/// Shared state of a [`RecordingPool`] and its connections
#[derive(Default)]
struct Recorder {
    statements: Mutex<Vec<(String, Vec<SqlValue>)>>,
    responses: Mutex<VecDeque<DataResult<QueryOutput>>>,
    column_types: Mutex<ColumnTypes>,
    column_lookups: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl Recorder {
    fn record(&self, sql: &str, params: &[SqlValue]) -> DataResult<QueryOutput> {
        self.statements
            .lock()
            .push((sql.to_string(), params.to_vec()));

        if matches!(sql, "BEGIN" | "COMMIT" | "ROLLBACK") {
            return Ok(QueryOutput::default());
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(QueryOutput::default()))
    }
}

/// Connection pool that records every statement and answers from a queue.
///
/// Transaction control statements always succeed; everything else takes the
/// next queued response, or an empty result when the queue is empty.
#[derive(Clone, Default)]
pub struct RecordingPool {
    recorder: Arc<Recorder>,
}

impl RecordingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue rows for the next data statement
    pub fn respond_rows(&self, rows: Vec<Entity>) {
        let rows_affected = rows.len() as u64;
        self.recorder.responses.lock().push_back(Ok(QueryOutput {
            rows,
            rows_affected,
        }));
    }

    /// Queue an affected-row count with no rows
    pub fn respond_affected(&self, rows_affected: u64) {
        self.recorder.responses.lock().push_back(Ok(QueryOutput {
            rows: Vec::new(),
            rows_affected,
        }));
    }

    pub fn respond_error(&self, error: DataError) {
        self.recorder.responses.lock().push_back(Err(error));
    }

    /// Describe the table's columns to repositories built on this pool
    pub fn with_column_types(self, types: &[(&str, &str)]) -> Self {
        *self.recorder.column_types.lock() = types
            .iter()
            .map(|(column, sql_type)| (column.to_string(), sql_type.to_string()))
            .collect();
        self
    }

    pub fn column_lookups(&self) -> usize {
        self.recorder.column_lookups.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.recorder.statements.lock().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|(sql, _)| sql).collect()
    }

    pub fn acquired(&self) -> usize {
        self.recorder.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.recorder.released.load(Ordering::SeqCst)
    }
}

pub struct RecordingConnection {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl SqlConnection for RecordingConnection {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> DataResult<QueryOutput> {
        self.recorder.record(sql, params)
    }
}

#[async_trait]
impl ConnectionPool for RecordingPool {
    type Connection = RecordingConnection;

    async fn query(&self, sql: &str, params: &[SqlValue]) -> DataResult<QueryOutput> {
        self.recorder.record(sql, params)
    }

    async fn acquire(&self) -> DataResult<RecordingConnection> {
        self.recorder.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(RecordingConnection {
            recorder: self.recorder.clone(),
        })
    }

    async fn release(&self, _connection: RecordingConnection) {
        self.recorder.released.fetch_add(1, Ordering::SeqCst);
    }

    async fn column_types(&self, _table: &str) -> DataResult<ColumnTypes> {
        self.recorder.column_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.recorder.column_types.lock().clone())
    }
}

/// Cache store whose every operation fails
#[derive(Debug, Default)]
pub struct FailingCacheStore {
    calls: AtomicUsize,
}

impl FailingCacheStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> CacheResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable)
    }
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> CacheResult<()> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        self.fail()
    }

    async fn exists(&self, _key: &str) -> CacheResult<bool> {
        self.fail()
    }

    async fn increment(&self, _key: &str) -> CacheResult<i64> {
        self.fail()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> CacheResult<bool> {
        self.fail()
    }

    async fn ttl(&self, _key: &str) -> CacheResult<Option<Duration>> {
        self.fail()
    }

    async fn health_check(&self) -> CacheResult<bool> {
        self.fail()
    }
}
