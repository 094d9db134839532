//! Connection pool seam for the relational repository.

use super::sql_builder::{ColumnTypes, SqlValue};
use crate::core::error::DataResult;
use crate::core::types::Entity;
use async_trait::async_trait;

/// Rows returned by a statement plus the affected-row count
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Entity>,
    pub rows_affected: u64,
}

impl QueryOutput {
    pub fn first(self) -> Option<Entity> {
        self.rows.into_iter().next()
    }
}

/// A single pooled connection, used inside transactions
#[async_trait]
pub trait SqlConnection: Send {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> DataResult<QueryOutput>;
}

/// Process-wide pool of relational connections
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    type Connection: SqlConnection;

    /// Run one statement on any free connection
    async fn query(&self, sql: &str, params: &[SqlValue]) -> DataResult<QueryOutput>;

    /// Check out a connection; pool exhaustion past the acquire timeout is an error
    async fn acquire(&self) -> DataResult<Self::Connection>;

    /// Hand a connection back to the pool
    async fn release(&self, connection: Self::Connection);

    /// SQL type of each column of `table`, used to cast bound parameters.
    /// Pools that cannot describe tables return an empty map and parameters
    /// are sent uncast.
    async fn column_types(&self, _table: &str) -> DataResult<ColumnTypes> {
        Ok(ColumnTypes::new())
    }
}
