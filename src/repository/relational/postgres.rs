//! PostgreSQL connection pool over sqlx.
//!
//! Rows come back as JSON objects: statements that produce rows are wrapped
//! as `WITH t AS (<statement>) SELECT row_to_json(t)::jsonb FROM t`, so the
//! repository never needs to know column types.

use super::pool::{ConnectionPool, QueryOutput, SqlConnection};
use super::sql_builder::{quote_ident, ColumnTypes, SqlValue};
use crate::core::config::DatabaseConfig;
use crate::core::error::{DataError, DataResult};
use crate::core::types::Entity;
use crate::observability::mask_password;
use async_trait::async_trait;
use serde_json::Value;
use sqlx_core::executor::Executor;
use sqlx_core::pool::{PoolConnection, PoolOptions};
use sqlx_core::query::Query;
use sqlx_core::query_as::QueryAs;
use sqlx_postgres::{PgArguments, PgPool, Postgres};
use tracing::{debug, info, instrument};

/// Type alias for PostgreSQL pool options.
pub type PgPoolOptions = PoolOptions<Postgres>;

fn map_sqlx(error: sqlx_core::error::Error) -> DataError {
    match error {
        sqlx_core::error::Error::PoolTimedOut => DataError::PoolTimeout,
        other => DataError::Database(other),
    }
}

/// Statements whose rows should be read back
fn returns_rows(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    upper.starts_with("SELECT")
        || upper.starts_with("WITH")
        || upper.starts_with("VALUES")
        || upper.contains(" RETURNING ")
}

trait BindParams {
    fn bind_params(self, params: &[SqlValue]) -> Self;
}

impl<'q> BindParams for QueryAs<'q, Postgres, (Value,), PgArguments> {
    fn bind_params(mut self, params: &[SqlValue]) -> Self {
        for param in params {
            self = match param {
                SqlValue::Text(s) => self.bind(s.clone()),
                SqlValue::Integer(i) => self.bind(*i),
                SqlValue::Float(f) => self.bind(*f),
                SqlValue::Boolean(b) => self.bind(*b),
                SqlValue::Json(v) => self.bind(v.clone()),
                SqlValue::Null => self.bind(None::<String>),
            };
        }
        self
    }
}

impl<'q> BindParams for Query<'q, Postgres, PgArguments> {
    fn bind_params(mut self, params: &[SqlValue]) -> Self {
        for param in params {
            self = match param {
                SqlValue::Text(s) => self.bind(s.clone()),
                SqlValue::Integer(i) => self.bind(*i),
                SqlValue::Float(f) => self.bind(*f),
                SqlValue::Boolean(b) => self.bind(*b),
                SqlValue::Json(v) => self.bind(v.clone()),
                SqlValue::Null => self.bind(None::<String>),
            };
        }
        self
    }
}

const COLUMN_TYPES_SQL: &str = "SELECT column_name, data_type, udt_schema, udt_name \
     FROM information_schema.columns \
     WHERE table_name = $1 AND table_schema = COALESCE($2, current_schema())";

/// Castable type name for one `information_schema.columns` row.
///
/// `data_type` names built-in types directly. Enums and domains report
/// `USER-DEFINED` and arrays report `ARRAY`; both are rebuilt from the
/// underlying `udt_*` name.
fn cast_type(row: &Entity) -> Option<(String, String)> {
    let field = |name: &str| row.get(name).and_then(|v| v.as_str());
    let column = field("column_name")?;
    let data_type = field("data_type")?;

    let sql_type = match data_type {
        "USER-DEFINED" => format!(
            "{}.{}",
            quote_ident(field("udt_schema")?),
            quote_ident(field("udt_name")?)
        ),
        "ARRAY" => {
            let element = field("udt_name")?.strip_prefix('_')?;
            format!("{}[]", quote_ident(element))
        }
        other => other.to_string(),
    };
    Some((column.to_string(), sql_type))
}

async fn run<'c, E>(executor: E, sql: &str, params: &[SqlValue]) -> DataResult<QueryOutput>
where
    E: Executor<'c, Database = Postgres>,
{
    debug!(sql, params = params.len(), "Executing statement");

    if returns_rows(sql) {
        let wrapped = format!("WITH t AS ({}) SELECT row_to_json(t)::jsonb FROM t", sql);
        let rows: Vec<(Value,)> = sqlx_core::query_as::query_as::<Postgres, (Value,)>(&wrapped)
            .bind_params(params)
            .fetch_all(executor)
            .await
            .map_err(map_sqlx)?;

        let rows: Vec<_> = rows
            .into_iter()
            .filter_map(|(row,)| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        let rows_affected = rows.len() as u64;
        return Ok(QueryOutput {
            rows,
            rows_affected,
        });
    }

    let result = sqlx_core::query::query::<Postgres>(sql)
        .bind_params(params)
        .execute(executor)
        .await
        .map_err(map_sqlx)?;

    Ok(QueryOutput {
        rows: Vec::new(),
        rows_affected: result.rows_affected(),
    })
}

/// Shared PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgConnectionPool {
    pool: PgPool,
}

impl PgConnectionPool {
    /// Creates a new PostgreSQL connection pool from the given configuration.
    #[instrument(skip(config), fields(url = tracing::field::Empty))]
    pub async fn connect(config: &DatabaseConfig) -> DataResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| DataError::config("database.url is not set"))?;
        tracing::Span::current().record("url", mask_password(url).as_str());

        info!(
            pool_size = config.pool_size,
            min_connections = ?config.min_connections,
            connect_timeout_ms = config.connect_timeout.as_millis() as u64,
            "Creating PostgreSQL connection pool"
        );

        let min_connections = config
            .min_connections
            .unwrap_or(config.pool_size / 4)
            .max(1)
            .min(config.pool_size);

        let mut options = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .min_connections(min_connections)
            .acquire_timeout(config.connect_timeout)
            .test_before_acquire(false);

        if let Some(idle_timeout) = config.idle_timeout {
            options = options.idle_timeout(idle_timeout);
        }
        if let Some(max_lifetime) = config.max_lifetime {
            options = options.max_lifetime(max_lifetime);
        }

        let pool = options.connect(url).await.map_err(map_sqlx)?;
        debug!("PostgreSQL connection pool created successfully");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> bool {
        sqlx_core::query::query::<Postgres>("SELECT 1")
            .execute(&self.pool)
            .await
            .is_ok()
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL connection pool closed");
    }
}

/// One checked-out PostgreSQL connection
#[derive(Debug)]
pub struct PgSqlConnection {
    connection: PoolConnection<Postgres>,
}

#[async_trait]
impl SqlConnection for PgSqlConnection {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> DataResult<QueryOutput> {
        run(&mut *self.connection, sql, params).await
    }
}

#[async_trait]
impl ConnectionPool for PgConnectionPool {
    type Connection = PgSqlConnection;

    async fn query(&self, sql: &str, params: &[SqlValue]) -> DataResult<QueryOutput> {
        run(&self.pool, sql, params).await
    }

    async fn acquire(&self) -> DataResult<Self::Connection> {
        let connection = self.pool.acquire().await.map_err(map_sqlx)?;
        Ok(PgSqlConnection { connection })
    }

    async fn release(&self, connection: Self::Connection) {
        // Dropping a PoolConnection returns it to the pool
        drop(connection);
    }

    #[instrument(skip(self))]
    async fn column_types(&self, table: &str) -> DataResult<ColumnTypes> {
        let (schema, name) = match table.split_once('.') {
            Some((schema, name)) => (SqlValue::Text(schema.to_string()), name),
            None => (SqlValue::Null, table),
        };
        let output = run(
            &self.pool,
            COLUMN_TYPES_SQL,
            &[SqlValue::Text(name.to_string()), schema],
        )
        .await?;

        Ok(output.rows.iter().filter_map(cast_type).collect())
    }
}
