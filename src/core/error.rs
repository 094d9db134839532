//! # Error Handling Module
//!
//! Error types for the data-access layer, built on `thiserror`.
//!
//! The taxonomy follows how failures are treated by callers:
//! - Backend failures (constraint violations, lost connections, pool timeouts)
//!   are fatal for the current call and propagate unmodified.
//! - Malformed criteria are rejected at query-build time, before any I/O.
//! - Cache failures never show up here on a read/write path. The cache client
//!   logs and swallows them; `DataError::Cache` only appears while constructing
//!   a store at startup.
//! - "Not found" is not an error. Lookups return `Option::None`.

use crate::caching::CacheError;
use thiserror::Error;

/// Result type used throughout the data layer
pub type DataResult<T> = Result<T, DataError>;

/// Errors surfaced by repositories, the rate limiter and configuration loading
#[derive(Debug, Error)]
pub enum DataError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A criteria operator outside the supported set
    #[error("Unsupported criteria operator '{operator}' on field '{field}'")]
    UnsupportedOperator { field: String, operator: String },

    /// Criteria that cannot be turned into a predicate (bad field name, wrong value shape)
    #[error("Invalid criteria: {message}")]
    InvalidCriteria { message: String },

    /// Rejected by the entity validator; the message is passed through untouched
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Document backend failure
    #[error("Document store error: {message}")]
    Document { message: String },

    /// Relational backend failure, propagated as the driver reported it
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::error::Error),

    /// The backend answered, but not with what the statement promised
    #[error("Query error: {message}")]
    Query { message: String },

    /// No pooled connection became available before the acquire timeout
    #[error("Timed out waiting for a database connection")]
    PoolTimeout,

    /// Transaction bookkeeping failure (begin/commit could not be issued)
    #[error("Transaction error: {message}")]
    Transaction { message: String },

    /// JSON (de)serialization failure outside the cache path
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cache store construction failure
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// I/O errors (config files, signals)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unsupported-operator error
    pub fn unsupported_operator<F: Into<String>, O: Into<String>>(field: F, operator: O) -> Self {
        Self::UnsupportedOperator {
            field: field.into(),
            operator: operator.into(),
        }
    }

    /// Create an invalid-criteria error
    pub fn invalid_criteria<S: Into<String>>(message: S) -> Self {
        Self::InvalidCriteria {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a document store error
    pub fn document<S: Into<String>>(message: S) -> Self {
        Self::Document {
            message: message.into(),
        }
    }

    /// Create a query error
    pub fn query<S: Into<String>>(message: S) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction<S: Into<String>>(message: S) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// True for errors raised while building a query, before any I/O happened
    pub fn is_query_build_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedOperator { .. } | Self::InvalidCriteria { .. }
        )
    }

    /// Error category for structured logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::UnsupportedOperator { .. } | Self::InvalidCriteria { .. } => "criteria",
            Self::Validation { .. } => "validation",
            Self::Document { .. } => "document_store",
            Self::Database(_) | Self::Query { .. } | Self::PoolTimeout => "database",
            Self::Transaction { .. } => "transaction",
            Self::Serialization(_) => "serialization",
            Self::Cache(_) => "cache",
            Self::Io(_) => "io",
        }
    }
}
