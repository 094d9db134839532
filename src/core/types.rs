//! # Core Types
//!
//! Entities, criteria and the option structs shared by every repository.
//!
//! Entities are untyped: the caller owns the shape, the data layer only moves
//! field maps between the cache and the backends.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One record of a collection or table
pub type Entity = Map<String, Value>;

/// Predicate description: field name to scalar, null, array or operator map
pub type Criteria = Map<String, Value>;

/// Sort direction for a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One `ORDER BY` component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// Relation expansion for the document backend
///
/// `field` holds an id (or array of ids) of documents in `from`; the expanded
/// documents replace the ids in the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Populate {
    pub field: String,
    pub from: String,
    /// Optional projection applied to the expanded documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,
}

/// Result shaping for read operations
///
/// Everything except `use_cache` is part of the cache key, so two calls that
/// shape results differently never share a cache entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Field projection; `None` returns every field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Rows to skip (`OFFSET` / `skip`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,

    /// Document backend only; ignored by the relational repository
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub populate: Vec<Populate>,

    /// Per-call cache opt-out; `None` falls back to the repository setting
    #[serde(skip)]
    pub use_cache: Option<bool>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn sort_by<S: Into<String>>(mut self, field: S, direction: SortDirection) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn populate<F: Into<String>, C: Into<String>>(mut self, field: F, from: C) -> Self {
        self.populate.push(Populate {
            field: field.into(),
            from: from.into(),
            select: None,
        });
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = Some(use_cache);
        self
    }

    /// True when the options only carry the cache flag
    pub fn is_unshaped(&self) -> bool {
        self.select.is_none()
            && self.sort.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
            && self.populate.is_empty()
    }
}

/// What an insert or update hands back (relational backend)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Returning {
    #[default]
    Row,
    PrimaryKey,
}

/// How `update` combines the stored document with the new data (document backend)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Overwrite only the supplied fields
    #[default]
    Merge,
    /// Swap the whole document, keeping its id
    Replace,
}

/// Flags for `create`, `update` and `delete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Per-call override of the repository cache setting
    pub use_cache: Option<bool>,
    /// Run the configured entity validator before writing
    pub validate: bool,
    pub returning: Returning,
    /// Return the deleted entity from `delete`
    pub return_deleted: bool,
    pub update_mode: UpdateMode,
    /// Insert when `update` matches nothing (document backend)
    pub upsert: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            use_cache: None,
            validate: true,
            returning: Returning::Row,
            return_deleted: false,
            update_mode: UpdateMode::Merge,
            upsert: false,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returning(mut self, returning: Returning) -> Self {
        self.returning = returning;
        self
    }

    pub fn return_deleted(mut self) -> Self {
        self.return_deleted = true;
        self
    }

    pub fn replace(mut self) -> Self {
        self.update_mode = UpdateMode::Replace;
        self
    }

    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    pub fn skip_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = Some(use_cache);
        self
    }
}

/// Result of a delete
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteOutcome {
    pub deleted: bool,
    /// Populated only when `WriteOptions::return_deleted` was requested
    pub entity: Option<Entity>,
}

impl DeleteOutcome {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Build an entity from a `serde_json::json!` object literal.
///
/// Non-object values produce an empty entity.
pub fn entity(value: Value) -> Entity {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
