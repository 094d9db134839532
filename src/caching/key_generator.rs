//! # Cache Key Generator
//!
//! Deterministic cache keys for entity lookups and queries.
//!
//! Keys are namespaced as `<backend>:<collection>:` followed by either
//! `id:<entity id>` or `query:<canonical json>`. Object keys are sorted at
//! every nesting level before encoding, so two structurally equal criteria
//! objects always map to the same key no matter how their fields were
//! inserted.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Write;

/// Encode a JSON value with object keys sorted recursively.
///
/// Arrays keep their order; it is significant for sort specs and pipelines.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        Value::Number(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
    }
}

fn write_string(s: &str, out: &mut String) {
    // serde_json handles escaping; a plain string cannot fail to serialize
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}

/// `<prefix>id:<identifier>` for plain strings, `<prefix>query:<canonical json>` otherwise
pub fn key_for(prefix: &str, identifier: &Value) -> String {
    match identifier {
        Value::String(id) => format!("{}id:{}", prefix, id),
        other => format!("{}query:{}", prefix, canonical_json(other)),
    }
}

#[derive(Serialize)]
struct OperationKey<'a, C: ?Sized, O: ?Sized> {
    op: &'a str,
    criteria: &'a C,
    options: &'a O,
}

/// Key builder bound to one backend and collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyCodec {
    prefix: String,
}

impl CacheKeyCodec {
    /// Codec for `<backend>:<collection>:` keys
    pub fn new(backend: &str, collection: &str) -> Self {
        Self {
            prefix: format!("{}:{}:", backend, collection),
        }
    }

    /// Codec with an explicit prefix, used as-is
    pub fn with_prefix<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key_for(&self, identifier: &Value) -> String {
        key_for(&self.prefix, identifier)
    }

    pub fn id_key(&self, id: &str) -> String {
        format!("{}id:{}", self.prefix, id)
    }

    /// Key for a query description; anything serializable to JSON works.
    /// A description that fails to serialize is encoded as `null`.
    pub fn query_key<T: Serialize + ?Sized>(&self, description: &T) -> String {
        let value = serde_json::to_value(description).unwrap_or(Value::Null);
        format!("{}query:{}", self.prefix, canonical_json(&value))
    }

    /// Key of an operation over criteria and options
    pub fn operation_key<C: Serialize + ?Sized, O: Serialize + ?Sized>(
        &self,
        operation: &str,
        criteria: &C,
        options: &O,
    ) -> String {
        self.query_key(&OperationKey {
            op: operation,
            criteria,
            options,
        })
    }

    /// The coarse collection-wide key.
    ///
    /// It is the key of the unfiltered, unshaped `find`, so deleting it forces
    /// the next "list everything" read back to the backend.
    pub fn collection_key(&self) -> String {
        self.operation_key("find", &Map::new(), &Map::new())
    }
}
