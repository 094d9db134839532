//! Aggregation pipeline evaluation for the in-memory document store.
//!
//! Supported stages: `$match`, `$sort`, `$skip`, `$limit`, `$project`,
//! `$count`, and `$group` with the `$sum`, `$avg`, `$min`, `$max` and
//! `$push` accumulators. Field references are `"$field"` strings.

use crate::caching::canonical_json;
use crate::core::error::{DataError, DataResult};
use crate::repository::criteria::{compare_values, lookup, matches_all, parse_criteria};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Run `pipeline` over `documents`
pub fn run_pipeline(mut documents: Vec<Value>, pipeline: &[Value]) -> DataResult<Vec<Value>> {
    for stage in pipeline {
        let (name, spec) = single_entry(stage)?;
        documents = match name {
            "$match" => match_stage(documents, spec)?,
            "$sort" => sort_stage(documents, spec)?,
            "$skip" => {
                let n = as_count(name, spec)?;
                documents.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = as_count(name, spec)?;
                documents.into_iter().take(n).collect()
            }
            "$project" => project_stage(documents, spec)?,
            "$count" => count_stage(documents, spec)?,
            "$group" => group_stage(documents, spec)?,
            other => {
                return Err(DataError::document(format!(
                    "unsupported pipeline stage '{}'",
                    other
                )))
            }
        };
    }
    Ok(documents)
}

fn single_entry(stage: &Value) -> DataResult<(&str, &Value)> {
    match stage.as_object() {
        Some(map) if map.len() == 1 => map
            .iter()
            .next()
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| DataError::document("empty pipeline stage")),
        _ => Err(DataError::document(
            "pipeline stage must be an object with exactly one key",
        )),
    }
}

fn as_count(stage: &str, spec: &Value) -> DataResult<usize> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| DataError::document(format!("{} expects a non-negative integer", stage)))
}

fn match_stage(documents: Vec<Value>, spec: &Value) -> DataResult<Vec<Value>> {
    let criteria = spec
        .as_object()
        .ok_or_else(|| DataError::document("$match expects an object"))?;
    let conditions = parse_criteria(criteria)?;

    Ok(documents
        .into_iter()
        .filter(|doc| {
            doc.as_object()
                .map(|map| matches_all(&conditions, map))
                .unwrap_or(false)
        })
        .collect())
}

fn sort_stage(mut documents: Vec<Value>, spec: &Value) -> DataResult<Vec<Value>> {
    let keys = spec
        .as_object()
        .ok_or_else(|| DataError::document("$sort expects an object"))?;

    let mut order = Vec::with_capacity(keys.len());
    for (field, direction) in keys {
        let descending = match direction.as_i64() {
            Some(1) => false,
            Some(-1) => true,
            _ => {
                return Err(DataError::document(format!(
                    "$sort direction for '{}' must be 1 or -1",
                    field
                )))
            }
        };
        order.push((field.as_str(), descending));
    }

    documents.sort_by(|a, b| {
        for (field, descending) in &order {
            let ordering = compare_values(field_of(a, field), field_of(b, field));
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(documents)
}

static NULL: Value = Value::Null;

fn field_of<'a>(document: &'a Value, field: &str) -> &'a Value {
    document
        .as_object()
        .and_then(|map| lookup(map, field))
        .unwrap_or(&NULL)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

fn project_stage(documents: Vec<Value>, spec: &Value) -> DataResult<Vec<Value>> {
    let fields = spec
        .as_object()
        .ok_or_else(|| DataError::document("$project expects an object"))?;

    let include_id = fields.get("_id").map(is_truthy).unwrap_or(true);
    let inclusion = fields
        .iter()
        .any(|(field, flag)| field != "_id" && is_truthy(flag));

    Ok(documents
        .into_iter()
        .map(|doc| {
            let Value::Object(map) = doc else {
                return doc;
            };
            let projected: Map<String, Value> = map
                .into_iter()
                .filter(|(field, _)| {
                    if field == "_id" {
                        include_id
                    } else if inclusion {
                        fields.get(field).map(is_truthy).unwrap_or(false)
                    } else {
                        fields.get(field).map(is_truthy).unwrap_or(true)
                    }
                })
                .collect();
            Value::Object(projected)
        })
        .collect())
}

fn count_stage(documents: Vec<Value>, spec: &Value) -> DataResult<Vec<Value>> {
    let name = spec
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DataError::document("$count expects a field name"))?;

    let mut out = Map::new();
    out.insert(name.to_string(), Value::from(documents.len() as u64));
    Ok(vec![Value::Object(out)])
}

/// `"$field"` resolves against the document, anything else is a literal
fn evaluate<'a>(expression: &'a Value, document: &'a Value) -> &'a Value {
    match expression.as_str().and_then(|s| s.strip_prefix('$')) {
        Some(field) => field_of(document, field),
        None => expression,
    }
}

#[derive(Debug)]
enum Accumulator {
    Sum { total: f64, integral: bool },
    Avg { total: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Push(Vec<Value>),
}

impl Accumulator {
    fn new(operator: &str) -> DataResult<Self> {
        Ok(match operator {
            "$sum" => Self::Sum {
                total: 0.0,
                integral: true,
            },
            "$avg" => Self::Avg {
                total: 0.0,
                count: 0,
            },
            "$min" => Self::Min(None),
            "$max" => Self::Max(None),
            "$push" => Self::Push(Vec::new()),
            other => {
                return Err(DataError::document(format!(
                    "unsupported accumulator '{}'",
                    other
                )))
            }
        })
    }

    fn add(&mut self, value: &Value) {
        match self {
            Self::Sum { total, integral } => {
                if let Value::Number(n) = value {
                    *integral &= n.is_i64() || n.is_u64();
                    *total += n.as_f64().unwrap_or(0.0);
                }
            }
            Self::Avg { total, count } => {
                if let Some(n) = value.as_f64() {
                    *total += n;
                    *count += 1;
                }
            }
            Self::Min(current) => {
                if !value.is_null()
                    && current
                        .as_ref()
                        .map_or(true, |c| compare_values(value, c) == Ordering::Less)
                {
                    *current = Some(value.clone());
                }
            }
            Self::Max(current) => {
                if !value.is_null()
                    && current
                        .as_ref()
                        .map_or(true, |c| compare_values(value, c) == Ordering::Greater)
                {
                    *current = Some(value.clone());
                }
            }
            Self::Push(values) => values.push(value.clone()),
        }
    }

    fn finish(self) -> Value {
        match self {
            Self::Sum { total, integral } if integral => Value::from(total as i64),
            Self::Sum { total, .. } => Number::from_f64(total).map(Value::Number).unwrap_or(Value::Null),
            Self::Avg { count: 0, .. } => Value::Null,
            Self::Avg { total, count } => Number::from_f64(total / count as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Min(value) | Self::Max(value) => value.unwrap_or(Value::Null),
            Self::Push(values) => Value::Array(values),
        }
    }
}

struct Group {
    id: Value,
    accumulators: Vec<(String, Accumulator)>,
}

fn group_stage(documents: Vec<Value>, spec: &Value) -> DataResult<Vec<Value>> {
    let spec = spec
        .as_object()
        .ok_or_else(|| DataError::document("$group expects an object"))?;
    let id_expression = spec
        .get("_id")
        .ok_or_else(|| DataError::document("$group requires an _id"))?;

    let mut outputs = Vec::new();
    for (name, accumulator) in spec.iter().filter(|(name, _)| *name != "_id") {
        let (operator, expression) = single_entry(accumulator)?;
        // Validate the operator once up front
        Accumulator::new(operator)?;
        outputs.push((name.clone(), operator.to_string(), expression.clone()));
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for doc in &documents {
        let id = evaluate(id_expression, doc).clone();
        let slot = match index.get(&canonical_json(&id)) {
            Some(&slot) => slot,
            None => {
                let mut accumulators = Vec::with_capacity(outputs.len());
                for (name, operator, _) in &outputs {
                    accumulators.push((name.clone(), Accumulator::new(operator)?));
                }
                index.insert(canonical_json(&id), groups.len());
                groups.push(Group { id, accumulators });
                groups.len() - 1
            }
        };

        for ((_, accumulator), (_, _, expression)) in
            groups[slot].accumulators.iter_mut().zip(&outputs)
        {
            accumulator.add(evaluate(expression, doc));
        }
    }

    Ok(groups
        .into_iter()
        .map(|group| {
            let mut out = Map::new();
            out.insert("_id".to_string(), group.id);
            for (name, accumulator) in group.accumulators {
                out.insert(name, accumulator.finish());
            }
            Value::Object(out)
        })
        .collect())
}
