//! Structured criteria.
//!
//! A criteria map is parsed once into [`Condition`]s. The relational builder
//! renders them to SQL, the in-memory document store evaluates them directly.
//!
//! Value forms per field:
//! - scalar: equality
//! - `null`: IS NULL
//! - array: membership
//! - operator map: `{"$gt": 18, "$lt": 65}`; every entry becomes its own
//!   condition. Unknown operators are rejected.

use crate::core::error::{DataError, DataResult};
use crate::core::types::Criteria;
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::OnceLock;

/// Comparison operators accepted inside an operator map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Ne,
    Like,
    ILike,
}

impl CompareOp {
    /// Accepts `$gt`-style names and the symbolic forms (`>`, `>=`, `<`, `<=`, `!=`)
    pub fn from_operator(operator: &str) -> Option<Self> {
        match operator {
            "$gt" | ">" => Some(Self::Gt),
            "$gte" | ">=" => Some(Self::Gte),
            "$lt" | "<" => Some(Self::Lt),
            "$lte" | "<=" => Some(Self::Lte),
            "$ne" | "!=" | "<>" => Some(Self::Ne),
            "$like" => Some(Self::Like),
            "$ilike" => Some(Self::ILike),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Ne => "<>",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
        }
    }
}

/// Predicate over a single field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPredicate {
    Eq(Value),
    IsNull,
    NotNull,
    In(Vec<Value>),
    Compare(CompareOp, Value),
}

/// One field predicate; a criteria map is the conjunction of its conditions
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub predicate: FieldPredicate,
}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").ok())
        .as_ref()
}

/// Field, column and table names: `[A-Za-z_][A-Za-z0-9_]*`, dot-separated
pub fn validate_identifier(name: &str) -> DataResult<()> {
    if identifier_pattern().is_some_and(|re| re.is_match(name)) {
        Ok(())
    } else {
        Err(DataError::invalid_criteria(format!(
            "'{}' is not a valid field name",
            name
        )))
    }
}

/// Parse criteria into conditions. Fails before any I/O on an unknown
/// operator or a malformed field name.
pub fn parse_criteria(criteria: &Criteria) -> DataResult<Vec<Condition>> {
    let mut conditions = Vec::with_capacity(criteria.len());

    for (field, value) in criteria {
        validate_identifier(field)?;

        match value {
            Value::Null => conditions.push(Condition {
                field: field.clone(),
                predicate: FieldPredicate::IsNull,
            }),
            Value::Array(items) => conditions.push(Condition {
                field: field.clone(),
                predicate: FieldPredicate::In(items.clone()),
            }),
            Value::Object(operators) => parse_operator_map(field, operators, &mut conditions)?,
            scalar => conditions.push(Condition {
                field: field.clone(),
                predicate: FieldPredicate::Eq(scalar.clone()),
            }),
        }
    }

    Ok(conditions)
}

fn parse_operator_map(
    field: &str,
    operators: &Map<String, Value>,
    conditions: &mut Vec<Condition>,
) -> DataResult<()> {
    if operators.is_empty() {
        return Err(DataError::invalid_criteria(format!(
            "empty operator map for field '{}'",
            field
        )));
    }

    for (operator, operand) in operators {
        let predicate = if operator == "$in" {
            match operand {
                Value::Array(items) => FieldPredicate::In(items.clone()),
                _ => {
                    return Err(DataError::invalid_criteria(format!(
                        "$in on field '{}' expects an array",
                        field
                    )))
                }
            }
        } else {
            let op = CompareOp::from_operator(operator)
                .ok_or_else(|| DataError::unsupported_operator(field, operator.as_str()))?;
            match (op, operand) {
                (CompareOp::Ne, Value::Null) => FieldPredicate::NotNull,
                (CompareOp::Like | CompareOp::ILike, Value::String(_)) => {
                    FieldPredicate::Compare(op, operand.clone())
                }
                (CompareOp::Like | CompareOp::ILike, _) => {
                    return Err(DataError::invalid_criteria(format!(
                        "{} on field '{}' expects a string pattern",
                        operator, field
                    )))
                }
                (_, Value::Object(_) | Value::Array(_)) => {
                    return Err(DataError::invalid_criteria(format!(
                        "{} on field '{}' expects a scalar",
                        operator, field
                    )))
                }
                _ => FieldPredicate::Compare(op, operand.clone()),
            }
        };

        conditions.push(Condition {
            field: field.to_string(),
            predicate,
        });
    }

    Ok(())
}

/// Resolve a dotted path inside a document
pub fn lookup<'a>(document: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Equality with numbers compared by value (`1 == 1.0`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order used for sorting: null < numbers < strings < objects < arrays < booleans
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Ordering for range operators; `None` when the values are not comparable
fn range_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// SQL `LIKE` pattern (`%`, `_`) as an anchored regex
pub fn like_to_regex(pattern: &str, case_insensitive: bool) -> Option<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    if case_insensitive {
        expr.push_str("(?i)");
    }
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

impl Condition {
    /// Evaluate against a document
    pub fn matches(&self, document: &Map<String, Value>) -> bool {
        let actual = lookup(document, &self.field);

        match &self.predicate {
            FieldPredicate::IsNull => matches!(actual, None | Some(Value::Null)),
            FieldPredicate::NotNull => !matches!(actual, None | Some(Value::Null)),
            FieldPredicate::Eq(expected) => match actual {
                // Array fields match when any element does
                Some(Value::Array(items)) if !expected.is_array() => {
                    items.iter().any(|item| values_equal(item, expected))
                }
                Some(value) => values_equal(value, expected),
                None => false,
            },
            FieldPredicate::In(candidates) => match actual {
                Some(value) => candidates.iter().any(|c| values_equal(value, c)),
                None => candidates.iter().any(Value::is_null),
            },
            FieldPredicate::Compare(op, expected) => {
                let Some(value) = actual else {
                    return false;
                };
                match op {
                    CompareOp::Ne => !values_equal(value, expected),
                    CompareOp::Like | CompareOp::ILike => {
                        match (value.as_str(), expected.as_str()) {
                            (Some(text), Some(pattern)) => {
                                like_to_regex(pattern, *op == CompareOp::ILike)
                                    .map(|re| re.is_match(text))
                                    .unwrap_or(false)
                            }
                            _ => false,
                        }
                    }
                    CompareOp::Gt => range_compare(value, expected) == Some(Ordering::Greater),
                    CompareOp::Gte => matches!(
                        range_compare(value, expected),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                    CompareOp::Lt => range_compare(value, expected) == Some(Ordering::Less),
                    CompareOp::Lte => matches!(
                        range_compare(value, expected),
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                }
            }
        }
    }
}

/// True when every condition holds
pub fn matches_all(conditions: &[Condition], document: &Map<String, Value>) -> bool {
    conditions.iter().all(|c| c.matches(document))
}
