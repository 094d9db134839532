//! Parameterized SQL for one table.
//!
//! Every statement is built completely, with `$n` placeholders, before it is
//! handed to a connection. Criteria errors therefore surface before any I/O.
//!
//! When the table's column types are known, each placeholder bound to a
//! column is cast to that column's type (`$1::timestamp with time zone`).
//! Strings and nulls then land in uuid, timestamp and enum columns instead
//! of being rejected as `text`.

use crate::core::error::{DataError, DataResult};
use crate::core::types::{Criteria, Entity, QueryOptions, Returning};
use crate::repository::criteria::{
    parse_criteria, validate_identifier, CompareOp, Condition, FieldPredicate,
};
use serde_json::Value;
use std::collections::HashMap;

/// Column name to the SQL type its placeholders are cast to
pub type ColumnTypes = HashMap<String, String>;

/// SQL value types for parameterized queries.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Json(Value),
    Null,
}

impl From<&Value> for SqlValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Json(other.clone()),
        }
    }
}

/// How primary key values are bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    #[default]
    Text,
    Integer,
    Uuid,
}

/// A statement ready to run
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new<S: Into<String>>(sql: S, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// `"name"`, or `"schema"."name"` for dotted names
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join(".")
}

fn placeholder(params: &mut Vec<SqlValue>, value: SqlValue) -> String {
    params.push(value);
    format!("${}", params.len())
}

/// Statement builder bound to one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlBuilder {
    table: String,
    primary_key: String,
    key_type: KeyType,
    column_types: ColumnTypes,
}

impl SqlBuilder {
    pub fn new(table: &str, primary_key: &str, key_type: KeyType) -> DataResult<Self> {
        validate_identifier(table)?;
        validate_identifier(primary_key)?;
        Ok(Self {
            table: table.to_string(),
            primary_key: primary_key.to_string(),
            key_type,
            column_types: ColumnTypes::new(),
        })
    }

    /// Cast placeholders bound to these columns to their SQL types
    pub fn with_column_types(mut self, column_types: ColumnTypes) -> Self {
        self.column_types = column_types;
        self
    }

    pub fn column_type(&self, column: &str) -> Option<&str> {
        self.column_types.get(column).map(String::as_str)
    }

    /// `$n`, cast to the column's type when it is known
    fn bind(&self, column: &str, params: &mut Vec<SqlValue>, value: SqlValue) -> String {
        let slot = placeholder(params, value);
        match self.column_type(column) {
            Some(sql_type) => format!("{}::{}", slot, sql_type),
            None => slot,
        }
    }

    fn render_condition(&self, condition: &Condition, params: &mut Vec<SqlValue>) -> String {
        let field = condition.field.as_str();
        let column = quote_ident(field);

        match &condition.predicate {
            FieldPredicate::IsNull => format!("{} IS NULL", column),
            FieldPredicate::NotNull => format!("{} IS NOT NULL", column),
            FieldPredicate::Eq(value) => {
                format!("{} = {}", column, self.bind(field, params, SqlValue::from(value)))
            }
            FieldPredicate::In(values) if values.is_empty() => "FALSE".to_string(),
            FieldPredicate::In(values) => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| self.bind(field, params, SqlValue::from(v)))
                    .collect();
                format!("{} IN ({})", column, placeholders.join(", "))
            }
            // Patterns stay text; the column is compared as text
            FieldPredicate::Compare(op @ (CompareOp::Like | CompareOp::ILike), value) => {
                let pattern = placeholder(params, SqlValue::from(value));
                match self.column_type(field) {
                    Some(_) => format!("{}::text {} {}", column, op.as_sql(), pattern),
                    None => format!("{} {} {}", column, op.as_sql(), pattern),
                }
            }
            FieldPredicate::Compare(op, value) => format!(
                "{} {} {}",
                column,
                op.as_sql(),
                self.bind(field, params, SqlValue::from(value))
            ),
        }
    }

    /// ` WHERE ...` for the criteria, or an empty string when there is nothing to filter
    pub fn where_clause(&self, criteria: &Criteria, params: &mut Vec<SqlValue>) -> DataResult<String> {
        let conditions = parse_criteria(criteria)?;
        if conditions.is_empty() {
            return Ok(String::new());
        }

        let rendered: Vec<String> = conditions
            .iter()
            .map(|c| self.render_condition(c, params))
            .collect();
        Ok(format!(" WHERE {}", rendered.join(" AND ")))
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// `"pk" = $n` with the id bound per the key type
    fn key_predicate(&self, id: &str, params: &mut Vec<SqlValue>) -> DataResult<String> {
        let column = quote_ident(&self.primary_key);
        let predicate = match self.key_type {
            KeyType::Text => format!(
                "{} = {}",
                column,
                self.bind(&self.primary_key, params, SqlValue::Text(id.to_string()))
            ),
            KeyType::Integer => {
                let value: i64 = id.parse().map_err(|_| {
                    DataError::invalid_criteria(format!(
                        "primary key '{}' is not an integer",
                        id
                    ))
                })?;
                format!(
                    "{} = {}",
                    column,
                    self.bind(&self.primary_key, params, SqlValue::Integer(value))
                )
            }
            KeyType::Uuid => format!(
                "{} = {}::uuid",
                column,
                placeholder(params, SqlValue::Text(id.to_string()))
            ),
        };
        Ok(predicate)
    }

    fn projection(options: &QueryOptions) -> DataResult<String> {
        match &options.select {
            Some(fields) if !fields.is_empty() => {
                let mut columns = Vec::with_capacity(fields.len());
                for field in fields {
                    validate_identifier(field)?;
                    columns.push(quote_ident(field));
                }
                Ok(columns.join(", "))
            }
            _ => Ok("*".to_string()),
        }
    }

    fn order_and_page(options: &QueryOptions, limit: Option<u64>) -> DataResult<String> {
        let mut sql = String::new();

        if !options.sort.is_empty() {
            let mut keys = Vec::with_capacity(options.sort.len());
            for key in &options.sort {
                validate_identifier(&key.field)?;
                keys.push(format!("{} {}", quote_ident(&key.field), key.direction.as_sql()));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = options.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        Ok(sql)
    }

    /// `SELECT` over criteria; `limit` overrides `options.limit` when set
    pub fn select(
        &self,
        criteria: &Criteria,
        options: &QueryOptions,
        limit: Option<u64>,
    ) -> DataResult<Statement> {
        let mut params = Vec::new();
        let columns = Self::projection(options)?;
        let filter = self.where_clause(criteria, &mut params)?;
        let tail = Self::order_and_page(options, limit.or(options.limit))?;

        Ok(Statement::new(
            format!(
                "SELECT {} FROM {}{}{}",
                columns,
                quote_ident(&self.table),
                filter,
                tail
            ),
            params,
        ))
    }

    pub fn select_by_id(&self, id: &str, options: &QueryOptions) -> DataResult<Statement> {
        let mut params = Vec::new();
        let columns = Self::projection(options)?;
        let predicate = self.key_predicate(id, &mut params)?;

        Ok(Statement::new(
            format!(
                "SELECT {} FROM {} WHERE {} LIMIT 1",
                columns,
                quote_ident(&self.table),
                predicate
            ),
            params,
        ))
    }

    fn returning_clause(&self, returning: Returning) -> String {
        match returning {
            Returning::Row => " RETURNING *".to_string(),
            Returning::PrimaryKey => format!(" RETURNING {}", quote_ident(&self.primary_key)),
        }
    }

    pub fn insert(&self, data: &Entity, returning: Returning) -> DataResult<Statement> {
        let table = quote_ident(&self.table);
        let returning = self.returning_clause(returning);

        if data.is_empty() {
            return Ok(Statement::new(
                format!("INSERT INTO {} DEFAULT VALUES{}", table, returning),
                Vec::new(),
            ));
        }

        let mut params = Vec::with_capacity(data.len());
        let mut columns = Vec::with_capacity(data.len());
        let mut values = Vec::with_capacity(data.len());
        for (column, value) in data {
            validate_identifier(column)?;
            columns.push(quote_ident(column));
            values.push(self.bind(column, &mut params, SqlValue::from(value)));
        }

        Ok(Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({}){}",
                table,
                columns.join(", "),
                values.join(", "),
                returning
            ),
            params,
        ))
    }

    pub fn update(&self, id: &str, data: &Entity, returning: Returning) -> DataResult<Statement> {
        if data.is_empty() {
            return Err(DataError::validation("update requires at least one field"));
        }

        let mut params = Vec::with_capacity(data.len() + 1);
        let mut assignments = Vec::with_capacity(data.len());
        for (column, value) in data {
            validate_identifier(column)?;
            assignments.push(format!(
                "{} = {}",
                quote_ident(column),
                self.bind(column, &mut params, SqlValue::from(value))
            ));
        }
        let predicate = self.key_predicate(id, &mut params)?;

        Ok(Statement::new(
            format!(
                "UPDATE {} SET {} WHERE {}{}",
                quote_ident(&self.table),
                assignments.join(", "),
                predicate,
                self.returning_clause(returning)
            ),
            params,
        ))
    }

    pub fn delete(&self, id: &str, return_deleted: bool) -> DataResult<Statement> {
        let mut params = Vec::with_capacity(1);
        let predicate = self.key_predicate(id, &mut params)?;
        let returning = if return_deleted { " RETURNING *" } else { "" };

        Ok(Statement::new(
            format!(
                "DELETE FROM {} WHERE {}{}",
                quote_ident(&self.table),
                predicate,
                returning
            ),
            params,
        ))
    }

    pub fn count(&self, criteria: &Criteria) -> DataResult<Statement> {
        let mut params = Vec::new();
        let filter = self.where_clause(criteria, &mut params)?;
        Ok(Statement::new(
            format!(
                "SELECT COUNT(*) AS \"count\" FROM {}{}",
                quote_ident(&self.table),
                filter
            ),
            params,
        ))
    }

    pub fn exists(&self, criteria: &Criteria) -> DataResult<Statement> {
        let mut params = Vec::new();
        let filter = self.where_clause(criteria, &mut params)?;
        Ok(Statement::new(
            format!(
                "SELECT EXISTS (SELECT 1 FROM {}{}) AS \"exists\"",
                quote_ident(&self.table),
                filter
            ),
            params,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{entity, SortDirection};
    use serde_json::json;

    fn users() -> SqlBuilder {
        SqlBuilder::new("users", "id", KeyType::Integer).unwrap()
    }

    #[test]
    fn test_greater_than() {
        let stmt = users()
            .select(&entity(json!({"age": {"$gt": 18}})), &QueryOptions::new(), None)
            .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"users\" WHERE \"age\" > $1");
        assert_eq!(stmt.params, vec![SqlValue::Integer(18)]);
    }

    #[test]
    fn test_all_value_forms() {
        let criteria = entity(json!({
            "deleted_at": null,
            "email": {"$ilike": "%@example.com"},
            "role": ["editor", "admin"],
            "verified": true
        }));
        let stmt = users().count(&criteria).unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS \"count\" FROM \"users\" WHERE \"deleted_at\" IS NULL \
             AND \"email\" ILIKE $1 AND \"role\" IN ($2, $3) AND \"verified\" = $4"
        );
        assert_eq!(stmt.params.len(), 4);
        assert_eq!(stmt.params[3], SqlValue::Boolean(true));
    }

    #[test]
    fn test_empty_membership_matches_nothing() {
        let stmt = users().exists(&entity(json!({"role": []}))).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT EXISTS (SELECT 1 FROM \"users\" WHERE FALSE) AS \"exists\""
        );
    }

    #[test]
    fn test_projection_sort_and_paging() {
        let options = QueryOptions::new()
            .select(["id", "name"])
            .sort_by("created_at", SortDirection::Desc)
            .limit(20)
            .offset(40);
        let stmt = users().select(&Criteria::new(), &options, None).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"id\", \"name\" FROM \"users\" ORDER BY \"created_at\" DESC LIMIT 20 OFFSET 40"
        );

        let one = users().select(&Criteria::new(), &options, Some(1)).unwrap();
        assert!(one.sql.ends_with("LIMIT 1 OFFSET 40"));
    }

    #[test]
    fn test_insert_and_update_returning() {
        let builder = users();
        let data = entity(json!({"email": "a@b.c", "name": "Ada"}));

        let insert = builder.insert(&data, Returning::PrimaryKey).unwrap();
        assert_eq!(
            insert.sql,
            "INSERT INTO \"users\" (\"email\", \"name\") VALUES ($1, $2) RETURNING \"id\""
        );

        let update = builder.update("7", &data, Returning::Row).unwrap();
        assert_eq!(
            update.sql,
            "UPDATE \"users\" SET \"email\" = $1, \"name\" = $2 WHERE \"id\" = $3 RETURNING *"
        );
        assert_eq!(update.params[2], SqlValue::Integer(7));
    }

    #[test]
    fn test_key_types() {
        let err = users().delete("abc", false).unwrap_err();
        assert!(err.is_query_build_error());

        let uuid = SqlBuilder::new("articles", "id", KeyType::Uuid).unwrap();
        let stmt = uuid
            .delete("7d2b0b9e-5f4e-4a53-9a43-07d6c1b2f7a1", true)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "DELETE FROM \"articles\" WHERE \"id\" = $1::uuid RETURNING *"
        );
    }

    fn articles() -> SqlBuilder {
        let types: ColumnTypes = [
            ("id", "text"),
            ("published_at", "timestamp with time zone"),
            ("author_id", "uuid"),
            ("deleted_at", "timestamp with time zone"),
            ("status", "\"public\".\"article_status\""),
        ]
        .into_iter()
        .map(|(column, sql_type)| (column.to_string(), sql_type.to_string()))
        .collect();
        SqlBuilder::new("articles", "id", KeyType::Text)
            .unwrap()
            .with_column_types(types)
    }

    #[test]
    fn test_typed_columns_cast_their_placeholders() {
        let builder = articles();
        let data = entity(json!({
            "author_id": "7d2b0b9e-5f4e-4a53-9a43-07d6c1b2f7a1",
            "published_at": "2024-01-01T00:00:00Z",
            "status": "draft",
            "summary": "untyped"
        }));

        let insert = builder.insert(&data, Returning::Row).unwrap();
        assert_eq!(
            insert.sql,
            "INSERT INTO \"articles\" (\"author_id\", \"published_at\", \"status\", \"summary\") \
             VALUES ($1::uuid, $2::timestamp with time zone, $3::\"public\".\"article_status\", $4) RETURNING *"
        );

        let update = builder
            .update("a0", &entity(json!({"deleted_at": null})), Returning::Row)
            .unwrap();
        assert_eq!(
            update.sql,
            "UPDATE \"articles\" SET \"deleted_at\" = $1::timestamp with time zone \
             WHERE \"id\" = $2::text RETURNING *"
        );
        assert_eq!(update.params[0], SqlValue::Null);
    }

    #[test]
    fn test_typed_criteria() {
        let criteria = entity(json!({
            "published_at": {"$gt": "2023-01-01"},
            "author_id": ["7d2b0b9e-5f4e-4a53-9a43-07d6c1b2f7a1"],
            "status": {"$like": "dr%"}
        }));
        let stmt = articles()
            .select(&criteria, &QueryOptions::new(), None)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"articles\" WHERE \"published_at\" > $1::timestamp with time zone \
             AND \"author_id\" IN ($2::uuid) AND \"status\"::text LIKE $3"
        );
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        assert!(SqlBuilder::new("users; --", "id", KeyType::Text).is_err());
        let options = QueryOptions::new().select(["name\""]);
        assert!(users().select(&Criteria::new(), &options, None).is_err());
    }
}
