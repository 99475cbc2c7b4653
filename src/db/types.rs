use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value as JsonValue;

use super::error::DbError;

/// A value that can be stored in the database.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    /// NULL value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer (BIGINT)
    Int64(i64),
    /// Text (VARCHAR / TEXT)
    Text(String),
    /// JSONB value
    Json(JsonValue),
}

impl DbValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }

    pub fn json<T: Serialize>(value: T) -> Result<Self, DbError> {
        serde_json::to_value(value)
            .map(DbValue::Json)
            .map_err(|e| DbError::Encode(e.to_string()))
    }

    pub fn text(value: impl Into<String>) -> Self {
        DbValue::Text(value.into())
    }

    pub fn opt_text(value: &Option<String>) -> Self {
        match value {
            Some(v) => DbValue::Text(v.clone()),
            None => DbValue::Null,
        }
    }

    pub fn opt_int(value: Option<i64>) -> Self {
        match value {
            Some(v) => DbValue::Int64(v),
            None => DbValue::Null,
        }
    }

    pub fn opt_json(value: &Option<JsonValue>) -> Self {
        match value {
            Some(v) => DbValue::Json(v.clone()),
            None => DbValue::Null,
        }
    }

    /// Ordering used for ORDER BY evaluation outside of PostgreSQL.
    /// NULL sorts last, matching the server's ascending default.
    pub fn compare(&self, other: &DbValue) -> Ordering {
        match (self, other) {
            (DbValue::Null, DbValue::Null) => Ordering::Equal,
            (DbValue::Null, _) => Ordering::Greater,
            (_, DbValue::Null) => Ordering::Less,
            (DbValue::Bool(a), DbValue::Bool(b)) => a.cmp(b),
            (DbValue::Int64(a), DbValue::Int64(b)) => a.cmp(b),
            (DbValue::Text(a), DbValue::Text(b)) => a.cmp(b),
            (DbValue::Json(a), DbValue::Json(b)) => a.to_string().cmp(&b.to_string()),
            _ => Ordering::Equal,
        }
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Bool(v)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Int64(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int64,
    Text,
    Json,
}

#[derive(Debug)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
}

/// Static description of a table: used to build SELECT column lists and to
/// read typed values back out of PostgreSQL rows.
#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
}

impl TableSpec {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.to_string()).collect()
    }
}

/// A single row keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<String, DbValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<DbValue>) -> Self {
        self.values.insert(column.to_string(), value.into());
        self
    }

    pub fn set(&mut self, column: &str, value: DbValue) {
        self.values.insert(column.to_string(), value);
    }

    pub fn get(&self, column: &str) -> &DbValue {
        self.values.get(column).unwrap_or(&DbValue::Null)
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<DbValue>) {
        self.values.into_iter().unzip()
    }

    pub fn int(&self, column: &str) -> Result<i64, DbError> {
        match self.get(column) {
            DbValue::Int64(v) => Ok(*v),
            other => Err(DbError::column(column, "BIGINT", other)),
        }
    }

    pub fn opt_int(&self, column: &str) -> Result<Option<i64>, DbError> {
        match self.get(column) {
            DbValue::Null => Ok(None),
            DbValue::Int64(v) => Ok(Some(*v)),
            other => Err(DbError::column(column, "BIGINT", other)),
        }
    }

    pub fn text(&self, column: &str) -> Result<String, DbError> {
        match self.get(column) {
            DbValue::Text(v) => Ok(v.clone()),
            other => Err(DbError::column(column, "TEXT", other)),
        }
    }

    pub fn opt_text(&self, column: &str) -> Result<Option<String>, DbError> {
        match self.get(column) {
            DbValue::Null => Ok(None),
            DbValue::Text(v) => Ok(Some(v.clone())),
            other => Err(DbError::column(column, "TEXT", other)),
        }
    }

    /// NULL reads as `false` for the boolean flag columns.
    pub fn flag(&self, column: &str) -> Result<bool, DbError> {
        match self.get(column) {
            DbValue::Null => Ok(false),
            DbValue::Bool(v) => Ok(*v),
            other => Err(DbError::column(column, "BOOLEAN", other)),
        }
    }

    pub fn opt_json(&self, column: &str) -> Result<Option<JsonValue>, DbError> {
        match self.get(column) {
            DbValue::Null => Ok(None),
            DbValue::Json(v) => Ok(Some(v.clone())),
            other => Err(DbError::column(column, "JSONB", other)),
        }
    }
}

/// Sort key for SELECT.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: false,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: true,
        }
    }
}

/// Filtered read of a table.
#[derive(Debug, Clone)]
pub struct Select {
    pub table: &'static TableSpec,
    pub where_clause: WhereClause,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn from(table: &'static TableSpec, where_clause: WhereClause) -> Self {
        Self {
            table,
            where_clause,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Database write staged inside a block transaction.
#[derive(Debug, Clone)]
pub enum DbOperation {
    /// Simple INSERT
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<DbValue>,
    },
    /// UPDATE with WHERE clause
    Update {
        table: String,
        set_columns: Vec<(String, DbValue)>,
        where_clause: WhereClause,
    },
    /// DELETE with WHERE clause
    Delete {
        table: String,
        where_clause: WhereClause,
    },
}

impl DbOperation {
    pub fn insert(table: &TableSpec, record: Record) -> Self {
        let (columns, values) = record.into_parts();
        DbOperation::Insert {
            table: table.name.to_string(),
            columns,
            values,
        }
    }

    pub fn update(table: &TableSpec, set_columns: Vec<(&str, DbValue)>, where_clause: WhereClause) -> Self {
        DbOperation::Update {
            table: table.name.to_string(),
            set_columns: set_columns
                .into_iter()
                .map(|(c, v)| (c.to_string(), v))
                .collect(),
            where_clause,
        }
    }

    pub fn delete(table: &TableSpec, where_clause: WhereClause) -> Self {
        DbOperation::Delete {
            table: table.name.to_string(),
            where_clause,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            DbOperation::Insert { table, .. }
            | DbOperation::Update { table, .. }
            | DbOperation::Delete { table, .. } => table,
        }
    }
}

/// WHERE clause for SELECT, UPDATE and DELETE operations.
#[derive(Debug, Clone)]
pub enum WhereClause {
    /// Matches every row
    All,
    /// column = value (`IS NULL` when value is NULL)
    Eq(String, DbValue),
    /// column < value
    Lt(String, DbValue),
    /// column IN (values)
    In(String, Vec<DbValue>),
    /// cond1 AND cond2 AND ...
    And(Vec<WhereClause>),
}

impl WhereClause {
    pub fn eq(column: &str, value: impl Into<DbValue>) -> Self {
        WhereClause::Eq(column.to_string(), value.into())
    }

    pub fn lt(column: &str, value: impl Into<DbValue>) -> Self {
        WhereClause::Lt(column.to_string(), value.into())
    }

    pub fn is_in(column: &str, values: Vec<DbValue>) -> Self {
        WhereClause::In(column.to_string(), values)
    }

    /// Conjunction that flattens nested `And`s.
    pub fn and(self, other: WhereClause) -> Self {
        let mut parts = match self {
            WhereClause::All => Vec::new(),
            WhereClause::And(parts) => parts,
            single => vec![single],
        };
        match other {
            WhereClause::All => {}
            WhereClause::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        if parts.is_empty() {
            WhereClause::All
        } else {
            WhereClause::And(parts)
        }
    }

    /// Evaluate against an in-memory row.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            WhereClause::All => true,
            WhereClause::Eq(col, val) => record.get(col) == val,
            WhereClause::Lt(col, val) => {
                let current = record.get(col);
                !current.is_null() && current.compare(val) == Ordering::Less
            }
            WhereClause::In(col, vals) => vals.iter().any(|v| record.get(col) == v),
            WhereClause::And(parts) => parts.iter().all(|p| p.matches(record)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_where_clause_and_flattens() {
        let clause = WhereClause::eq("user_id", 1i64)
            .and(WhereClause::eq("is_current", true))
            .and(WhereClause::All);
        match clause {
            WhereClause::And(parts) => assert_eq!(parts.len(), 2),
            other => panic!("unexpected clause {:?}", other),
        }
    }

    #[test]
    fn test_where_clause_matches_record() {
        let record = Record::new()
            .with("user_id", 7i64)
            .with("blocknumber", 10i64)
            .with("chain", "eth");

        assert!(WhereClause::eq("user_id", 7i64).matches(&record));
        assert!(WhereClause::lt("blocknumber", 11i64).matches(&record));
        assert!(!WhereClause::lt("blocknumber", 10i64).matches(&record));
        assert!(WhereClause::is_in("chain", vec!["sol".into(), "eth".into()]).matches(&record));
        assert!(WhereClause::eq("missing", DbValue::Null).matches(&record));
    }

    #[test]
    fn test_null_sorts_last() {
        assert_eq!(DbValue::Null.compare(&DbValue::Int64(1)), Ordering::Greater);
        assert_eq!(DbValue::Int64(1).compare(&DbValue::Int64(2)), Ordering::Less);
    }
}
