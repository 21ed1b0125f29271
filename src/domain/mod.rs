use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::common::error::{PipelineError, Result};

/// A single cell value. Extracts arrive as strings; the quality gate's cast
/// rules are the only place a cell changes type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view used by range filters and aggregation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Stable textual encoding that feeds row fingerprints and group keys.
    /// Two values encode identically iff they compare equal.
    pub fn canonical(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Str(s) => format!("s:{s}"),
            Value::Int(i) => format!("i:{i}"),
            Value::Float(f) => format!("f:{f:?}"),
            Value::Timestamp(ts) => format!("t:{}", ts.to_rfc3339()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Str(s) => write!(f, "{s}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// Declared semantic type of a column. Types are never inferred; stage
/// boundaries check declarations and fail with a schema error on mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Timestamp,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Timestamp => "timestamp",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new(columns: &[(&str, ColumnType)]) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|(name, ty)| ColumnDef {
                    name: (*name).to_string(),
                    ty: *ty,
                })
                .collect(),
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name == column)
    }

    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns.iter().find(|c| c.name == column).map(|c| c.ty)
    }

    /// Checks every declared column against an extract header, failing with
    /// the first missing column.
    pub fn require(&self, table: &str, header: &[String]) -> Result<()> {
        for column in self.column_names() {
            if !header.iter().any(|h| h == column) {
                return Err(PipelineError::Schema {
                    table: table.to_string(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Updates the declared type of a column after a cast rule ran.
    pub fn set_column_type(&mut self, column: &str, ty: ColumnType) {
        if let Some(def) = self.columns.iter_mut().find(|c| c.name == column) {
            def.ty = ty;
        }
    }

    pub fn remove_column(&mut self, column: &str) {
        self.columns.retain(|c| c.name != column);
    }
}

/// Rows keep columns in a `BTreeMap` so that fingerprints and serialized
/// output are byte-identical across reruns regardless of build order.
pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub schema: Schema,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Order-insensitive content fingerprint of the whole table. Used by the
    /// idempotence checks: two tables with the same rows hash identically
    /// even if the rows survived in a different order.
    pub fn fingerprint(&self) -> String {
        let mut row_hashes: Vec<String> = self.rows.iter().map(row_fingerprint).collect();
        row_hashes.sort_unstable();
        let mut hasher = Sha256::new();
        for hash in row_hashes {
            hasher.update(hash.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// sha256 over the row's column/value pairs in column order. Two rows are
/// duplicates iff their fingerprints match.
pub fn row_fingerprint(row: &Row) -> String {
    let mut hasher = Sha256::new();
    for (column, value) in row {
        hasher.update(column.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.canonical().as_bytes());
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn identical_rows_fingerprint_identically() {
        let a = row(&[("x", Value::Int(1)), ("y", Value::Str("a".into()))]);
        let b = row(&[("y", Value::Str("a".into())), ("x", Value::Int(1))]);
        assert_eq!(row_fingerprint(&a), row_fingerprint(&b));
    }

    #[test]
    fn differing_rows_fingerprint_differently() {
        let a = row(&[("x", Value::Int(1))]);
        let b = row(&[("x", Value::Int(2))]);
        assert_ne!(row_fingerprint(&a), row_fingerprint(&b));
    }

    #[test]
    fn null_and_empty_string_are_distinct() {
        let a = row(&[("x", Value::Null)]);
        let b = row(&[("x", Value::Str(String::new()))]);
        assert_ne!(row_fingerprint(&a), row_fingerprint(&b));
    }

    #[test]
    fn table_fingerprint_ignores_row_order() {
        let schema = Schema::new(&[("x", ColumnType::Integer)]);
        let mut t1 = Table::new("t", schema.clone());
        t1.rows.push(row(&[("x", Value::Int(1))]));
        t1.rows.push(row(&[("x", Value::Int(2))]));
        let mut t2 = Table::new("t", schema);
        t2.rows.push(row(&[("x", Value::Int(2))]));
        t2.rows.push(row(&[("x", Value::Int(1))]));
        assert_eq!(t1.fingerprint(), t2.fingerprint());
    }

    #[test]
    fn require_reports_first_missing_column() {
        let schema = Schema::new(&[("a", ColumnType::String), ("b", ColumnType::String)]);
        let header = vec!["a".to_string()];
        let err = schema.require("orders", &header).unwrap_err();
        assert!(err.to_string().contains("'b'"));
    }
}
