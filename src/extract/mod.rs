//! Declared schemas for the four source extracts and the CSV reader that
//! turns a delimited file into an untyped raw table.

use std::path::Path;

use tracing::debug;

use crate::common::error::Result;
use crate::domain::{ColumnType, Row, Schema, Table, Value};

pub const CUSTOMERS: &str = "customers";
pub const PRODUCTS: &str = "products";
pub const ORDER_LINES: &str = "order_lines";
pub const ORDER_HEADERS: &str = "order_headers";

pub fn customer_schema() -> Schema {
    Schema::new(&[
        ("customer_id", ColumnType::String),
        ("name", ColumnType::String),
        ("city", ColumnType::String),
        ("country", ColumnType::String),
    ])
}

pub fn product_schema() -> Schema {
    Schema::new(&[
        ("product_id", ColumnType::String),
        ("product_name", ColumnType::String),
        ("category", ColumnType::String),
    ])
}

pub fn order_line_schema() -> Schema {
    Schema::new(&[
        ("order_id", ColumnType::String),
        ("product_id", ColumnType::String),
        ("price", ColumnType::Float),
        ("quantity", ColumnType::Integer),
    ])
}

pub fn order_header_schema() -> Schema {
    Schema::new(&[
        ("order_id", ColumnType::String),
        ("customer_id", ColumnType::String),
        ("status", ColumnType::String),
        ("order_ts", ColumnType::Timestamp),
    ])
}

/// Reads one comma-delimited extract (header row, UTF-8) into a table.
///
/// Every cell is read as a string; the declared schema types describe the
/// semantic target and only the quality gate's cast rules apply them. An
/// empty cell becomes null. Fails with a schema error if any declared column
/// is missing from the header.
pub fn read_extract(name: &str, schema: Schema, path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path)?;
    let header: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    schema.require(name, &header)?;

    let mut table = Table::new(name, schema);
    for record in reader.records() {
        let record = record?;
        let mut row = Row::new();
        for (i, column) in header.iter().enumerate() {
            let field = record.get(i).unwrap_or("");
            let value = if field.is_empty() {
                Value::Null
            } else {
                Value::Str(field.to_string())
            };
            row.insert(column.clone(), value);
        }
        table.rows.push(row);
    }

    debug!("Read {} rows from {}", table.len(), path.display());
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_all_rows_as_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "order_lines.csv",
            "order_id,product_id,price,quantity\nO1,P1,10.5,2\nO2,P2,3,1\n",
        );
        let table = read_extract(ORDER_LINES, order_line_schema(), &path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.rows[0].get("price"),
            Some(&Value::Str("10.5".to_string()))
        );
    }

    #[test]
    fn empty_cells_become_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "order_headers.csv",
            "order_id,customer_id,status,order_ts\nO1,,shipped,2024-01-02T00:00:00Z\n",
        );
        let table = read_extract(ORDER_HEADERS, order_header_schema(), &path).unwrap();
        assert_eq!(table.rows[0].get("customer_id"), Some(&Value::Null));
    }

    #[test]
    fn missing_declared_column_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "customers.csv", "customer_id,name\nC1,Ada\n");
        let err = read_extract(CUSTOMERS, customer_schema(), &path).unwrap_err();
        assert!(err.to_string().contains("'city'"));
    }
}
