//! Deduplication of the cleaned fact table, plus the metadata-column
//! projection that must run before every join.

use std::collections::HashSet;
use tracing::{debug, info};

use crate::domain::{row_fingerprint, Table};
use crate::observability::metrics;
use crate::pipeline::ingest::INGESTED_AT;

/// Projects ingestion metadata off a table.
///
/// Every raw table carries its own `ingested_at`; joining two of them would
/// introduce conflicting copies of the column. Dropping the dimension side's
/// copy before the join keeps exactly one canonical instance on the fact
/// table, so that two otherwise-identical records cannot be told apart by a
/// join artifact during deduplication.
pub fn strip_metadata(table: &mut Table) {
    for row in &mut table.rows {
        row.remove(INGESTED_AT);
    }
    table.schema.remove_column(INGESTED_AT);
}

/// Removes rows that are identical across all columns, keyed on the row
/// fingerprint. Survivor order is whatever the scan produced; downstream
/// aggregation must not depend on it.
pub fn dedupe(mut table: Table) -> Table {
    let rows_in = table.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(rows_in);
    table.rows.retain(|row| seen.insert(row_fingerprint(row)));

    let removed = rows_in - table.len();
    if removed > 0 {
        debug!("Removed {} duplicate rows from '{}'", removed, table.name);
        metrics::dedupe::duplicates_removed(removed as u64);
    }
    info!(
        "🔁 Dedupe: {} rows in, {} duplicates removed",
        rows_in, removed
    );
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::domain::{ColumnType, Row, Schema, Value};

    fn table_with_rows(rows: Vec<Row>) -> Table {
        let mut t = Table::new("order_facts", Schema::new(&[("x", ColumnType::String)]));
        t.rows = rows;
        t
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn exact_duplicates_collapse_to_one() {
        let r = row(&[("x", Value::Str("a".into()))]);
        let deduped = dedupe(table_with_rows(vec![r.clone(), r.clone(), r]));
        assert_eq!(deduped.len(), 1);
    }

    #[test]
    fn rows_differing_in_any_column_survive() {
        let a = row(&[("x", Value::Str("a".into()))]);
        let b = row(&[("x", Value::Str("b".into()))]);
        let deduped = dedupe(table_with_rows(vec![a, b]));
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn strip_metadata_makes_join_twins_identical() {
        // Two records equal except for the metadata column a join dragged in:
        // identical only once the metadata is projected off.
        let mut a = row(&[("x", Value::Str("a".into()))]);
        a.insert(INGESTED_AT.to_string(), Value::Timestamp(Utc::now()));
        let b = row(&[("x", Value::Str("a".into()))]);

        let mut table = table_with_rows(vec![a, b]);
        assert_eq!(dedupe(table.clone()).len(), 2);

        strip_metadata(&mut table);
        assert_eq!(dedupe(table).len(), 1);
    }
}
