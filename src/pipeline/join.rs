//! Star join of the order-line fact table onto its dimension tables.
//!
//! The join is declared, never inferred: the key column must exist on both
//! sides or the stage fails. The fact table is preserved per the configured
//! join type; a fact row never multiplies because dimension keys are unique
//! within one build (a duplicated dimension key keeps its first row).

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::common::error::{PipelineError, Result};
use crate::config::JoinType;
use crate::domain::{Row, Table, Value};

/// Joins one dimension table onto the fact table on `key`.
///
/// Dimension columns already present on the fact side are never overwritten;
/// callers are expected to have projected conflicting metadata columns off
/// the dimension side beforehand (see `dedupe::strip_metadata`).
pub fn join_dimension(
    fact: Table,
    dimension: &Table,
    key: &str,
    join_type: JoinType,
) -> Result<Table> {
    if !fact.schema.contains(key) {
        return Err(PipelineError::JoinKeyMismatch {
            side: fact.name.clone(),
            column: key.to_string(),
        });
    }
    if !dimension.schema.contains(key) {
        return Err(PipelineError::JoinKeyMismatch {
            side: dimension.name.clone(),
            column: key.to_string(),
        });
    }

    // Columns the dimension contributes: everything it declares except the
    // key and anything the fact side already carries.
    let contributed: Vec<&str> = dimension
        .schema
        .column_names()
        .filter(|c| *c != key && !fact.schema.contains(c))
        .collect();

    let mut lookup: HashMap<String, &Row> = HashMap::with_capacity(dimension.len());
    let mut duplicate_keys = 0usize;
    for row in &dimension.rows {
        let Some(value) = row.get(key) else { continue };
        if value.is_null() {
            continue;
        }
        if lookup.insert(value.canonical(), row).is_some() {
            duplicate_keys += 1;
        }
    }
    if duplicate_keys > 0 {
        warn!(
            "Dimension '{}' has {} duplicated '{}' keys; keeping first occurrence",
            dimension.name, duplicate_keys, key
        );
    }

    let mut schema = fact.schema.clone();
    for column in &contributed {
        if let Some(def) = dimension.schema.columns.iter().find(|c| c.name == *column) {
            schema.columns.push(def.clone());
        }
    }

    let mut joined = Table::new(fact.name.clone(), schema);
    for mut row in fact.rows {
        let matched = row
            .get(key)
            .filter(|v| !v.is_null())
            .and_then(|v| lookup.get(&v.canonical()).copied());

        match (matched, join_type) {
            (Some(dim_row), _) => {
                for column in &contributed {
                    let value = dim_row.get(*column).cloned().unwrap_or(Value::Null);
                    row.insert((*column).to_string(), value);
                }
            }
            (None, JoinType::LeftNulling) => {
                for column in &contributed {
                    row.insert((*column).to_string(), Value::Null);
                }
            }
            (None, JoinType::Inner) => continue,
        }
        joined.rows.push(row);
    }

    debug!(
        "Joined '{}' onto '{}' on '{}': {} rows out",
        dimension.name,
        joined.name,
        key,
        joined.len()
    );
    Ok(joined)
}
