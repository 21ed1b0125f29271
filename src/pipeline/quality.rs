//! Quality gate: an ordered list of declarative cleaning rules applied to
//! the joined fact table, with a per-rule audit report.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::error::{PipelineError, Result};
use crate::domain::{ColumnType, Row, Table, Value};
use crate::observability::metrics;

/// One named cleaning rule. Rules are declarative so that a pipeline's rule
/// set can live in configuration next to its aggregation specs. They apply
/// in declaration order, each observing the previous rule's output, which is
/// why casts must precede range filters over the same column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// Coerce a column to a target type. Rows whose value cannot be coerced
    /// are dropped and counted, never fatal to the run. Nulls pass through.
    Cast { column: String, target: ColumnType },
    /// Drop rows with a null in any of the listed columns.
    DropNullIn { columns: Vec<String> },
    /// Drop rows whose numeric value falls outside the declared bounds.
    FilterRange {
        column: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Lower-case and trim a text column in place.
    NormalizeText { column: String },
}

impl Rule {
    pub fn name(&self) -> String {
        match self {
            Rule::Cast { column, target } => format!("cast({column}:{target})"),
            Rule::DropNullIn { columns } => format!("drop_null_in({})", columns.join(",")),
            Rule::FilterRange { column, .. } => format!("filter_range({column})"),
            Rule::NormalizeText { column } => format!("normalize_text({column})"),
        }
    }
}

/// Per-rule audit trail: rows in, rows out, in declaration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityReport {
    pub rules: Vec<RuleOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub rows_in: usize,
    pub rows_out: usize,
}

impl RuleOutcome {
    pub fn dropped(&self) -> usize {
        self.rows_in - self.rows_out
    }
}

impl QualityReport {
    pub fn total_dropped(&self) -> usize {
        self.rules.iter().map(RuleOutcome::dropped).sum()
    }
}

/// The default rule set for the order fact table. Casting runs first so the
/// range filter compares typed values, and normalization runs last on the
/// surviving rows.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::Cast {
            column: "price".to_string(),
            target: ColumnType::Float,
        },
        Rule::Cast {
            column: "quantity".to_string(),
            target: ColumnType::Integer,
        },
        Rule::Cast {
            column: "order_ts".to_string(),
            target: ColumnType::Timestamp,
        },
        Rule::DropNullIn {
            columns: vec!["order_id".to_string(), "customer_id".to_string()],
        },
        Rule::FilterRange {
            column: "price".to_string(),
            min: Some(0.0),
            max: None,
        },
        Rule::NormalizeText {
            column: "category".to_string(),
        },
        Rule::NormalizeText {
            column: "status".to_string(),
        },
    ]
}

/// Applies the rules in order and returns the cleaned table plus the
/// per-rule report.
pub fn clean(mut table: Table, rules: &[Rule]) -> (Table, QualityReport) {
    let mut report = QualityReport::default();

    for rule in rules {
        let rows_in = table.len();
        apply_rule(&mut table, rule);
        let rows_out = table.len();

        let outcome = RuleOutcome {
            rule: rule.name(),
            rows_in,
            rows_out,
        };
        if outcome.dropped() > 0 {
            debug!(
                "Rule {} dropped {} of {} rows",
                outcome.rule,
                outcome.dropped(),
                rows_in
            );
            metrics::quality_gate::rows_dropped(&outcome.rule, outcome.dropped() as u64);
        }
        report.rules.push(outcome);
    }

    info!(
        "🛡️ Quality gate: {} rules, {} rows dropped, {} rows out",
        rules.len(),
        report.total_dropped(),
        table.len()
    );
    (table, report)
}

fn apply_rule(table: &mut Table, rule: &Rule) {
    match rule {
        Rule::Cast { column, target } => {
            table
                .rows
                .retain_mut(|row| cast_in_place(row, column, *target));
            table.schema.set_column_type(column, *target);
        }
        Rule::DropNullIn { columns } => {
            table.rows.retain(|row| {
                columns
                    .iter()
                    .all(|c| row.get(c).map(|v| !v.is_null()).unwrap_or(false))
            });
        }
        Rule::FilterRange { column, min, max } => {
            table.rows.retain(|row| {
                match row.get(column).and_then(Value::as_f64) {
                    // Non-numeric (including null) rows pass; nullability is
                    // the drop_null_in rule's concern.
                    None => true,
                    Some(v) => min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m),
                }
            });
        }
        Rule::NormalizeText { column } => {
            for row in &mut table.rows {
                if let Some(Value::Str(s)) = row.get(column) {
                    let normalized = s.trim().to_lowercase();
                    row.insert(column.clone(), Value::Str(normalized));
                }
            }
        }
    }
}

/// Coerces one cell in place. Returns false when the row must be dropped:
/// the coercion error is absorbed here, logged with its offending column and
/// value, and surfaces only as a drop count in the rule report.
fn cast_in_place(row: &mut Row, column: &str, target: ColumnType) -> bool {
    let Some(value) = row.get(column) else {
        return true;
    };
    if value.is_null() {
        return true;
    }
    match coerce(column, value, target) {
        Ok(coerced) => {
            row.insert(column.to_string(), coerced);
            true
        }
        Err(e) => {
            debug!("Dropping row: {}", e);
            false
        }
    }
}

fn coerce(column: &str, value: &Value, target: ColumnType) -> Result<Value> {
    let uncoercible = || PipelineError::TypeCoercion {
        column: column.to_string(),
        value: value.to_string(),
        target: target.to_string(),
    };
    match target {
        ColumnType::String => Ok(Value::Str(value.to_string())),
        ColumnType::Integer => match value {
            Value::Int(_) => Ok(value.clone()),
            Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| uncoercible()),
            _ => Err(uncoercible()),
        },
        ColumnType::Float => match value {
            Value::Float(_) => Ok(value.clone()),
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| uncoercible()),
            _ => Err(uncoercible()),
        },
        ColumnType::Timestamp => match value {
            Value::Timestamp(_) => Ok(value.clone()),
            Value::Str(s) => parse_timestamp(s.trim())
                .map(Value::Timestamp)
                .ok_or_else(uncoercible),
            _ => Err(uncoercible()),
        },
    }
}

/// Accepts RFC 3339, a naive `YYYY-MM-DD HH:MM:SS` (space or `T`), or a bare
/// date. Naive inputs are taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}
