//! Aggregation engine: declarative grouping/aggregation specs, each
//! producing one metric table from the cleaned snapshot.
//!
//! Specs are independent of each other; every spec reads the same immutable
//! snapshot, so the coordinator may run them concurrently. A spec that
//! references an unknown column or mistypes a group key fails alone and
//! never takes its siblings down.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::common::error::{PipelineError, Result};
use crate::domain::{ColumnDef, ColumnType, Row, Schema, Table, Value};

/// Declarative description of one metric table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// Name of the output table in the aggregated tier.
    pub table: String,
    pub group_by: Vec<GroupKey>,
    pub aggregates: Vec<AggregateColumn>,
    /// Present on "top N" tables only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<RankSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupKey {
    /// Group by a column as-is.
    Column { name: String },
    /// Group by the calendar month ("YYYY-MM") of a timestamp column.
    Month { source: String, output: String },
}

impl GroupKey {
    pub fn output_name(&self) -> &str {
        match self {
            GroupKey::Column { name } => name,
            GroupKey::Month { output, .. } => output,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateColumn {
    pub source: String,
    pub function: AggregateFn,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    /// Number of non-null values of the source column. A row whose source
    /// value is null contributes to the group's existence but not to the
    /// count.
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// Rank-and-limit for "top N" tables. The secondary key makes tied rows
/// rank identically on every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankSpec {
    pub order_by: String,
    pub descending: bool,
    pub limit: usize,
    pub tie_breaker: String,
}

/// The four metric tables published on a default run.
pub fn default_specs(top_customers_limit: usize) -> Vec<AggregateSpec> {
    vec![
        AggregateSpec {
            table: "sales_by_category".to_string(),
            group_by: vec![GroupKey::Column {
                name: "category".to_string(),
            }],
            aggregates: vec![
                agg("price", AggregateFn::Sum, "total_revenue"),
                agg("order_id", AggregateFn::Count, "order_line_count"),
            ],
            rank: None,
        },
        AggregateSpec {
            table: "customer_lifetime_value".to_string(),
            group_by: vec![GroupKey::Column {
                name: "customer_id".to_string(),
            }],
            aggregates: vec![
                agg("price", AggregateFn::Sum, "lifetime_value"),
                agg("order_id", AggregateFn::Count, "order_line_count"),
            ],
            rank: None,
        },
        AggregateSpec {
            table: "monthly_sales".to_string(),
            group_by: vec![GroupKey::Month {
                source: "order_ts".to_string(),
                output: "month".to_string(),
            }],
            aggregates: vec![
                agg("price", AggregateFn::Sum, "total_revenue"),
                agg("order_id", AggregateFn::Count, "order_line_count"),
            ],
            rank: None,
        },
        AggregateSpec {
            table: "top_customers".to_string(),
            group_by: vec![GroupKey::Column {
                name: "customer_id".to_string(),
            }],
            aggregates: vec![agg("price", AggregateFn::Sum, "lifetime_value")],
            rank: Some(RankSpec {
                order_by: "lifetime_value".to_string(),
                descending: true,
                limit: top_customers_limit,
                tie_breaker: "customer_id".to_string(),
            }),
        },
    ]
}

fn agg(source: &str, function: AggregateFn, output: &str) -> AggregateColumn {
    AggregateColumn {
        source: source.to_string(),
        function,
        output: output.to_string(),
    }
}

/// Runs one spec against the cleaned snapshot.
pub fn aggregate(cleaned: &Table, spec: &AggregateSpec) -> Result<Table> {
    validate(cleaned, spec)?;

    // Group rows by the canonical encoding of their key values. BTreeMap
    // iteration gives output rows a deterministic order.
    let mut groups: BTreeMap<Vec<String>, Group> = BTreeMap::new();
    for row in &cleaned.rows {
        let mut key = Vec::with_capacity(spec.group_by.len());
        let mut key_values = Vec::with_capacity(spec.group_by.len());
        for group_key in &spec.group_by {
            let value = group_key_value(row, group_key);
            key.push(value.canonical());
            key_values.push(value);
        }
        let group = groups.entry(key).or_insert_with(|| Group {
            key_values,
            accumulators: vec![Accumulator::default(); spec.aggregates.len()],
        });
        for (accumulator, column) in group.accumulators.iter_mut().zip(&spec.aggregates) {
            accumulator.observe(row.get(&column.source));
        }
    }

    let mut table = Table::new(spec.table.clone(), output_schema(cleaned, spec));
    for group in groups.into_values() {
        let mut row = Row::new();
        for (group_key, value) in spec.group_by.iter().zip(group.key_values) {
            row.insert(group_key.output_name().to_string(), value);
        }
        for (accumulator, column) in group.accumulators.iter().zip(&spec.aggregates) {
            row.insert(column.output.clone(), accumulator.finish(column.function));
        }
        table.rows.push(row);
    }

    if let Some(rank) = &spec.rank {
        apply_rank(&mut table, rank);
    }
    Ok(table)
}

fn validate(cleaned: &Table, spec: &AggregateSpec) -> Result<()> {
    let invalid = |reason: String| PipelineError::AggregationSpec {
        spec: spec.table.clone(),
        reason,
    };

    for group_key in &spec.group_by {
        match group_key {
            GroupKey::Column { name } => {
                if !cleaned.schema.contains(name) {
                    return Err(invalid(format!("unknown group column '{name}'")));
                }
            }
            GroupKey::Month { source, .. } => match cleaned.schema.column_type(source) {
                None => return Err(invalid(format!("unknown group column '{source}'"))),
                Some(ColumnType::Timestamp) => {}
                Some(other) => {
                    return Err(invalid(format!(
                        "month key needs a timestamp column, '{source}' is {other}"
                    )))
                }
            },
        }
    }
    for column in &spec.aggregates {
        if !cleaned.schema.contains(&column.source) {
            return Err(invalid(format!(
                "unknown aggregate source column '{}'",
                column.source
            )));
        }
    }
    if let Some(rank) = &spec.rank {
        let outputs: Vec<&str> = spec
            .group_by
            .iter()
            .map(GroupKey::output_name)
            .chain(spec.aggregates.iter().map(|a| a.output.as_str()))
            .collect();
        for column in [rank.order_by.as_str(), rank.tie_breaker.as_str()] {
            if !outputs.contains(&column) {
                return Err(invalid(format!(
                    "rank column '{column}' is not produced by the spec"
                )));
            }
        }
    }
    Ok(())
}

fn group_key_value(row: &Row, group_key: &GroupKey) -> Value {
    match group_key {
        GroupKey::Column { name } => row.get(name).cloned().unwrap_or(Value::Null),
        GroupKey::Month { source, .. } => match row.get(source) {
            Some(Value::Timestamp(ts)) => Value::Str(ts.format("%Y-%m").to_string()),
            _ => Value::Null,
        },
    }
}

fn output_schema(cleaned: &Table, spec: &AggregateSpec) -> Schema {
    let mut columns = Vec::new();
    for group_key in &spec.group_by {
        let ty = match group_key {
            GroupKey::Column { name } => {
                cleaned.schema.column_type(name).unwrap_or(ColumnType::String)
            }
            GroupKey::Month { .. } => ColumnType::String,
        };
        columns.push(ColumnDef {
            name: group_key.output_name().to_string(),
            ty,
        });
    }
    for column in &spec.aggregates {
        let ty = match column.function {
            AggregateFn::Count => ColumnType::Integer,
            _ => ColumnType::Float,
        };
        columns.push(ColumnDef {
            name: column.output.clone(),
            ty,
        });
    }
    Schema { columns }
}

/// One group under construction: the key values as first observed, plus one
/// accumulator per aggregate column.
struct Group {
    key_values: Vec<Value>,
    accumulators: Vec<Accumulator>,
}

/// Double-precision running state for one aggregate column in one group.
/// Null source values contribute to nothing: count is over non-null values,
/// avg over the numeric ones. A group only exists once a row produced it, so
/// sum/avg over an empty group cannot occur; min/max over only-null inputs
/// yield null.
#[derive(Debug, Clone, Default)]
struct Accumulator {
    non_null: u64,
    sum: f64,
    numeric: u64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn observe(&mut self, value: Option<&Value>) {
        let Some(v) = value.filter(|v| !v.is_null()) else {
            return;
        };
        self.non_null += 1;
        if let Some(v) = v.as_f64() {
            self.numeric += 1;
            self.sum += v;
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
        }
    }

    fn finish(&self, function: AggregateFn) -> Value {
        match function {
            AggregateFn::Count => Value::Int(self.non_null as i64),
            AggregateFn::Sum => Value::Float(self.sum),
            AggregateFn::Avg => {
                if self.numeric == 0 {
                    Value::Null
                } else {
                    Value::Float(self.sum / self.numeric as f64)
                }
            }
            AggregateFn::Min => self.min.map(Value::Float).unwrap_or(Value::Null),
            AggregateFn::Max => self.max.map(Value::Float).unwrap_or(Value::Null),
        }
    }
}

fn apply_rank(table: &mut Table, rank: &RankSpec) {
    table.rows.sort_by(|a, b| {
        let av = a.get(&rank.order_by).and_then(Value::as_f64);
        let bv = b.get(&rank.order_by).and_then(Value::as_f64);
        let primary = av
            .partial_cmp(&bv)
            .unwrap_or(std::cmp::Ordering::Equal);
        let primary = if rank.descending {
            primary.reverse()
        } else {
            primary
        };
        primary.then_with(|| {
            let at = a.get(&rank.tie_breaker).map(Value::canonical);
            let bt = b.get(&rank.tie_breaker).map(Value::canonical);
            at.cmp(&bt)
        })
    });
    table.rows.truncate(rank.limit);
}
