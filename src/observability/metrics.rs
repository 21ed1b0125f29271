//! Metrics for the pipeline, recorded through the `metrics` facade.
//!
//! Metric names live in one enum so call sites never spell out strings and
//! the catalog below stays exhaustive. The crate installs no recorder; the
//! embedding process decides where the measurements go.

use once_cell::sync::Lazy;
use std::fmt;

/// Every metric name used in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Ingestion
    IngestRows,

    // Quality gate
    QualityGateRowsDropped,

    // Dedupe
    DedupeDuplicatesRemoved,

    // Aggregation
    AggregateSpecsPublished,
    AggregateSpecsFailed,

    // Coordinator
    RunsStarted,
    RunsSucceeded,
    RunsFailed,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::IngestRows => "metl_ingest_rows_total",
            MetricName::QualityGateRowsDropped => "metl_quality_gate_rows_dropped_total",
            MetricName::DedupeDuplicatesRemoved => "metl_dedupe_duplicates_removed_total",
            MetricName::AggregateSpecsPublished => "metl_aggregate_specs_published_total",
            MetricName::AggregateSpecsFailed => "metl_aggregate_specs_failed_total",
            MetricName::RunsStarted => "metl_runs_started_total",
            MetricName::RunsSucceeded => "metl_runs_succeeded_total",
            MetricName::RunsFailed => "metl_runs_failed_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static catalog of every metric with its description, for the CLI and for
/// whoever wires up a recorder.
pub static CATALOG: Lazy<Vec<(MetricName, &'static str)>> = Lazy::new(|| {
    vec![
        (
            MetricName::IngestRows,
            "Rows written to the raw tier, labeled by source",
        ),
        (
            MetricName::QualityGateRowsDropped,
            "Rows dropped by a quality rule, labeled by rule",
        ),
        (
            MetricName::DedupeDuplicatesRemoved,
            "Exact-duplicate rows removed from the cleaned fact table",
        ),
        (
            MetricName::AggregateSpecsPublished,
            "Metric tables published, labeled by table",
        ),
        (
            MetricName::AggregateSpecsFailed,
            "Metric tables that failed validation or execution, labeled by table",
        ),
        (MetricName::RunsStarted, "Pipeline runs started"),
        (MetricName::RunsSucceeded, "Pipeline runs that reached DONE"),
        (MetricName::RunsFailed, "Pipeline runs that ended FAILED"),
    ]
});

pub mod ingest {
    use super::MetricName;

    pub fn rows_ingested(source: &str, rows: u64) {
        ::metrics::counter!(MetricName::IngestRows.as_str(), "source" => source.to_string())
            .increment(rows);
    }
}

pub mod quality_gate {
    use super::MetricName;

    pub fn rows_dropped(rule: &str, rows: u64) {
        ::metrics::counter!(MetricName::QualityGateRowsDropped.as_str(), "rule" => rule.to_string())
            .increment(rows);
    }
}

pub mod dedupe {
    use super::MetricName;

    pub fn duplicates_removed(rows: u64) {
        ::metrics::counter!(MetricName::DedupeDuplicatesRemoved.as_str()).increment(rows);
    }
}

pub mod aggregate {
    use super::MetricName;

    pub fn spec_published(table: &str) {
        ::metrics::counter!(MetricName::AggregateSpecsPublished.as_str(), "table" => table.to_string())
            .increment(1);
    }

    pub fn spec_failed(table: &str) {
        ::metrics::counter!(MetricName::AggregateSpecsFailed.as_str(), "table" => table.to_string())
            .increment(1);
    }
}

pub mod coordinator {
    use super::MetricName;

    pub fn run_started() {
        ::metrics::counter!(MetricName::RunsStarted.as_str()).increment(1);
    }

    pub fn run_succeeded() {
        ::metrics::counter!(MetricName::RunsSucceeded.as_str()).increment(1);
    }

    pub fn run_failed() {
        ::metrics::counter!(MetricName::RunsFailed.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_follow_prometheus_conventions() {
        for (name, _) in CATALOG.iter() {
            let s = name.as_str();
            assert!(s.starts_with("metl_"), "{s} missing prefix");
            assert!(s.ends_with("_total"), "{s} counter missing _total suffix");
        }
    }
}
