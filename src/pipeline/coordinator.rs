//! Pipeline coordinator: sequences the stages, owns every tier-overwrite,
//! and reports per-stage counts for validation.
//!
//! Stages run strictly in order because each tier needs the previous tier
//! fully materialized. The one exception is the aggregation fan-out, where
//! independent specs run concurrently against an immutable snapshot of the
//! cleaned table. Spec results come back to the coordinator, which remains
//! the sole writer: a spec failure marks only that metric table failed, and
//! the run finishes the remaining specs before settling on a final state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::common::error::{PipelineError, Result};
use crate::config::PipelineConfig;
use crate::domain::Table;
use crate::extract;
use crate::observability::metrics;
use crate::pipeline::aggregate::{self, AggregateSpec};
use crate::pipeline::quality::{self, QualityReport, Rule};
use crate::pipeline::{dedupe, ingest, join};
use crate::storage::{Tier, TierStore};

/// Name of the cleaned fact table published to the cleaned tier.
pub const CLEANED_FACT_TABLE: &str = "order_facts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    RawLoaded,
    Cleaned,
    Aggregated,
    Done,
    Failed,
}

/// Outcome of one aggregation spec within a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SpecOutcome {
    Published { rows: usize },
    Failed { error: String },
}

/// Per-run audit record: always populated as far as the run got, so partial
/// diagnostics survive an overall failure.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: RunState,
    /// Row counts keyed by `tier.table`.
    pub stage_counts: BTreeMap<String, usize>,
    pub quality: Option<QualityReport>,
    pub specs: BTreeMap<String, SpecOutcome>,
    pub errors: Vec<String>,
}

impl RunReport {
    fn new(pipeline: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            state: RunState::Init,
            stage_counts: BTreeMap::new(),
            quality: None,
            specs: BTreeMap::new(),
            errors: Vec::new(),
        }
    }
}

pub struct PipelineCoordinator {
    store: Arc<dyn TierStore>,
    config: PipelineConfig,
    rules: Vec<Rule>,
    specs: Vec<AggregateSpec>,
}

impl PipelineCoordinator {
    pub fn new(store: Arc<dyn TierStore>, config: PipelineConfig) -> Self {
        let rules = quality::default_rules();
        let specs = aggregate::default_specs(config.top_customers_limit);
        Self {
            store,
            config,
            rules,
            specs,
        }
    }

    /// Replaces the quality rule set.
    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    /// Replaces the aggregation spec set.
    pub fn with_specs(mut self, specs: Vec<AggregateSpec>) -> Self {
        self.specs = specs;
        self
    }

    /// Runs the full pipeline. Never returns `Err`: stage failures land in
    /// the report, which reflects every attempted stage.
    #[instrument(skip(self), fields(pipeline = %self.config.name))]
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::new(&self.config.name);
        info!("🔄 Starting pipeline run {}", report.run_id);
        metrics::coordinator::run_started();

        match self.run_stages(&mut report).await {
            Ok(state) => report.state = state,
            Err(e) => {
                error!("❌ Pipeline run failed: {}", e);
                report.errors.push(e.to_string());
                report.state = RunState::Failed;
            }
        }
        report.finished_at = Some(Utc::now());

        match report.state {
            RunState::Done => {
                metrics::coordinator::run_succeeded();
                info!("✅ Pipeline run {} completed", report.run_id);
            }
            _ => {
                metrics::coordinator::run_failed();
                warn!(
                    "Pipeline run {} ended in {:?} with {} error(s)",
                    report.run_id,
                    report.state,
                    report.errors.len()
                );
            }
        }
        report
    }

    async fn run_stages(&self, report: &mut RunReport) -> Result<RunState> {
        self.load_raw(report).await?;
        report.state = RunState::RawLoaded;

        let raw = self.require_raw_sources().await?;
        self.build_cleaned(report, raw).await?;
        report.state = RunState::Cleaned;

        let all_published = self.fan_out_aggregations(report).await?;
        report.state = RunState::Aggregated;

        if all_published {
            Ok(RunState::Done)
        } else {
            Ok(RunState::Failed)
        }
    }

    async fn load_raw(&self, report: &mut RunReport) -> Result<()> {
        let store = self.store.as_ref();
        let extracts = &self.config.extracts;
        let sources = [
            (extract::CUSTOMERS, extract::customer_schema(), &extracts.customers),
            (extract::PRODUCTS, extract::product_schema(), &extracts.products),
            (
                extract::ORDER_LINES,
                extract::order_line_schema(),
                &extracts.order_lines,
            ),
            (
                extract::ORDER_HEADERS,
                extract::order_header_schema(),
                &extracts.order_headers,
            ),
        ];
        for (name, schema, path) in sources {
            let rows = ingest::ingest(store, name, schema, path).await?;
            report.stage_counts.insert(format!("raw.{name}"), rows);
        }
        Ok(())
    }

    /// All four raw tables must be present, and non-empty unless the run is
    /// configured incremental.
    async fn require_raw_sources(&self) -> Result<RawTables> {
        let mut tables = Vec::with_capacity(4);
        for name in [
            extract::ORDER_LINES,
            extract::ORDER_HEADERS,
            extract::CUSTOMERS,
            extract::PRODUCTS,
        ] {
            let table = self.store.read(Tier::Raw, name).await?.ok_or_else(|| {
                PipelineError::MissingSource {
                    table: name.to_string(),
                }
            })?;
            if table.is_empty() && !self.config.incremental {
                return Err(PipelineError::MissingSource {
                    table: name.to_string(),
                });
            }
            tables.push(table);
        }
        let mut tables = tables.into_iter();
        Ok(RawTables {
            order_lines: tables.next().unwrap(),
            order_headers: tables.next().unwrap(),
            customers: tables.next().unwrap(),
            products: tables.next().unwrap(),
        })
    }

    async fn build_cleaned(&self, report: &mut RunReport, raw: RawTables) -> Result<()> {
        // The fact table keeps its canonical ingested_at; every dimension
        // loses its copy before its join.
        let mut fact = (*raw.order_lines).clone();
        fact.name = CLEANED_FACT_TABLE.to_string();

        let dimensions = [
            (raw.order_headers, "order_id"),
            (raw.customers, "customer_id"),
            (raw.products, "product_id"),
        ];
        for (dimension, key) in dimensions {
            let mut dimension = (*dimension).clone();
            dedupe::strip_metadata(&mut dimension);
            fact = join::join_dimension(fact, &dimension, key, self.config.join_type)?;
        }
        report
            .stage_counts
            .insert("joined.order_facts".to_string(), fact.len());

        let (gated, quality_report) = quality::clean(fact, &self.rules);
        report.quality = Some(quality_report);

        let cleaned = dedupe::dedupe(gated);
        let rows = cleaned.len();
        report
            .stage_counts
            .insert(format!("cleaned.{CLEANED_FACT_TABLE}"), rows);

        self.store.write(Tier::Cleaned, cleaned, true).await?;
        info!("🧽 Published {} cleaned rows to {}", rows, CLEANED_FACT_TABLE);
        Ok(())
    }

    /// Runs every spec concurrently over the cleaned snapshot, then publishes
    /// the successes. Returns whether all specs published.
    async fn fan_out_aggregations(&self, report: &mut RunReport) -> Result<bool> {
        let snapshot = self
            .store
            .read(Tier::Cleaned, CLEANED_FACT_TABLE)
            .await?
            .ok_or_else(|| PipelineError::MissingSource {
                table: CLEANED_FACT_TABLE.to_string(),
            })?;

        let mut tasks = JoinSet::new();
        for spec in self.specs.clone() {
            let snapshot = Arc::clone(&snapshot);
            tasks.spawn(async move {
                let name = spec.table.clone();
                (name, aggregate::aggregate(&snapshot, &spec))
            });
        }

        let mut all_published = true;
        while let Some(joined) = tasks.join_next().await {
            let (name, result) = match joined {
                Ok(output) => output,
                Err(e) => {
                    error!("Aggregation task panicked: {}", e);
                    all_published = false;
                    continue;
                }
            };
            // A failure in one spec, whether in its computation or its
            // publish, never stops the remaining specs from being attempted.
            let published = match result {
                Ok(table) => {
                    let rows = table.len();
                    match self.store.write(Tier::Aggregated, table, true).await {
                        Ok(()) => {
                            metrics::aggregate::spec_published(&name);
                            info!("📊 Published metric table '{}' ({} rows)", name, rows);
                            report
                                .stage_counts
                                .insert(format!("aggregated.{name}"), rows);
                            Ok(rows)
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            };
            match published {
                Ok(rows) => {
                    report.specs.insert(name, SpecOutcome::Published { rows });
                }
                Err(e) => {
                    error!("Metric table '{}' failed: {}", name, e);
                    metrics::aggregate::spec_failed(&name);
                    report.errors.push(e.to_string());
                    report.specs.insert(
                        name,
                        SpecOutcome::Failed {
                            error: e.to_string(),
                        },
                    );
                    all_published = false;
                }
            }
        }
        Ok(all_published)
    }
}

struct RawTables {
    order_lines: Arc<Table>,
    order_headers: Arc<Table>,
    customers: Arc<Table>,
    products: Arc<Table>,
}
