//! Three-tier batch transformation pipeline for retail order extracts.
//!
//! Raw extracts are ingested unmodified into the raw tier, joined and
//! cleaned through a declarative quality gate into the cleaned tier, and
//! fanned out into derived metric tables in the aggregated tier. All tier
//! writes go through an atomic full-table replace, so readers never see a
//! half-written run.

pub mod common;
pub mod config;
pub mod domain;
pub mod extract;
pub mod observability;
pub mod pipeline;
pub mod storage;

pub use common::error::{PipelineError, Result};
pub use config::PipelineConfig;
pub use pipeline::{PipelineCoordinator, RunReport, RunState, SpecOutcome};
pub use storage::{InMemoryTierStore, Tier, TierStore};
