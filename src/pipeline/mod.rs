pub mod aggregate;
pub mod coordinator;
pub mod dedupe;
pub mod ingest;
pub mod join;
pub mod quality;

pub use coordinator::{PipelineCoordinator, RunReport, RunState, SpecOutcome};
