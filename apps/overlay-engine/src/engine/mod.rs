//! The calculation core: rule resolution, rollup, staged application,
//! reconciliation, and the pipeline that sequences them.

pub mod dependency;
pub mod expression;
pub mod pipeline;
pub mod predicate;
pub mod reconciliation;
pub mod resolver;
pub mod rollup;
pub mod stages;

pub use pipeline::{CalculationPipeline, PipelineConfig, RunOutcome, RunRequest};
pub use reconciliation::ReconciliationReport;
