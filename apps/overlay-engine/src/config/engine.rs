//! Engine numeric and scheduling configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::engine::PipelineConfig;

/// Knobs for the calculation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reconciliation tolerance ε.
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,
    /// Decimal places persisted for monetary values.
    #[serde(default = "default_storage_scale")]
    pub storage_scale: u32,
    /// Per-run deadline in seconds.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

fn default_tolerance() -> Decimal {
    dec!(0.01)
}

const fn default_storage_scale() -> u32 {
    4
}

const fn default_run_timeout_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            storage_scale: default_storage_scale(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

impl EngineConfig {
    /// Translate into the pipeline's knobs.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            tolerance: self.tolerance,
            storage_scale: self.storage_scale,
            run_timeout: std::time::Duration::from_secs(self.run_timeout_secs),
        }
    }
}
