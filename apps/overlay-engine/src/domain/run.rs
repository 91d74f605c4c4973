//! Calculation runs and their persisted results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::shared::MeasureVector;

/// Synthetic node id that absorbs ledger value unaccounted for by any leaf.
pub const NODE_ORPHAN: &str = "NODE_ORPHAN";

/// Lifecycle status of a calculation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Pipeline is executing.
    InProgress,
    /// Results persisted and reconciliation checked.
    Completed,
    /// Aborted; partial results rolled back.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// A run receipt: one execution of the calculation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationRun {
    /// Opaque run id.
    pub run_id: String,
    /// Business date the run calculates for.
    pub pnl_date: String,
    /// Owning use case.
    pub use_case_id: String,
    /// Display name.
    pub name: String,
    /// When the run started.
    pub executed_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Who or what triggered the run.
    pub triggered_by: String,
    /// Wall-clock duration, filled on completion.
    pub duration_ms: Option<u64>,
    /// Reason string when the run failed.
    pub failure_reason: Option<String>,
    /// Reconciliation anomaly noted on an otherwise completed run.
    pub anomaly: Option<String>,
}

impl CalculationRun {
    /// Start a new run in `IN_PROGRESS`.
    #[must_use]
    pub fn start(use_case_id: &str, pnl_date: &str, name: &str, triggered_by: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            pnl_date: pnl_date.to_string(),
            use_case_id: use_case_id.to_string(),
            name: name.to_string(),
            executed_at: Utc::now(),
            status: RunStatus::InProgress,
            triggered_by: triggered_by.to_string(),
            duration_ms: None,
            failure_reason: None,
            anomaly: None,
        }
    }

    /// Transition to `COMPLETED`, recording duration and any anomaly.
    pub fn complete(&mut self, duration_ms: u64, anomaly: Option<String>) {
        self.status = RunStatus::Completed;
        self.duration_ms = Some(duration_ms);
        self.anomaly = anomaly;
    }

    /// Transition to `FAILED` with a reason.
    pub fn fail(&mut self, reason: &str, duration_ms: u64) {
        self.status = RunStatus::Failed;
        self.duration_ms = Some(duration_ms);
        self.failure_reason = Some(reason.to_string());
    }
}

/// Per-node outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculatedResult {
    /// Owning run.
    pub run_id: String,
    /// Hierarchy node (or [`NODE_ORPHAN`]).
    pub node_id: String,
    /// Adjusted values per measure.
    pub measure_vector: MeasureVector,
    /// Natural − Adjusted per measure.
    pub plug_vector: MeasureVector,
    /// A custom rule governed this node's final value.
    pub is_override: bool,
    /// Every measure's plug is within tolerance.
    pub is_reconciled: bool,
}

impl CalculatedResult {
    /// Recover the Natural vector (`adjusted + plug`).
    #[must_use]
    pub fn natural_vector(&self) -> MeasureVector {
        self.measure_vector.add(&self.plug_vector)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn run_lifecycle() {
        let mut run = CalculationRun::start("uc1", "2025-06-30", "eod", "scheduler");
        assert_eq!(run.status, RunStatus::InProgress);
        assert!(run.duration_ms.is_none());

        run.complete(120, None);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.duration_ms, Some(120));
        assert!(run.failure_reason.is_none());
    }

    #[test]
    fn run_failure_records_reason() {
        let mut run = CalculationRun::start("uc1", "2025-06-30", "eod", "cli");
        run.fail("division by zero in rule for node 'X'", 15);
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.failure_reason.unwrap().contains("division by zero"));
    }

    #[test]
    fn status_display() {
        assert_eq!(RunStatus::InProgress.to_string(), "IN_PROGRESS");
        assert_eq!(RunStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(RunStatus::Failed.to_string(), "FAILED");
    }

    #[test]
    fn natural_is_adjusted_plus_plug() {
        let result = CalculatedResult {
            run_id: "r".to_string(),
            node_id: "L1".to_string(),
            measure_vector: MeasureVector::from_pairs([("daily", dec!(70))]),
            plug_vector: MeasureVector::from_pairs([("daily", dec!(30))]),
            is_override: true,
            is_reconciled: false,
        };
        assert_eq!(result.natural_vector().get("daily"), dec!(100));
    }
}
