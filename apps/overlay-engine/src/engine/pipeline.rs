//! The calculation pipeline: one sequential run from rule resolution to
//! persisted, reconciled results.
//!
//! Stage order is fixed: resolve → load → natural rollup → Stage 1a →
//! Stage 1b → waterfall → plug → persist → verify. A run is cancellable
//! only at stage boundaries; cancellation (or the per-run deadline) marks
//! the run FAILED and nothing is written.

use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::dependency::{DependencyEntry, topological_order};
use super::reconciliation::{self, ReconciliationReport};
use super::resolver;
use super::rollup::natural_rollup;
use super::stages::{self, StageState};
use crate::application::ports::{
    FactStorePort, HierarchyStorePort, ResultStorePort, RuleStorePort,
};
use crate::domain::{
    CalculatedResult, CalculationRun, ExecutableBody, Hierarchy, MeasureVector, NODE_ORPHAN,
    UseCase,
};
use crate::error::CalcError;

/// Numeric and scheduling knobs for a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Reconciliation tolerance ε.
    pub tolerance: Decimal,
    /// Decimal places persisted; rounding happens once, here.
    pub storage_scale: u32,
    /// Per-run deadline.
    pub run_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tolerance: dec!(0.01),
            storage_scale: 4,
            run_timeout: Duration::from_secs(300),
        }
    }
}

/// Caller-supplied parameters for one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Business date to calculate for.
    pub pnl_date: String,
    /// Display name for the run receipt.
    pub name: String,
    /// Who or what triggered the run.
    pub triggered_by: String,
    /// Cooperative cancellation, observed at stage boundaries.
    pub cancel: CancellationToken,
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The run receipt, in COMPLETED state.
    pub run: CalculationRun,
    /// Persisted per-node results (plus the orphan row when present).
    pub results: Vec<CalculatedResult>,
    /// Reconciliation report, already reflected in the run's anomaly field.
    pub report: ReconciliationReport,
}

/// The hybrid waterfall calculation engine.
#[derive(Debug, Clone, Default)]
pub struct CalculationPipeline {
    config: PipelineConfig,
}

impl CalculationPipeline {
    /// Create a pipeline with the given knobs.
    #[must_use]
    pub const fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Execute one run for a use case.
    ///
    /// On success the run record transitions to COMPLETED (annotated with
    /// any reconciliation anomaly). On any fatal error the run record
    /// transitions to FAILED with a reason and no results are persisted.
    ///
    /// # Errors
    ///
    /// Returns the single classified [`CalcError`] that aborted the run.
    pub async fn execute(
        &self,
        use_case: &UseCase,
        request: RunRequest,
        facts: &dyn FactStorePort,
        hierarchies: &dyn HierarchyStorePort,
        rules: &dyn RuleStorePort,
        results: &dyn ResultStorePort,
    ) -> Result<RunOutcome, CalcError> {
        let started = Instant::now();
        let mut run = CalculationRun::start(
            &use_case.id,
            &request.pnl_date,
            &request.name,
            &request.triggered_by,
        );
        results.create_run(&run).await.map_err(CalcError::from)?;
        info!(run_id = %run.run_id, use_case = %use_case.id, "calculation run started");

        let deadline = started + self.config.run_timeout;
        match self
            .run_stages(use_case, &run, &request.cancel, deadline, facts, hierarchies, rules, results)
            .await
        {
            Ok((node_results, report)) => {
                let elapsed = elapsed_ms(started);
                run.complete(elapsed, report.anomaly());
                results.update_run(&run).await.map_err(CalcError::from)?;
                info!(
                    run_id = %run.run_id,
                    duration_ms = elapsed,
                    nodes = node_results.len(),
                    reconciled = report.root_reconciled && report.complete,
                    "calculation run completed"
                );
                Ok(RunOutcome {
                    run,
                    results: node_results,
                    report,
                })
            }
            Err(err) => {
                let elapsed = elapsed_ms(started);
                run.fail(&format!("{}: {err}", err.reason()), elapsed);
                // Best effort: the original error is what the caller needs.
                if let Err(update_err) = results.update_run(&run).await {
                    warn!(run_id = %run.run_id, error = %update_err, "failed to record run failure");
                }
                info!(run_id = %run.run_id, reason = err.reason(), "calculation run failed");
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stages(
        &self,
        use_case: &UseCase,
        run: &CalculationRun,
        cancel: &CancellationToken,
        deadline: Instant,
        facts_store: &dyn FactStorePort,
        hierarchies: &dyn HierarchyStorePort,
        rules_store: &dyn RuleStorePort,
        results_store: &dyn ResultStorePort,
    ) -> Result<(Vec<CalculatedResult>, ReconciliationReport), CalcError> {
        // Load snapshots; concurrent edits are not observed past this point.
        let nodes = hierarchies
            .load_nodes(&use_case.structure_id)
            .await
            .map_err(CalcError::from)?;
        let hierarchy = Hierarchy::new(&use_case.structure_id, nodes)?;
        let schema = facts_store
            .fact_schema(use_case)
            .await
            .map_err(CalcError::from)?;
        let stored_rules = rules_store
            .find_for_use_case(&use_case.id)
            .await
            .map_err(CalcError::from)?;
        let resolved = resolver::resolve(use_case, &hierarchy, &schema, &stored_rules)?;
        let facts = facts_store
            .load_facts(use_case)
            .await
            .map_err(CalcError::from)?;

        let rollup = natural_rollup(use_case, &hierarchy, &schema, &facts)?;
        let mut state = StageState::from_rollup(use_case, &rollup);

        checkpoint(cancel, deadline, "stage-1a")?;
        let skip = resolver::sql_skip_set(&hierarchy, &resolved);
        stages::apply_sql_rules(&mut state, use_case, &schema, &resolved, &skip, facts_store)
            .await?;

        checkpoint(cancel, deadline, "stage-1b")?;
        let entries: Vec<DependencyEntry> = resolved
            .iter()
            .filter_map(|rule| match &rule.body {
                ExecutableBody::NodeArithmetic { dependencies, .. } => Some(DependencyEntry {
                    target: rule.node_id.clone(),
                    dependencies: dependencies.clone(),
                }),
                _ => None,
            })
            .collect();
        let order = topological_order(&entries)?;
        stages::apply_math_rules(&mut state, &resolved, &order)?;

        checkpoint(cancel, deadline, "stage-2")?;
        stages::waterfall_up(&mut state, &hierarchy);

        checkpoint(cancel, deadline, "stage-3")?;
        let plugs = stages::compute_plugs(&state);
        let report =
            reconciliation::verify(use_case, &hierarchy, &facts, &state.natural, self.config.tolerance);

        let overridden = state.overridden();
        let scale = self.config.storage_scale;
        let mut node_results: Vec<CalculatedResult> = Vec::with_capacity(hierarchy.len() + 1);
        for node_id in hierarchy.depth_descending() {
            let plug = &plugs[node_id];
            node_results.push(CalculatedResult {
                run_id: run.run_id.clone(),
                node_id: node_id.clone(),
                measure_vector: state.adjusted[node_id].round_dp(scale),
                plug_vector: plug.round_dp(scale),
                is_override: overridden.contains(node_id),
                is_reconciled: plug.within(self.config.tolerance),
            });
        }
        if report.has_orphan() {
            // The residual rides as pure plug on the synthetic bucket.
            node_results.push(CalculatedResult {
                run_id: run.run_id.clone(),
                node_id: NODE_ORPHAN.to_string(),
                measure_vector: MeasureVector::zeroed(use_case.measure_mapping.logical_names()),
                plug_vector: report.orphan.round_dp(scale),
                is_override: false,
                is_reconciled: false,
            });
        }

        checkpoint(cancel, deadline, "persist")?;
        results_store
            .save_results(&node_results)
            .await
            .map_err(CalcError::from)?;

        Ok((node_results, report))
    }
}

fn checkpoint(
    cancel: &CancellationToken,
    deadline: Instant,
    stage: &'static str,
) -> Result<(), CalcError> {
    if cancel.is_cancelled() || Instant::now() > deadline {
        return Err(CalcError::Cancelled { stage });
    }
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::ports::{
        FactTable, InMemoryFactStore, InMemoryHierarchyStore, InMemoryResultStore,
        InMemoryRuleStore,
    };
    use crate::domain::{
        FactRow, FactSchema, HierarchyNode, MeasureMapping, RollupValueSource, Rule, RuleBody,
        RunStatus, UseCaseStatus,
    };

    fn node(id: &str, parent: Option<&str>, depth: u32, is_leaf: bool) -> HierarchyNode {
        HierarchyNode {
            node_id: id.to_string(),
            parent_node_id: parent.map(str::to_string),
            node_name: id.to_string(),
            depth,
            is_leaf,
            structure_id: "s1".to_string(),
            rollup_driver: None,
            rollup_value_source: RollupValueSource::NodeId,
        }
    }

    fn use_case() -> UseCase {
        UseCase {
            id: "uc1".to_string(),
            name: "Test".to_string(),
            owner: "desk".to_string(),
            structure_id: "s1".to_string(),
            input_table_name: None,
            measure_mapping: MeasureMapping::new([("daily", "daily_pnl")]),
            status: UseCaseStatus::Active,
        }
    }

    fn request() -> RunRequest {
        RunRequest {
            pnl_date: "2025-06-30".to_string(),
            name: "eod".to_string(),
            triggered_by: "test".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    struct Fixture {
        facts: InMemoryFactStore,
        hierarchies: InMemoryHierarchyStore,
        rules: InMemoryRuleStore,
        results: InMemoryResultStore,
    }

    fn fixture() -> Fixture {
        let schema = FactSchema {
            table: crate::domain::CANONICAL_LEDGER_TABLE.to_string(),
            leaf_column: "leaf_id".to_string(),
            dimension_columns: vec!["use_case_id".to_string()],
            measure_columns: vec!["daily_pnl".to_string()],
        };
        let mut rows = Vec::new();
        for (leaf, daily) in [("L1", dec!(100)), ("L2", dec!(40))] {
            let mut row = FactRow::default();
            row.dimensions
                .insert("use_case_id".to_string(), "uc1".to_string());
            row.dimensions.insert("leaf_id".to_string(), leaf.to_string());
            row.measures.insert("daily_pnl".to_string(), daily);
            rows.push(row);
        }
        let facts = InMemoryFactStore::new();
        facts.insert_table(FactTable { schema, rows });

        let hierarchies = InMemoryHierarchyStore::new();
        hierarchies.insert_structure(
            "s1",
            vec![
                node("R", None, 0, false),
                node("L1", Some("R"), 1, true),
                node("L2", Some("R"), 1, true),
            ],
        );

        Fixture {
            facts,
            hierarchies,
            rules: InMemoryRuleStore::new(),
            results: InMemoryResultStore::new(),
        }
    }

    #[tokio::test]
    async fn identity_run_completes_with_zero_plug() {
        let f = fixture();
        let pipeline = CalculationPipeline::default();
        let outcome = pipeline
            .execute(&use_case(), request(), &f.facts, &f.hierarchies, &f.rules, &f.results)
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Completed);
        assert!(outcome.run.anomaly.is_none());
        let root = outcome
            .results
            .iter()
            .find(|r| r.node_id == "R")
            .unwrap();
        assert_eq!(root.measure_vector.get("daily"), dec!(140));
        assert!(root.plug_vector.is_zero());
        assert!(outcome.results.iter().all(|r| !r.is_override));
        assert!(outcome.results.iter().all(|r| r.is_reconciled));
    }

    #[tokio::test]
    async fn failed_run_persists_no_results() {
        let f = fixture();
        // A math rule dividing by a zero-valued node.
        f.rules.upsert(Rule {
            id: "r1".to_string(),
            use_case_id: "uc1".to_string(),
            node_id: "L1".to_string(),
            measure_name: "daily".to_string(),
            body: RuleBody::NodeArithmetic {
                expression: "L2 / (L2 - L2)".to_string(),
                dependencies: vec!["L2".to_string()],
            },
            last_modified_at: chrono::Utc::now(),
        });
        let pipeline = CalculationPipeline::default();
        let err = pipeline
            .execute(&use_case(), request(), &f.facts, &f.hierarchies, &f.rules, &f.results)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "DIVISION_BY_ZERO");

        let runs = f.results.list_runs(Some("uc1"), None).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].failure_reason.as_deref().unwrap().contains("DIVISION_BY_ZERO"));
        assert!(f.results.load_results(&runs[0].run_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_fails_before_writing() {
        let f = fixture();
        let mut req = request();
        req.cancel = CancellationToken::new();
        req.cancel.cancel();
        let pipeline = CalculationPipeline::default();
        let err = pipeline
            .execute(&use_case(), req, &f.facts, &f.hierarchies, &f.rules, &f.results)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "CANCELLED");

        let runs = f.results.list_runs(Some("uc1"), None).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(f.results.load_results(&runs[0].run_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn orphan_facts_produce_synthetic_row_and_anomaly() {
        let f = fixture();
        // Add a fact for a leaf outside the hierarchy.
        let schema = f.facts.fact_schema(&use_case()).await.unwrap();
        let mut row = FactRow::default();
        row.dimensions
            .insert("use_case_id".to_string(), "uc1".to_string());
        row.dimensions.insert("leaf_id".to_string(), "GHOST".to_string());
        row.measures.insert("daily_pnl".to_string(), dec!(25));
        let mut rows = f.facts.load_facts(&use_case()).await.unwrap();
        rows.push(row);
        f.facts.insert_table(FactTable { schema, rows });

        let pipeline = CalculationPipeline::default();
        let outcome = pipeline
            .execute(&use_case(), request(), &f.facts, &f.hierarchies, &f.rules, &f.results)
            .await
            .unwrap();

        // Non-fatal: the run completes, annotated.
        assert_eq!(outcome.run.status, RunStatus::Completed);
        assert!(outcome.run.anomaly.as_deref().unwrap().contains("orphan"));
        let orphan_row = outcome
            .results
            .iter()
            .find(|r| r.node_id == NODE_ORPHAN)
            .unwrap();
        assert_eq!(orphan_row.plug_vector.get("daily"), dec!(25));
        assert!(orphan_row.measure_vector.is_zero());
        assert!(!orphan_row.is_reconciled);
    }

    #[tokio::test]
    async fn missing_structure_is_a_store_error() {
        let f = fixture();
        let mut uc = use_case();
        uc.structure_id = "ghost".to_string();
        let pipeline = CalculationPipeline::default();
        let err = pipeline
            .execute(&uc, request(), &f.facts, &f.hierarchies, &f.rules, &f.results)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "STORE");
    }
}
