//! Get Results Use Case
//!
//! The `get_results` verb: materialise a run's results as a node tree
//! carrying Natural, Adjusted and Plug per measure, flagged stale when
//! rules changed after the run executed.

use std::collections::HashMap;

use chrono::Duration;
use serde::Serialize;

use crate::application::Stores;
use crate::application::ports::{
    HierarchyStorePort, ResultStorePort, RuleStorePort, UseCaseStorePort,
};
use crate::domain::{
    CalculatedResult, CalculationRun, Hierarchy, MeasureVector, NODE_ORPHAN,
};
use crate::error::CalcError;

/// Grace window absorbing clock skew between rule edits and run stamps.
const STALENESS_GRACE_SECS: i64 = 2;

/// One node of the result tree.
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    /// Node id.
    pub node_id: String,
    /// Display name.
    pub node_name: String,
    /// Depth in the tree.
    pub depth: u32,
    /// Rollup of raw facts.
    pub natural: MeasureVector,
    /// Value under the use case's rules.
    pub adjusted: MeasureVector,
    /// Natural − Adjusted.
    pub plug: MeasureVector,
    /// A custom rule governed this node.
    pub is_override: bool,
    /// Every measure's plug within tolerance.
    pub is_reconciled: bool,
    /// Child subtrees.
    pub children: Vec<NodeView>,
}

/// A run's results as a tree, plus run-level flags.
#[derive(Debug, Clone, Serialize)]
pub struct NodeTree {
    /// The run the tree was built from.
    pub run_id: String,
    /// Owning use case.
    pub use_case_id: String,
    /// Rules were edited after this run executed.
    pub is_outdated: bool,
    /// Orphan residual, when the run recorded one.
    pub orphan: Option<MeasureVector>,
    /// The root subtree.
    pub root: NodeView,
}

/// Use case for reading calculated results.
pub struct GetResultsUseCase {
    stores: Stores,
    staleness_grace: Duration,
}

impl GetResultsUseCase {
    /// Create the use case over a store bundle.
    #[must_use]
    pub fn new(stores: Stores) -> Self {
        Self {
            stores,
            staleness_grace: Duration::seconds(STALENESS_GRACE_SECS),
        }
    }

    /// Build the result tree for a run (most recent completed run when
    /// `run_id` is omitted).
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` when the use case, run, or results are absent;
    /// `Validation` when the run belongs to a different use case.
    pub async fn execute(
        &self,
        use_case_id: &str,
        run_id: Option<&str>,
    ) -> Result<NodeTree, CalcError> {
        let use_case = self
            .stores
            .use_cases
            .find(use_case_id)
            .await
            .map_err(CalcError::from)?
            .ok_or_else(|| CalcError::not_found("use case", use_case_id))?;

        let run = match run_id {
            Some(id) => self
                .stores
                .results
                .find_run(id)
                .await
                .map_err(CalcError::from)?
                .ok_or_else(|| CalcError::not_found("run", id))?,
            None => self
                .stores
                .results
                .latest_completed_run(use_case_id)
                .await
                .map_err(CalcError::from)?
                .ok_or_else(|| {
                    CalcError::not_found("completed run for use case", use_case_id)
                })?,
        };
        if run.use_case_id != use_case.id {
            return Err(CalcError::validation(format!(
                "run '{}' belongs to use case '{}'",
                run.run_id, run.use_case_id
            )));
        }

        let results = self
            .stores
            .results
            .load_results(&run.run_id)
            .await
            .map_err(CalcError::from)?;
        if results.is_empty() {
            return Err(CalcError::not_found("results for run", &run.run_id));
        }

        let nodes = self
            .stores
            .hierarchies
            .load_nodes(&use_case.structure_id)
            .await
            .map_err(CalcError::from)?;
        let hierarchy = Hierarchy::new(&use_case.structure_id, nodes)?;

        let by_node: HashMap<&str, &CalculatedResult> = results
            .iter()
            .map(|r| (r.node_id.as_str(), r))
            .collect();
        let orphan = by_node
            .get(NODE_ORPHAN)
            .map(|r| r.plug_vector.clone());

        let is_outdated = self.is_outdated(&run).await?;
        let root = build_view(&hierarchy, &hierarchy.root().node_id, &by_node, &use_case);

        Ok(NodeTree {
            run_id: run.run_id.clone(),
            use_case_id: use_case.id.clone(),
            is_outdated,
            orphan,
            root,
        })
    }

    /// A result is stale when any rule was edited after the run executed
    /// (with a small grace window for clock skew).
    async fn is_outdated(&self, run: &CalculationRun) -> Result<bool, CalcError> {
        let latest = self
            .stores
            .rules
            .latest_modification(&run.use_case_id)
            .await
            .map_err(CalcError::from)?;
        Ok(latest.is_some_and(|edited| edited > run.executed_at + self.staleness_grace))
    }
}

fn build_view(
    hierarchy: &Hierarchy,
    node_id: &str,
    by_node: &HashMap<&str, &CalculatedResult>,
    use_case: &crate::domain::UseCase,
) -> NodeView {
    let zero = || MeasureVector::zeroed(use_case.measure_mapping.logical_names());
    let (adjusted, plug, is_override, is_reconciled) = by_node.get(node_id).map_or_else(
        || (zero(), zero(), false, true),
        |r| {
            (
                r.measure_vector.clone(),
                r.plug_vector.clone(),
                r.is_override,
                r.is_reconciled,
            )
        },
    );

    #[allow(clippy::expect_used)] // traversal only visits ids from the node map
    let node = hierarchy.node(node_id).expect("node in hierarchy");
    NodeView {
        node_id: node.node_id.clone(),
        node_name: node.node_name.clone(),
        depth: node.depth,
        natural: adjusted.add(&plug),
        adjusted,
        plug,
        is_override,
        is_reconciled,
        children: hierarchy
            .children(node_id)
            .iter()
            .map(|child| build_view(hierarchy, child, by_node, use_case))
            .collect(),
    }
}
