//! Reconciliation: binding engine output back to the source ledger.
//!
//! Two checks, both non-fatal: the root check compares the ledger total to
//! the root's Natural value (failure means facts were lost between loader
//! and rollup); the completeness check compares the ledger total to the
//! leaf Naturals and assigns any residual to a synthetic `NODE_ORPHAN`
//! result row so no dollar disappears.

use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::{FactRow, Hierarchy, MeasureVector, UseCase};

/// Outcome of the reconciliation checks for one run.
#[derive(Debug, Clone)]
pub struct ReconciliationReport {
    /// Total ledger value per measure, within the use case's scope.
    pub ledger_totals: MeasureVector,
    /// Ledger total − Natural at the root.
    pub root_delta: MeasureVector,
    /// Ledger total − Σ leaf Naturals; the orphan residual.
    pub orphan: MeasureVector,
    /// Root check within tolerance.
    pub root_reconciled: bool,
    /// Completeness check within tolerance.
    pub complete: bool,
}

impl ReconciliationReport {
    /// Human-readable anomaly annotation, `None` when both checks pass.
    #[must_use]
    pub fn anomaly(&self) -> Option<String> {
        let mut notes = Vec::new();
        if !self.root_reconciled {
            notes.push(format!("root reconciliation delta {}", self.root_delta));
        }
        if !self.complete {
            notes.push(format!("orphan residual {}", self.orphan));
        }
        if notes.is_empty() {
            None
        } else {
            Some(notes.join("; "))
        }
    }

    /// Whether the orphan residual needs a synthetic result row.
    #[must_use]
    pub fn has_orphan(&self) -> bool {
        !self.complete
    }
}

/// Sum the mapped measures over the loaded fact snapshot.
#[must_use]
pub fn ledger_totals(use_case: &UseCase, facts: &[FactRow]) -> MeasureVector {
    let mut totals = MeasureVector::zeroed(use_case.measure_mapping.logical_names());
    for row in facts {
        for (logical, physical) in use_case.measure_mapping.iter() {
            totals.set(logical, totals.get(logical) + row.measure(physical));
        }
    }
    totals
}

/// Run both reconciliation checks against the Natural rollup.
#[must_use]
pub fn verify(
    use_case: &UseCase,
    hierarchy: &Hierarchy,
    facts: &[FactRow],
    natural: &std::collections::HashMap<String, MeasureVector>,
    tolerance: Decimal,
) -> ReconciliationReport {
    let totals = ledger_totals(use_case, facts);

    let root_natural = natural
        .get(&hierarchy.root().node_id)
        .cloned()
        .unwrap_or_else(|| MeasureVector::zeroed(use_case.measure_mapping.logical_names()));
    let root_delta = totals.sub(&root_natural);
    let root_reconciled = root_delta.within(tolerance);

    let mut leaf_total = MeasureVector::zeroed(use_case.measure_mapping.logical_names());
    for leaf in hierarchy.leaves() {
        if let Some(vector) = natural.get(&leaf.node_id) {
            leaf_total.add_assign(vector);
        }
    }
    let orphan = totals.sub(&leaf_total);
    let complete = orphan.within(tolerance);

    if !root_reconciled {
        warn!(
            use_case = %use_case.id,
            delta = %root_delta,
            "ledger total does not reconcile to the root"
        );
    }
    if !complete {
        warn!(
            use_case = %use_case.id,
            orphan = %orphan,
            "ledger value unaccounted for by any leaf"
        );
    }

    ReconciliationReport {
        ledger_totals: totals,
        root_delta,
        orphan,
        root_reconciled,
        complete,
    }
}
