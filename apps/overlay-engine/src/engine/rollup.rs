//! Natural rollup: per-node values from facts alone, ignoring custom rules.

use std::collections::HashMap;

use crate::domain::{
    CANONICAL_LEDGER_TABLE, FactRow, FactSchema, Hierarchy, MeasureVector, UseCase,
};
use crate::error::CalcError;

/// Per-node Natural values plus the direct-fact component used for hybrid
/// bookkeeping.
#[derive(Debug, Clone)]
pub struct NaturalRollup {
    /// Bottom-up rollup of raw facts per node.
    pub natural: HashMap<String, MeasureVector>,
    /// Each node's own facts (clamped at zero for non-leaves), before
    /// children are added.
    pub direct: HashMap<String, MeasureVector>,
}

/// Compute Natural values for every node.
///
/// Two paths, chosen by the use case's table shape: the legacy path keys
/// leaves by the ledger's leaf column; the strategy path matches each
/// node's `rollup_driver` column, which also supports hybrid parents that
/// hold direct facts *and* aggregate children.
///
/// # Errors
///
/// Fatal `Validation` when a mapped measure column is missing from the
/// fact schema. Facts referencing a leaf outside the hierarchy are ignored
/// here; the completeness check surfaces them.
pub fn natural_rollup(
    use_case: &UseCase,
    hierarchy: &Hierarchy,
    schema: &FactSchema,
    facts: &[FactRow],
) -> Result<NaturalRollup, CalcError> {
    for (logical, physical) in use_case.measure_mapping.iter() {
        if !schema.is_measure(physical) {
            return Err(CalcError::validation(format!(
                "measure '{logical}' maps to column '{physical}' which is missing from '{}'",
                schema.table
            )));
        }
    }

    let keys: Vec<&str> = use_case.measure_mapping.logical_names().collect();
    let mut direct: HashMap<String, MeasureVector> = hierarchy
        .nodes()
        .map(|n| (n.node_id.clone(), MeasureVector::zeroed(keys.clone())))
        .collect();

    if use_strategy_path(use_case) {
        accumulate_by_driver(use_case, hierarchy, facts, &mut direct);
    } else {
        accumulate_by_leaf(use_case, hierarchy, schema, facts, &mut direct);
    }

    // Negative direct value on a parent can only come from double-counted
    // inconsistent data; clamp it out of the rollup.
    for node in hierarchy.nodes() {
        if !node.is_leaf
            && let Some(vector) = direct.get_mut(&node.node_id)
        {
            *vector = vector.clamp_non_negative();
        }
    }

    // Bottom-up: children are always processed before their parent.
    let mut natural: HashMap<String, MeasureVector> = HashMap::with_capacity(direct.len());
    for node_id in hierarchy.depth_descending() {
        let mut total = direct[node_id].clone();
        for child in hierarchy.children(node_id) {
            total.add_assign(&natural[child]);
        }
        natural.insert(node_id.clone(), total);
    }

    Ok(NaturalRollup { natural, direct })
}

fn use_strategy_path(use_case: &UseCase) -> bool {
    use_case
        .input_table_name
        .as_deref()
        .is_some_and(|table| table != CANONICAL_LEDGER_TABLE)
}

/// Legacy path: leaves own the facts whose leaf column carries their id.
fn accumulate_by_leaf(
    use_case: &UseCase,
    hierarchy: &Hierarchy,
    schema: &FactSchema,
    facts: &[FactRow],
    direct: &mut HashMap<String, MeasureVector>,
) {
    for row in facts {
        let Some(leaf_id) = row.dimension(&schema.leaf_column) else {
            continue;
        };
        let Some(node) = hierarchy.node(leaf_id) else {
            continue; // orphan fact, surfaced by the completeness check
        };
        if !node.is_leaf {
            continue;
        }
        let Some(vector) = direct.get_mut(leaf_id) else {
            continue;
        };
        for (logical, physical) in use_case.measure_mapping.iter() {
            vector.set(logical, vector.get(logical) + row.measure(physical));
        }
    }
}

/// Strategy path: every driver-declaring node matches facts directly.
fn accumulate_by_driver(
    use_case: &UseCase,
    hierarchy: &Hierarchy,
    facts: &[FactRow],
    direct: &mut HashMap<String, MeasureVector>,
) {
    for node in hierarchy.nodes() {
        let Some(driver) = &node.rollup_driver else {
            continue;
        };
        let filter_val = node.rollup_filter_value();
        let Some(vector) = direct.get_mut(&node.node_id) else {
            continue;
        };
        for row in facts {
            if row.dimension(driver) != Some(filter_val) {
                continue;
            }
            for (logical, physical) in use_case.measure_mapping.iter() {
                vector.set(logical, vector.get(logical) + row.measure(physical));
            }
        }
    }
}
