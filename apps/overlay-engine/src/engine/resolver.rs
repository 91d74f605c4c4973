//! Rule resolution: one executable rule per node, custom > auto > none.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::domain::{
    DomainError, ExecutableBody, ExecutableRule, FILTER_ARITHMETIC_VERSION, FactSchema,
    Hierarchy, PRIMARY_MEASURE, Rule, RuleBody, UseCase,
};
use crate::error::CalcError;

/// Resolve the single executable rule (if any) governing each node.
///
/// Priority per node: the stored custom rule, else a virtual `AUTO_SQL`
/// rule derived from the node's `rollup_driver`, else nothing. Output is
/// ordered deepest-first, matching Stage-1 execution order.
///
/// # Errors
///
/// Fatal `Validation` on: a rule for a node outside the hierarchy, an
/// unmapped `measure_name`, a `rollup_driver` column missing from the fact
/// schema, a missing variant payload, or an unsupported 2B document
/// version.
pub fn resolve(
    use_case: &UseCase,
    hierarchy: &Hierarchy,
    schema: &FactSchema,
    stored: &[Rule],
) -> Result<Vec<ExecutableRule>, CalcError> {
    let mut by_node: HashMap<&str, &Rule> = HashMap::with_capacity(stored.len());
    for rule in stored {
        if rule.use_case_id != use_case.id {
            return Err(CalcError::validation(format!(
                "rule '{}' belongs to use case '{}', not '{}'",
                rule.id, rule.use_case_id, use_case.id
            )));
        }
        if !hierarchy.contains(&rule.node_id) {
            return Err(CalcError::validation(format!(
                "rule '{}' targets node '{}' which is not in structure '{}'",
                rule.id,
                rule.node_id,
                hierarchy.structure_id()
            )));
        }
        if by_node.insert(rule.node_id.as_str(), rule).is_some() {
            return Err(CalcError::validation(format!(
                "more than one rule stored for node '{}'",
                rule.node_id
            )));
        }
    }

    let mut resolved = Vec::new();
    for node_id in hierarchy.depth_descending() {
        if let Some(rule) = by_node.get(node_id.as_str()) {
            resolved.push(convert(use_case, hierarchy, rule)?);
            continue;
        }
        #[allow(clippy::expect_used)] // ids in depth_descending come from the node map
        let node = hierarchy.node(node_id).expect("node in traversal order");
        if let Some(driver) = &node.rollup_driver {
            if !schema.has_column(driver) {
                return Err(CalcError::validation(format!(
                    "rollup driver '{driver}' of node '{node_id}' is not a column of '{}'",
                    schema.table
                )));
            }
            resolved.push(ExecutableRule {
                node_id: node.node_id.clone(),
                measure_name: PRIMARY_MEASURE.to_string(),
                body: ExecutableBody::AutoSql {
                    filter_col: driver.clone(),
                    filter_val: node.rollup_filter_value().to_string(),
                    target_measure: auto_target_measure(use_case),
                },
                is_virtual: true,
                source_rule_id: None,
            });
        }
    }
    Ok(resolved)
}

/// The physical column auto-rollup rules aggregate: the `daily` mapping,
/// falling back to the first mapped measure.
fn auto_target_measure(use_case: &UseCase) -> String {
    use_case
        .measure_mapping
        .physical(PRIMARY_MEASURE)
        .or_else(|| use_case.measure_mapping.iter().map(|(_, p)| p).next())
        .unwrap_or(PRIMARY_MEASURE)
        .to_string()
}

fn convert(
    use_case: &UseCase,
    hierarchy: &Hierarchy,
    rule: &Rule,
) -> Result<ExecutableRule, CalcError> {
    if !use_case.measure_mapping.contains(&rule.measure_name) {
        return Err(DomainError::UnknownMeasure {
            measure: rule.measure_name.clone(),
            use_case_id: use_case.id.clone(),
        }
        .into());
    }

    let body = match &rule.body {
        RuleBody::Filter { predicate } => ExecutableBody::Filter {
            predicate: predicate.clone(),
        },
        RuleBody::FilterArithmetic { document } => {
            if document.version != FILTER_ARITHMETIC_VERSION {
                return Err(CalcError::validation(format!(
                    "rule '{}': unsupported document version '{}'",
                    rule.id, document.version
                )));
            }
            if document.queries.is_empty() {
                return Err(DomainError::MissingRulePayload {
                    rule_id: rule.id.clone(),
                    reason: "filter-arithmetic document has no queries".to_string(),
                }
                .into());
            }
            ExecutableBody::FilterArithmetic {
                document: document.clone(),
            }
        }
        RuleBody::NodeArithmetic {
            expression,
            dependencies,
        } => {
            if expression.trim().is_empty() {
                return Err(DomainError::MissingRulePayload {
                    rule_id: rule.id.clone(),
                    reason: "node-arithmetic rule has no expression".to_string(),
                }
                .into());
            }
            for dep in dependencies {
                if !hierarchy.contains(dep) {
                    warn!(
                        rule_id = %rule.id,
                        dependency = %dep,
                        "declared dependency is not in the hierarchy; it will evaluate to zero"
                    );
                }
            }
            ExecutableBody::NodeArithmetic {
                expression: expression.clone(),
                dependencies: dependencies.clone(),
            }
        }
    };

    Ok(ExecutableRule {
        node_id: rule.node_id.clone(),
        measure_name: rule.measure_name.clone(),
        body,
        is_virtual: false,
        source_rule_id: Some(rule.id.clone()),
    })
}

/// Most Specific Wins: custom SQL-style rules whose subtree contains
/// another custom SQL-style rule are skipped during Stage 1a.
#[must_use]
pub fn sql_skip_set(hierarchy: &Hierarchy, rules: &[ExecutableRule]) -> HashSet<String> {
    let sql_nodes: HashSet<&str> = rules
        .iter()
        .filter(|r| r.is_custom_sql())
        .map(|r| r.node_id.as_str())
        .collect();

    sql_nodes
        .iter()
        .filter(|node_id| {
            hierarchy
                .descendants(node_id)
                .iter()
                .any(|d| sql_nodes.contains(d))
        })
        .map(|node_id| (*node_id).to_string())
        .collect()
}
