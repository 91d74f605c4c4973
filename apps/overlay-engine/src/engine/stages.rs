//! The three-stage application of rules over the Natural rollup.
//!
//! Stage 1a applies SQL-style rules (FILTER / FILTER_ARITHMETIC) bottom-up
//! under Most Specific Wins. Stage 1b executes math rules in dependency
//! order. Stage 2 waterfalls adjusted values back up the tree, skipping
//! math-ruled nodes. Stage 3 computes the per-node Plug.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::expression;
use super::predicate;
use super::rollup::NaturalRollup;
use crate::application::ports::FactStorePort;
use crate::domain::{
    ExecutableBody, ExecutableRule, FactSchema, Hierarchy, MeasureVector, QuerySpec, UseCase,
};
use crate::error::CalcError;

/// Working maps threaded through the stages.
#[derive(Debug, Clone)]
pub struct StageState {
    /// Frozen logical measure keys for this run.
    pub keys: Vec<String>,
    /// Natural values, never mutated after the rollup.
    pub natural: HashMap<String, MeasureVector>,
    /// The working map: starts as a copy of Natural.
    pub adjusted: HashMap<String, MeasureVector>,
    /// Nodes whose value was written by a Stage-1a SQL rule.
    pub applied_sql: HashSet<String>,
    /// Nodes whose final value is a math rule's result.
    pub math_ruled: HashSet<String>,
}

impl StageState {
    /// Seed the working map from the Natural rollup.
    #[must_use]
    pub fn from_rollup(use_case: &UseCase, rollup: &NaturalRollup) -> Self {
        Self {
            keys: use_case
                .measure_mapping
                .logical_names()
                .map(str::to_string)
                .collect(),
            natural: rollup.natural.clone(),
            adjusted: rollup.natural.clone(),
            applied_sql: HashSet::new(),
            math_ruled: HashSet::new(),
        }
    }

    /// Nodes whose final value a custom rule governed.
    #[must_use]
    pub fn overridden(&self) -> HashSet<String> {
        self.applied_sql.union(&self.math_ruled).cloned().collect()
    }
}

// ============================================================================
// Stage 1a - SQL-style rules, Most Specific Wins
// ============================================================================

/// Apply custom FILTER / FILTER_ARITHMETIC rules bottom-up.
///
/// Rules in `skip` (ancestors shadowed by a more specific descendant) are
/// not executed. A rule writes its own measure and zeroes the node's other
/// measures; the plug for those measures then equals their Natural.
///
/// # Errors
///
/// Propagates predicate validation, dangerous-token rejection, division by
/// zero, and store failures — all fatal for the run.
pub async fn apply_sql_rules(
    state: &mut StageState,
    use_case: &UseCase,
    schema: &FactSchema,
    rules: &[ExecutableRule],
    skip: &HashSet<String>,
    facts: &dyn FactStorePort,
) -> Result<(), CalcError> {
    for rule in rules.iter().filter(|r| r.is_custom_sql()) {
        if skip.contains(&rule.node_id) {
            debug!(
                node_id = %rule.node_id,
                "skipping ancestor rule: a descendant carries a more specific one"
            );
            continue;
        }
        let value = match &rule.body {
            ExecutableBody::Filter { predicate: p } => {
                // Render early: field whitelisting and the dangerous-token
                // scan must reject the rule before any query runs.
                predicate::to_sql(p, schema)?;
                let column = physical_measure(use_case, &rule.measure_name)?;
                facts
                    .aggregate(use_case, crate::domain::Aggregation::Sum, &column, p)
                    .await
                    .map_err(CalcError::from)?
            }
            ExecutableBody::FilterArithmetic { document } => {
                let mut results: HashMap<String, Decimal> = HashMap::new();
                for query in &document.queries {
                    let value = run_query(use_case, schema, query, facts).await?;
                    results.insert(query.query_id.clone(), value);
                }
                let context = format!("filter-arithmetic rule for node '{}'", rule.node_id);
                expression::fold_expression(&document.expression, &results, &context)?
            }
            _ => continue,
        };

        let mut vector = MeasureVector::zeroed(state.keys.iter().map(String::as_str));
        vector.set(&rule.measure_name, value);
        state.adjusted.insert(rule.node_id.clone(), vector);
        state.applied_sql.insert(rule.node_id.clone());
        debug!(node_id = %rule.node_id, measure = %rule.measure_name, %value, "applied SQL rule");
    }
    Ok(())
}

async fn run_query(
    use_case: &UseCase,
    schema: &FactSchema,
    query: &QuerySpec,
    facts: &dyn FactStorePort,
) -> Result<Decimal, CalcError> {
    let column = query_measure(use_case, schema, query)?;
    let p = predicate::from_conditions(&query.filters);
    predicate::to_sql(&p, schema)?;
    facts
        .aggregate(use_case, query.aggregation, &column, &p)
        .await
        .map_err(CalcError::from)
}

/// Resolve a rule's logical measure to its physical column.
fn physical_measure(use_case: &UseCase, logical: &str) -> Result<String, CalcError> {
    use_case
        .measure_mapping
        .physical(logical)
        .map(str::to_string)
        .ok_or_else(|| {
            CalcError::validation(format!(
                "measure '{logical}' is not mapped for use case '{}'",
                use_case.id
            ))
        })
}

/// A 2B query's measure may be a logical mapping key or a physical column.
fn query_measure(
    use_case: &UseCase,
    schema: &FactSchema,
    query: &QuerySpec,
) -> Result<String, CalcError> {
    if let Some(physical) = use_case.measure_mapping.physical(&query.measure) {
        return Ok(physical.to_string());
    }
    if schema.is_measure(&query.measure) {
        return Ok(query.measure.clone());
    }
    Err(CalcError::validation(format!(
        "query '{}' aggregates unknown measure '{}'",
        query.query_id, query.measure
    )))
}

// ============================================================================
// Stage 1b - math rules in dependency order
// ============================================================================

/// Execute math rules against the frozen calculation context.
///
/// `ordered_targets` is the topological order from the dependency resolver;
/// every rule's dependencies are final before the rule runs. Identifiers
/// absent from the context evaluate to zero with a warning.
///
/// # Errors
///
/// `Validation` on unparseable expressions; `DivisionByZero` when a divisor
/// evaluates to zero.
pub fn apply_math_rules(
    state: &mut StageState,
    rules: &[ExecutableRule],
    ordered_targets: &[String],
) -> Result<(), CalcError> {
    let by_node: HashMap<&str, &ExecutableRule> = rules
        .iter()
        .filter(|r| r.is_math())
        .map(|r| (r.node_id.as_str(), r))
        .collect();

    for target in ordered_targets {
        let Some(rule) = by_node.get(target.as_str()) else {
            continue;
        };
        let ExecutableBody::NodeArithmetic {
            expression: text,
            dependencies,
        } = &rule.body
        else {
            continue;
        };

        let ast = expression::parse(text)?;
        let used = ast.identifiers();
        let declared: HashSet<&str> = dependencies.iter().map(String::as_str).collect();
        for ident in &used {
            if !declared.contains(ident.as_str()) {
                warn!(
                    node_id = %rule.node_id,
                    identifier = %ident,
                    "expression uses an undeclared dependency"
                );
            }
            if !state.adjusted.contains_key(ident) {
                warn!(
                    node_id = %rule.node_id,
                    identifier = %ident,
                    "expression references an unknown node; it evaluates to zero"
                );
            }
        }
        for declared_dep in &declared {
            if !used.contains(*declared_dep) {
                warn!(
                    node_id = %rule.node_id,
                    dependency = %declared_dep,
                    "declared dependency is unused by the expression"
                );
            }
        }

        let context = format!("math rule for node '{}'", rule.node_id);
        let keys = state.keys.clone();
        let mut vector = MeasureVector::zeroed(keys.iter().map(String::as_str));
        for key in &keys {
            let resolve = |ident: &str| -> Decimal {
                state
                    .adjusted
                    .get(ident)
                    .or_else(|| state.natural.get(ident))
                    .map_or(Decimal::ZERO, |v| v.get(key))
            };
            vector.set(key, ast.evaluate(&resolve, &context)?);
        }
        state.adjusted.insert(rule.node_id.clone(), vector);
        state.math_ruled.insert(rule.node_id.clone());
    }
    Ok(())
}

// ============================================================================
// Stage 2 - waterfall-up
// ============================================================================

/// Re-aggregate adjusted values bottom-up by depth descending.
///
/// Math-ruled nodes keep their Stage-1b value. Every other non-leaf
/// becomes `direct + Σ children`, where the direct component is the node's
/// Stage-1a value when a SQL rule applied there, else the hybrid direct
/// share recovered from Natural bookkeeping (clamped at zero).
pub fn waterfall_up(state: &mut StageState, hierarchy: &Hierarchy) {
    for node_id in hierarchy.depth_descending() {
        let Some(node) = hierarchy.node(node_id) else {
            continue;
        };
        if node.is_leaf || state.math_ruled.contains(node_id) {
            continue;
        }

        let direct = if state.applied_sql.contains(node_id) {
            state.adjusted[node_id].clone()
        } else {
            let mut children_natural = MeasureVector::zeroed(state.keys.iter().map(String::as_str));
            for child in hierarchy.children(node_id) {
                children_natural.add_assign(&state.natural[child]);
            }
            state.natural[node_id]
                .sub(&children_natural)
                .clamp_non_negative()
        };

        let mut total = direct;
        for child in hierarchy.children(node_id) {
            total.add_assign(&state.adjusted[child]);
        }
        state.adjusted.insert(node_id.clone(), total);
    }
}

// ============================================================================
// Stage 3 - plug
// ============================================================================

/// Plug = Natural − Adjusted, per node per measure.
#[must_use]
pub fn compute_plugs(state: &StageState) -> HashMap<String, MeasureVector> {
    state
        .natural
        .iter()
        .map(|(node_id, natural)| {
            let adjusted = &state.adjusted[node_id];
            (node_id.clone(), natural.sub(adjusted))
        })
        .collect()
}
