//! Resolve Rule Stack Use Case
//!
//! The `resolve_rule_stack` verb: show which rules surround a node — its
//! own, the ones on its ancestors — and whether Most Specific Wins would
//! shadow any of them.

use serde::Serialize;

use crate::application::Stores;
use crate::application::ports::{HierarchyStorePort, RuleStorePort, UseCaseStorePort};
use crate::domain::{Hierarchy, Rule, RuleKind};
use crate::error::CalcError;

/// A rule found on an ancestor of the requested node.
#[derive(Debug, Clone, Serialize)]
pub struct AncestorRule {
    /// The ancestor carrying the rule.
    pub node_id: String,
    /// The rule itself.
    pub rule: Rule,
}

/// The rule stack around one node.
#[derive(Debug, Clone, Serialize)]
pub struct RuleStack {
    /// The node's own rule, if any.
    pub direct: Option<Rule>,
    /// Rules on ancestors, nearest first.
    pub ancestors: Vec<AncestorRule>,
    /// Most Specific Wins will skip a SQL-style rule in this stack.
    pub has_conflict: bool,
}

/// Use case for inspecting the rule stack of a node.
pub struct ResolveRuleStackUseCase {
    stores: Stores,
}

impl ResolveRuleStackUseCase {
    /// Create the use case over a store bundle.
    #[must_use]
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Collect the rule stack for `(use_case_id, node_id)`.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` for an unknown use case or node.
    pub async fn execute(
        &self,
        use_case_id: &str,
        node_id: &str,
    ) -> Result<RuleStack, CalcError> {
        let use_case = self
            .stores
            .use_cases
            .find(use_case_id)
            .await
            .map_err(CalcError::from)?
            .ok_or_else(|| CalcError::not_found("use case", use_case_id))?;

        let nodes = self
            .stores
            .hierarchies
            .load_nodes(&use_case.structure_id)
            .await
            .map_err(CalcError::from)?;
        let hierarchy = Hierarchy::new(&use_case.structure_id, nodes)?;
        if !hierarchy.contains(node_id) {
            return Err(CalcError::not_found("node", node_id));
        }

        let all_rules = self
            .stores
            .rules
            .find_for_use_case(use_case_id)
            .await
            .map_err(CalcError::from)?;

        let direct = all_rules.iter().find(|r| r.node_id == node_id).cloned();
        let ancestors: Vec<AncestorRule> = hierarchy
            .ancestors(node_id)
            .into_iter()
            .filter_map(|ancestor| {
                all_rules
                    .iter()
                    .find(|r| r.node_id == ancestor)
                    .map(|rule| AncestorRule {
                        node_id: ancestor.to_string(),
                        rule: rule.clone(),
                    })
            })
            .collect();

        // A SQL-style rule conflicts when a SQL-style rule also exists above
        // or below it: Most Specific Wins will skip the coarser one.
        let is_sql = |rule: &Rule| rule.body.kind() != RuleKind::NodeArithmetic;
        let direct_sql = direct.as_ref().is_some_and(is_sql);
        let ancestor_sql = ancestors.iter().any(|a| is_sql(&a.rule));
        let descendant_sql = hierarchy.descendants(node_id).iter().any(|descendant| {
            all_rules
                .iter()
                .any(|r| r.node_id == *descendant && is_sql(r))
        });
        let has_conflict = direct_sql && (ancestor_sql || descendant_sql);

        Ok(RuleStack {
            direct,
            ancestors,
            has_conflict,
        })
    }
}
