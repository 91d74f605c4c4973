//! Use cases: the transport-agnostic operator verbs.

mod get_results;
mod list_runs;
mod preview_rule;
mod resolve_rule_stack;
mod run_calculation;

pub use get_results::{GetResultsUseCase, NodeTree, NodeView};
pub use list_runs::ListRunsUseCase;
pub use preview_rule::PreviewRuleUseCase;
pub use resolve_rule_stack::{AncestorRule, ResolveRuleStackUseCase, RuleStack};
pub use run_calculation::{CalculateCommand, RunCalculationUseCase};
