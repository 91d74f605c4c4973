//! Domain layer - entities and value objects with no external dependencies.

pub mod fact;
pub mod hierarchy;
pub mod rule;
pub mod run;
pub mod shared;
pub mod use_case;

pub use fact::{CANONICAL_LEDGER_TABLE, FactRow, FactSchema, USE_CASE_COLUMN};
pub use hierarchy::{Hierarchy, HierarchyBridge, HierarchyNode, RollupValueSource};
pub use rule::{
    Aggregation, ArithmeticExpr, ArithmeticOp, Condition, ConditionValue, Conjunction,
    ExecutableBody, ExecutableRule, FILTER_ARITHMETIC_VERSION, FilterArithmeticDoc, Operand,
    Predicate, PredicateOp, QuerySpec, Rule, RuleBody, RuleKind, ScalarValue,
};
pub use run::{CalculatedResult, CalculationRun, NODE_ORPHAN, RunStatus};
pub use shared::{DomainError, MeasureVector};
pub use use_case::{MeasureMapping, PRIMARY_MEASURE, UseCase, UseCaseStatus};
