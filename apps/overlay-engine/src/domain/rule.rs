//! Override rules and their executable forms.
//!
//! Stored rules are user-authored and keyed by `(use_case_id, node_id)` —
//! at most one per pair. The resolver derives `ExecutableRule`s from them,
//! adding synthetic auto-rollup rules that are never stored.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Supported document version for filter-arithmetic rules.
pub const FILTER_ARITHMETIC_VERSION: &str = "2.0";

// ============================================================================
// Predicates
// ============================================================================

/// Comparison operators allowed in rule predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    /// `col = value`
    Equals,
    /// `col <> value`
    NotEquals,
    /// `col IN (values)`
    In,
    /// `col NOT IN (values)`
    NotIn,
    /// `col > value`
    GreaterThan,
    /// `col < value`
    LessThan,
}

/// A single predicate value: text or exact number.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// Quoted in SQL.
    Text(String),
    /// Rendered bare in SQL.
    Number(Decimal),
}

impl Serialize for ScalarValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(s) => serializer.serialize_str(s),
            Self::Number(d) => {
                if d.fract().is_zero()
                    && let Some(i) = d.to_i64()
                {
                    serializer.serialize_i64(i)
                } else {
                    let f = d
                        .to_f64()
                        .ok_or_else(|| serde::ser::Error::custom("decimal out of f64 range"))?;
                    serializer.serialize_f64(f)
                }
            }
        }
    }
}

impl<'de> Deserialize<'de> for ScalarValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScalarVisitor;

        impl Visitor<'_> for ScalarVisitor {
            type Value = ScalarValue;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a string or a number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ScalarValue, E> {
                Ok(ScalarValue::Text(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ScalarValue, E> {
                Ok(ScalarValue::Number(Decimal::from(v)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ScalarValue, E> {
                Ok(ScalarValue::Number(Decimal::from(v)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<ScalarValue, E> {
                Decimal::try_from(v)
                    .map(ScalarValue::Number)
                    .map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

/// Right-hand side of a condition: one value or a list (for IN / NOT IN).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    /// Membership list.
    List(Vec<ScalarValue>),
    /// Single comparison value.
    Scalar(ScalarValue),
}

/// One `field <op> value` comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Fact column name; whitelisted against the fact schema.
    pub field: String,
    /// Comparison operator.
    pub operator: PredicateOp,
    /// Comparison value(s).
    pub value: ConditionValue,
}

/// A predicate tree: conditions under a single top-level conjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Top-level connective; only AND is supported.
    #[serde(default)]
    pub conjunction: Conjunction,
    /// The comparisons.
    pub conditions: Vec<Condition>,
}

/// Top-level predicate connective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Conjunction {
    /// All conditions must hold.
    #[default]
    And,
}

// ============================================================================
// Filter-arithmetic documents (Type 2B)
// ============================================================================

/// Arithmetic operators in rule expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOp {
    /// Addition.
    #[serde(rename = "+")]
    Add,
    /// Subtraction (left fold).
    #[serde(rename = "-")]
    Subtract,
    /// Multiplication.
    #[serde(rename = "*")]
    Multiply,
    /// Division (left fold); dividing by zero fails the run.
    #[serde(rename = "/")]
    Divide,
}

impl std::fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "+"),
            Self::Subtract => write!(f, "-"),
            Self::Multiply => write!(f, "*"),
            Self::Divide => write!(f, "/"),
        }
    }
}

/// Aggregation functions available to filter-arithmetic queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Aggregation {
    /// Sum of the measure.
    Sum,
    /// Mean of the measure.
    Avg,
    /// Row count.
    Count,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
}

impl Aggregation {
    /// SQL function name.
    #[must_use]
    pub const fn sql_name(&self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Count => "COUNT",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// An operand of an arithmetic expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operand {
    /// Reference to a named query's result.
    Query {
        /// Which query.
        query_id: String,
    },
    /// Literal constant.
    Constant {
        /// The value.
        value: Decimal,
    },
    /// Nested expression.
    Expression {
        /// The sub-expression.
        expression: Box<ArithmeticExpr>,
    },
}

/// A tagged arithmetic expression over query results and constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArithmeticExpr {
    /// The operator folded left-to-right over the operands.
    pub operator: ArithmeticOp,
    /// At least two operands.
    pub operands: Vec<Operand>,
}

/// One independent filter-aggregation inside a 2B document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Name the expression refers to this query by.
    pub query_id: String,
    /// Measure to aggregate: a logical mapping key or a physical column.
    pub measure: String,
    /// Aggregation function.
    pub aggregation: Aggregation,
    /// Filter conditions, ANDed.
    #[serde(default)]
    pub filters: Vec<Condition>,
}

/// A versioned filter-arithmetic document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterArithmeticDoc {
    /// Document version; only [`FILTER_ARITHMETIC_VERSION`] is accepted.
    pub version: String,
    /// The arithmetic over the queries.
    pub expression: ArithmeticExpr,
    /// The named queries.
    pub queries: Vec<QuerySpec>,
}

// ============================================================================
// Rules
// ============================================================================

/// Discriminant for rule variants, including the synthetic auto-rollup kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    /// Aggregate one measure under a predicate.
    Filter,
    /// Arithmetic over independent filter-aggregations.
    FilterArithmetic,
    /// Expression over already-computed node values (a "Math rule").
    NodeArithmetic,
    /// Virtual rollup rule derived from a node's `rollup_driver`.
    AutoSql,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filter => write!(f, "FILTER"),
            Self::FilterArithmetic => write!(f, "FILTER_ARITHMETIC"),
            Self::NodeArithmetic => write!(f, "NODE_ARITHMETIC"),
            Self::AutoSql => write!(f, "AUTO_SQL"),
        }
    }
}

/// Variant payload of a stored rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleBody {
    /// Aggregate the rule's measure under a predicate.
    Filter {
        /// The predicate tree.
        predicate: Predicate,
    },
    /// Versioned multi-query arithmetic.
    FilterArithmetic {
        /// The 2B document.
        document: FilterArithmeticDoc,
    },
    /// Expression over node values.
    NodeArithmetic {
        /// Expression over the closed grammar.
        expression: String,
        /// Node ids the expression depends on (declared set).
        dependencies: Vec<String>,
    },
}

impl RuleBody {
    /// The variant discriminant.
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        match self {
            Self::Filter { .. } => RuleKind::Filter,
            Self::FilterArithmetic { .. } => RuleKind::FilterArithmetic,
            Self::NodeArithmetic { .. } => RuleKind::NodeArithmetic,
        }
    }
}

/// A user-authored override attached to `(use_case_id, node_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Opaque identifier.
    pub id: String,
    /// Owning use case.
    pub use_case_id: String,
    /// Target hierarchy node.
    pub node_id: String,
    /// Logical measure this rule writes; must be mapped by the use case.
    pub measure_name: String,
    /// Variant payload.
    #[serde(flatten)]
    pub body: RuleBody,
    /// Last edit time; drives result staleness.
    pub last_modified_at: DateTime<Utc>,
}

/// Executable payload derived by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutableBody {
    /// Custom predicate aggregation.
    Filter {
        /// The predicate tree.
        predicate: Predicate,
    },
    /// Custom multi-query arithmetic.
    FilterArithmetic {
        /// The 2B document.
        document: FilterArithmeticDoc,
    },
    /// Custom node-value expression.
    NodeArithmetic {
        /// Expression text.
        expression: String,
        /// Declared dependency node ids.
        dependencies: Vec<String>,
    },
    /// Synthetic rollup aggregation from `rollup_driver`.
    AutoSql {
        /// Fact column to filter on.
        filter_col: String,
        /// Filter value (node id or node name).
        filter_val: String,
        /// Physical measure column to aggregate.
        target_measure: String,
    },
}

/// The single rule governing a node, as emitted by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableRule {
    /// Target node.
    pub node_id: String,
    /// Logical measure the rule writes.
    pub measure_name: String,
    /// Executable payload.
    pub body: ExecutableBody,
    /// True for synthetic auto-rollup rules.
    pub is_virtual: bool,
    /// Stored rule this was derived from; `None` for virtual rules.
    pub source_rule_id: Option<String>,
}

impl ExecutableRule {
    /// The variant discriminant.
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        match &self.body {
            ExecutableBody::Filter { .. } => RuleKind::Filter,
            ExecutableBody::FilterArithmetic { .. } => RuleKind::FilterArithmetic,
            ExecutableBody::NodeArithmetic { .. } => RuleKind::NodeArithmetic,
            ExecutableBody::AutoSql { .. } => RuleKind::AutoSql,
        }
    }

    /// True for custom SQL-style rules (FILTER / FILTER_ARITHMETIC), the
    /// kinds subject to Most Specific Wins.
    #[must_use]
    pub const fn is_custom_sql(&self) -> bool {
        matches!(
            self.body,
            ExecutableBody::Filter { .. } | ExecutableBody::FilterArithmetic { .. }
        )
    }

    /// True for math rules.
    #[must_use]
    pub const fn is_math(&self) -> bool {
        matches!(self.body, ExecutableBody::NodeArithmetic { .. })
    }
}
