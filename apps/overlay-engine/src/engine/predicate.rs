//! Predicate handling: JSON predicate trees to SQL WHERE fragments.
//!
//! Fields are whitelisted against the use case's fact schema, literals are
//! escaped, and the rendered fragment is scanned for statement terminators,
//! comment markers, and DDL/DML keywords before it is allowed anywhere near
//! a connection. Free-form SQL that did not come through this converter is
//! only accepted after passing the same scan.

use std::sync::OnceLock;

use rust_decimal::Decimal;

use crate::domain::{
    Condition, ConditionValue, FactRow, FactSchema, Predicate, PredicateOp, ScalarValue,
};
use crate::error::CalcError;

/// Tokens that must never appear in a predicate.
const FORBIDDEN_MARKERS: [&str; 4] = [";", "--", "/*", "*/"];

fn keyword_regex() -> &'static regex::Regex {
    static KEYWORDS: OnceLock<regex::Regex> = OnceLock::new();
    KEYWORDS.get_or_init(|| {
        #[allow(clippy::expect_used)] // compile-time constant pattern
        regex::Regex::new(
            r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|TRUNCATE|ATTACH|DETACH|PRAGMA|EXEC|GRANT|REVOKE)\b",
        )
        .expect("keyword regex is valid")
    })
}

/// Reject fragments carrying statement terminators, comment markers, or
/// DDL/DML keywords.
///
/// # Errors
///
/// Returns `CalcError::DangerousPredicate` naming the first offending token.
pub fn ensure_safe_sql(fragment: &str) -> Result<(), CalcError> {
    for marker in FORBIDDEN_MARKERS {
        if fragment.contains(marker) {
            return Err(CalcError::DangerousPredicate {
                token: marker.to_string(),
            });
        }
    }
    if let Some(found) = keyword_regex().find(fragment) {
        return Err(CalcError::DangerousPredicate {
            token: found.as_str().to_uppercase(),
        });
    }
    Ok(())
}

/// Escape a text literal for inlining into SQL.
#[must_use]
pub fn escape_text(value: &str) -> String {
    value.replace('\'', "''")
}

fn scalar_sql(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Text(s) => format!("'{}'", escape_text(s)),
        ScalarValue::Number(d) => d.to_string(),
    }
}

fn condition_sql(condition: &Condition, schema: &FactSchema) -> Result<String, CalcError> {
    if !schema.has_column(&condition.field) {
        return Err(CalcError::validation(format!(
            "unknown field '{}' in predicate (table '{}')",
            condition.field, schema.table
        )));
    }
    let field = &condition.field;
    let sql = match (condition.operator, &condition.value) {
        (PredicateOp::Equals, ConditionValue::Scalar(v)) => {
            format!("{field} = {}", scalar_sql(v))
        }
        (PredicateOp::NotEquals, ConditionValue::Scalar(v)) => {
            format!("{field} <> {}", scalar_sql(v))
        }
        (PredicateOp::GreaterThan, ConditionValue::Scalar(v)) => {
            format!("{field} > {}", scalar_sql(v))
        }
        (PredicateOp::LessThan, ConditionValue::Scalar(v)) => {
            format!("{field} < {}", scalar_sql(v))
        }
        (PredicateOp::In | PredicateOp::NotIn, ConditionValue::List(items)) => {
            if items.is_empty() {
                return Err(CalcError::validation(format!(
                    "empty membership list for field '{field}'"
                )));
            }
            let rendered: Vec<String> = items.iter().map(scalar_sql).collect();
            let keyword = if condition.operator == PredicateOp::In {
                "IN"
            } else {
                "NOT IN"
            };
            format!("{field} {keyword} ({})", rendered.join(", "))
        }
        (PredicateOp::In | PredicateOp::NotIn, ConditionValue::Scalar(_)) => {
            return Err(CalcError::validation(format!(
                "operator for field '{field}' requires a list value"
            )));
        }
        (_, ConditionValue::List(_)) => {
            return Err(CalcError::validation(format!(
                "operator for field '{field}' requires a scalar value"
            )));
        }
    };
    Ok(sql)
}

/// Render a predicate as a SQL WHERE fragment.
///
/// # Errors
///
/// Fails on unknown fields, operator/value shape mismatches, or dangerous
/// tokens in the rendered fragment.
pub fn to_sql(predicate: &Predicate, schema: &FactSchema) -> Result<String, CalcError> {
    if predicate.conditions.is_empty() {
        return Ok("1 = 1".to_string());
    }
    let parts: Vec<String> = predicate
        .conditions
        .iter()
        .map(|c| condition_sql(c, schema))
        .collect::<Result<_, _>>()?;
    let fragment = parts.join(" AND ");
    ensure_safe_sql(&fragment)?;
    Ok(fragment)
}

/// Wrap a 2B query's filter list as a predicate.
#[must_use]
pub fn from_conditions(conditions: &[Condition]) -> Predicate {
    Predicate {
        conjunction: crate::domain::Conjunction::And,
        conditions: conditions.to_vec(),
    }
}

// ============================================================================
// In-memory evaluation (used by the in-memory fact store)
// ============================================================================

#[derive(Debug, Clone)]
enum Cell {
    Text(String),
    Number(Decimal),
    Missing,
}

fn row_cell(row: &FactRow, field: &str) -> Cell {
    if let Some(text) = row.dimension(field) {
        return Cell::Text(text.to_string());
    }
    if let Some(value) = row.measures.get(field) {
        return Cell::Number(*value);
    }
    Cell::Missing
}

fn scalar_decimal(value: &ScalarValue) -> Option<Decimal> {
    match value {
        ScalarValue::Number(d) => Some(*d),
        ScalarValue::Text(s) => Decimal::from_str_exact(s).ok(),
    }
}

fn cell_equals(cell: &Cell, value: &ScalarValue) -> bool {
    match (cell, value) {
        (Cell::Text(t), ScalarValue::Text(v)) => t == v,
        (Cell::Text(t), ScalarValue::Number(n)) => {
            Decimal::from_str_exact(t).is_ok_and(|d| d == *n) || t == &n.to_string()
        }
        (Cell::Number(d), v) => scalar_decimal(v).is_some_and(|n| *d == n),
        (Cell::Missing, _) => false,
    }
}

fn cell_compare(cell: &Cell, value: &ScalarValue) -> Option<std::cmp::Ordering> {
    match cell {
        Cell::Number(d) => scalar_decimal(value).map(|n| d.cmp(&n)),
        Cell::Text(t) => {
            if let (Ok(d), Some(n)) = (Decimal::from_str_exact(t), scalar_decimal(value)) {
                Some(d.cmp(&n))
            } else if let ScalarValue::Text(v) = value {
                Some(t.as_str().cmp(v.as_str()))
            } else {
                None
            }
        }
        Cell::Missing => None,
    }
}

fn condition_matches(condition: &Condition, row: &FactRow) -> bool {
    let cell = row_cell(row, &condition.field);
    match (&condition.operator, &condition.value) {
        (PredicateOp::Equals, ConditionValue::Scalar(v)) => cell_equals(&cell, v),
        (PredicateOp::NotEquals, ConditionValue::Scalar(v)) => !cell_equals(&cell, v),
        (PredicateOp::In, ConditionValue::List(items)) => {
            items.iter().any(|v| cell_equals(&cell, v))
        }
        (PredicateOp::NotIn, ConditionValue::List(items)) => {
            !items.iter().any(|v| cell_equals(&cell, v))
        }
        (PredicateOp::GreaterThan, ConditionValue::Scalar(v)) => {
            cell_compare(&cell, v) == Some(std::cmp::Ordering::Greater)
        }
        (PredicateOp::LessThan, ConditionValue::Scalar(v)) => {
            cell_compare(&cell, v) == Some(std::cmp::Ordering::Less)
        }
        _ => false,
    }
}

/// Evaluate a predicate against one loaded fact row.
#[must_use]
pub fn matches_row(predicate: &Predicate, row: &FactRow) -> bool {
    predicate.conditions.iter().all(|c| condition_matches(c, row))
}
