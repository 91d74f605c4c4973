//! Domain errors for the overlay engine.

use std::fmt;

/// Domain-level errors that can occur in business logic.
///
/// These errors are independent of infrastructure concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A hierarchy failed structural validation.
    InvalidHierarchy {
        /// Structure identifier.
        structure_id: String,
        /// Reason the tree was rejected.
        reason: String,
    },

    /// Invalid value for a field.
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },

    /// A rule references a measure that the use case does not map.
    UnknownMeasure {
        /// The offending measure name.
        measure: String,
        /// Use case identifier.
        use_case_id: String,
    },

    /// A rule is missing the payload its variant requires.
    MissingRulePayload {
        /// Rule identifier.
        rule_id: String,
        /// What was missing.
        reason: String,
    },
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHierarchy {
                structure_id,
                reason,
            } => {
                write!(f, "Invalid hierarchy '{structure_id}': {reason}")
            }
            Self::InvalidValue { field, message } => {
                write!(f, "Invalid value for '{field}': {message}")
            }
            Self::UnknownMeasure {
                measure,
                use_case_id,
            } => {
                write!(
                    f,
                    "Measure '{measure}' is not mapped for use case '{use_case_id}'"
                )
            }
            Self::MissingRulePayload { rule_id, reason } => {
                write!(f, "Rule '{rule_id}' is missing required payload: {reason}")
            }
        }
    }
}

impl std::error::Error for DomainError {}
