//! Run-level error taxonomy for the overlay engine.
//!
//! Every failure inside a calculation surfaces to the caller as exactly one
//! [`CalcError`]. Fatal errors abort the pipeline, roll back the run's
//! result batch and mark the run FAILED; non-fatal errors annotate an
//! otherwise COMPLETED run.
//!
//! # Reason codes
//!
//! | Code | Fatal | Usage |
//! |------|-------|-------|
//! | `VALIDATION` | yes | malformed predicate, unknown field/measure, missing payload |
//! | `RESOURCE_NOT_FOUND` | yes | use case, hierarchy, run, or node absent |
//! | `CIRCULAR_DEPENDENCY` | yes | Type-3 dependency graph has a cycle |
//! | `DIVISION_BY_ZERO` | yes | Type-2B or Type-3 expression divides by zero |
//! | `DANGEROUS_PREDICATE` | yes | terminator / comment / DDL-DML token in a predicate |
//! | `RECONCILIATION` | no | root or completeness check out of tolerance |
//! | `CANCELLED` | yes | run cancelled at a stage boundary or deadline hit |
//! | `STORE` | yes | wrapped fact/hierarchy/rule/result store failure |

use thiserror::Error;

use crate::application::ports::StoreError;
use crate::domain::DomainError;

/// Classified failure of a calculation run.
#[derive(Debug, Error)]
pub enum CalcError {
    /// Malformed rule, predicate, or structural input.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    ResourceNotFound {
        /// Entity type (e.g. "use case").
        entity: String,
        /// The identifier that missed.
        id: String,
    },

    /// The Type-3 dependency graph has a cycle.
    #[error("circular dependency among nodes: {}", cycle.join(" -> "))]
    CircularDependency {
        /// The nodes forming the cycle.
        cycle: Vec<String>,
    },

    /// An expression divided by zero.
    #[error("division by zero while evaluating {context}")]
    DivisionByZero {
        /// Which rule or node was being evaluated.
        context: String,
    },

    /// A predicate carried a statement terminator, comment marker, or
    /// DDL/DML keyword.
    #[error("dangerous predicate rejected: found {token:?}")]
    DangerousPredicate {
        /// The offending token.
        token: String,
    },

    /// Root or completeness reconciliation out of tolerance. Non-fatal.
    #[error("reconciliation anomaly: {message}")]
    Reconciliation {
        /// Description of the delta.
        message: String,
    },

    /// The run was cancelled or hit its deadline.
    #[error("run cancelled at stage {stage}")]
    Cancelled {
        /// Stage boundary where cancellation was observed.
        stage: &'static str,
    },

    /// Wrapped store failure; always fatal and triggers rollback.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CalcError {
    /// Shorthand for a validation failure.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a missing entity.
    #[must_use]
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Stable reason code for logs and callers.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            Self::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            Self::DivisionByZero { .. } => "DIVISION_BY_ZERO",
            Self::DangerousPredicate { .. } => "DANGEROUS_PREDICATE",
            Self::Reconciliation { .. } => "RECONCILIATION",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Store(_) => "STORE",
        }
    }

    /// Whether this error aborts the run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Reconciliation { .. })
    }
}

impl From<DomainError> for CalcError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::UnknownMeasure { measure, use_case_id } => Self::Validation {
                message: format!("measure '{measure}' is not mapped for use case '{use_case_id}'"),
            },
            other => Self::Validation {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes() {
        assert_eq!(CalcError::validation("x").reason(), "VALIDATION");
        assert_eq!(CalcError::not_found("run", "r1").reason(), "RESOURCE_NOT_FOUND");
        assert_eq!(
            CalcError::CircularDependency {
                cycle: vec!["A".to_string(), "B".to_string()]
            }
            .reason(),
            "CIRCULAR_DEPENDENCY"
        );
        assert_eq!(
            CalcError::DangerousPredicate {
                token: ";".to_string()
            }
            .reason(),
            "DANGEROUS_PREDICATE"
        );
    }

    #[test]
    fn only_reconciliation_is_non_fatal() {
        assert!(!CalcError::Reconciliation {
            message: "root delta 0.02".to_string()
        }
        .is_fatal());
        assert!(CalcError::validation("x").is_fatal());
        assert!(CalcError::Cancelled { stage: "stage-2" }.is_fatal());
    }

    #[test]
    fn cycle_display_names_nodes() {
        let err = CalcError::CircularDependency {
            cycle: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "circular dependency among nodes: A -> B -> A"
        );
    }

    #[test]
    fn domain_error_maps_to_validation() {
        let err: CalcError = DomainError::UnknownMeasure {
            measure: "weekly".to_string(),
            use_case_id: "uc1".to_string(),
        }
        .into();
        assert_eq!(err.reason(), "VALIDATION");
        assert!(err.to_string().contains("weekly"));
    }
}
