//! Ports: interfaces the calculation core needs from the outside world.
//!
//! Each port ships with an in-memory implementation used by tests and by
//! the end-to-end scenario suite.

pub(crate) mod fact_store_port;
mod hierarchy_store_port;
mod result_store_port;
mod rule_store_port;
mod use_case_store_port;

use thiserror::Error;

pub use fact_store_port::{
    FactStorePort, FactTable, FilterPreview, InMemoryFactStore, fact_table_name,
};
pub use hierarchy_store_port::{HierarchyStorePort, InMemoryHierarchyStore};
pub use result_store_port::{InMemoryResultStore, ResultStorePort};
pub use rule_store_port::{InMemoryRuleStore, RuleStorePort};
pub use use_case_store_port::{InMemoryUseCaseStore, UseCaseStorePort};

/// Failure from a fact/hierarchy/rule/use-case/result store.
///
/// Always fatal for the surrounding run; the pipeline rolls back and marks
/// the run FAILED.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database-level failure.
    #[error("database error: {0}")]
    Database(String),

    /// (De)serialization failure at the storage boundary.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The store cannot perform this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A storage invariant was violated.
    #[error("constraint violation: {0}")]
    Constraint(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
