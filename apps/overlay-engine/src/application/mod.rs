//! Application layer - operator verbs and port definitions.

pub mod ports;
pub mod use_cases;

use std::sync::Arc;

use ports::{
    FactStorePort, HierarchyStorePort, ResultStorePort, RuleStorePort, UseCaseStorePort,
};

/// The bundle of stores a calculation needs.
///
/// Cloning is cheap; every field is an `Arc`.
#[derive(Clone)]
pub struct Stores {
    /// Use case definitions.
    pub use_cases: Arc<dyn UseCaseStorePort>,
    /// Ledger facts.
    pub facts: Arc<dyn FactStorePort>,
    /// Hierarchy nodes.
    pub hierarchies: Arc<dyn HierarchyStorePort>,
    /// Override rules.
    pub rules: Arc<dyn RuleStorePort>,
    /// Runs and results.
    pub results: Arc<dyn ResultStorePort>,
}
