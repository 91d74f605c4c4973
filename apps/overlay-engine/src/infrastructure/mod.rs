//! Infrastructure layer - turso adapters, caches, and wiring.

pub mod cache;
pub mod container;
pub mod persistence;

pub use cache::{CachedHierarchyStore, CachedRuleStore, TtlCache};
pub use container::Container;
pub use persistence::{
    Database, TursoFactStore, TursoHierarchyStore, TursoResultStore, TursoRuleStore,
    TursoUseCaseStore,
};
