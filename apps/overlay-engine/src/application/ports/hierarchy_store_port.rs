//! Hierarchy Store Port (Driven Port)

use std::collections::HashMap;

use async_trait::async_trait;

use super::StoreError;
use crate::domain::HierarchyNode;

/// Port for reading the node set of a structure.
///
/// Stores return raw nodes; tree validation happens in the domain
/// (`Hierarchy::new`) so every loader benefits from the same invariants.
#[async_trait]
pub trait HierarchyStorePort: Send + Sync {
    /// All nodes of a structure.
    async fn load_nodes(&self, structure_id: &str) -> Result<Vec<HierarchyNode>, StoreError>;
}

/// In-memory implementation for tests.
#[derive(Debug, Default)]
pub struct InMemoryHierarchyStore {
    structures: std::sync::RwLock<HashMap<String, Vec<HierarchyNode>>>,
}

impl InMemoryHierarchyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a structure's nodes.
    pub fn insert_structure(&self, structure_id: &str, nodes: Vec<HierarchyNode>) {
        let mut structures = self
            .structures
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        structures.insert(structure_id.to_string(), nodes);
    }
}

#[async_trait]
impl HierarchyStorePort for InMemoryHierarchyStore {
    async fn load_nodes(&self, structure_id: &str) -> Result<Vec<HierarchyNode>, StoreError> {
        let structures = self
            .structures
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        structures
            .get(structure_id)
            .cloned()
            .ok_or_else(|| StoreError::Database(format!("no such structure: {structure_id}")))
    }
}
