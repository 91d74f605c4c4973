//! Turso adapter for the hierarchy store.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Database, boolean, db_err, integer, opt_text, text};
use crate::application::ports::{HierarchyStorePort, StoreError};
use crate::domain::{Hierarchy, HierarchyNode, RollupValueSource};

/// Hierarchy node rows in turso.
pub struct TursoHierarchyStore {
    db: Arc<Database>,
}

impl TursoHierarchyStore {
    /// Create the adapter.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a structure's nodes (seeding and admin tooling).
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn save_structure(
        &self,
        structure_id: &str,
        nodes: &[HierarchyNode],
    ) -> Result<(), StoreError> {
        let conn = self.db.connect()?;
        conn.execute(
            "DELETE FROM hierarchy_node WHERE structure_id = ?1",
            (structure_id.to_string(),),
        )
        .await
        .map_err(db_err)?;
        for node in nodes {
            conn.execute(
                "INSERT INTO hierarchy_node
                 (structure_id, node_id, parent_node_id, node_name, depth, is_leaf,
                  rollup_driver, rollup_value_source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                (
                    node.structure_id.clone(),
                    node.node_id.clone(),
                    node.parent_node_id.clone(),
                    node.node_name.clone(),
                    i64::from(node.depth),
                    i64::from(node.is_leaf),
                    node.rollup_driver.clone(),
                    source_text(node.rollup_value_source).to_string(),
                ),
            )
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    /// Rebuild the precomputed ancestor→leaf bridge for a structure.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn save_bridge(&self, hierarchy: &Hierarchy) -> Result<(), StoreError> {
        let conn = self.db.connect()?;
        conn.execute(
            "DELETE FROM hierarchy_bridge WHERE structure_id = ?1",
            (hierarchy.structure_id().to_string(),),
        )
        .await
        .map_err(db_err)?;
        let bridge = hierarchy.bridge();
        for (ancestor, leaf) in bridge.iter() {
            conn.execute(
                "INSERT INTO hierarchy_bridge (structure_id, ancestor_node_id, leaf_node_id)
                 VALUES (?1, ?2, ?3)",
                (
                    hierarchy.structure_id().to_string(),
                    ancestor.to_string(),
                    leaf.to_string(),
                ),
            )
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }
}

fn source_text(source: RollupValueSource) -> &'static str {
    match source {
        RollupValueSource::NodeId => "node_id",
        RollupValueSource::NodeName => "node_name",
    }
}

fn source_from_text(text: &str) -> Result<RollupValueSource, StoreError> {
    match text {
        "node_id" => Ok(RollupValueSource::NodeId),
        "node_name" => Ok(RollupValueSource::NodeName),
        other => Err(StoreError::Serialization(format!(
            "unknown rollup value source: {other}"
        ))),
    }
}

#[async_trait]
impl HierarchyStorePort for TursoHierarchyStore {
    async fn load_nodes(&self, structure_id: &str) -> Result<Vec<HierarchyNode>, StoreError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT structure_id, node_id, parent_node_id, node_name, depth, is_leaf,
                        rollup_driver, rollup_value_source
                 FROM hierarchy_node WHERE structure_id = ?1 ORDER BY depth, node_id",
                (structure_id.to_string(),),
            )
            .await
            .map_err(db_err)?;

        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let depth = integer(&row.get_value(4).map_err(db_err)?, "depth")?;
            nodes.push(HierarchyNode {
                structure_id: text(&row.get_value(0).map_err(db_err)?, "structure_id")?,
                node_id: text(&row.get_value(1).map_err(db_err)?, "node_id")?,
                parent_node_id: opt_text(&row.get_value(2).map_err(db_err)?, "parent_node_id")?,
                node_name: text(&row.get_value(3).map_err(db_err)?, "node_name")?,
                depth: u32::try_from(depth).map_err(|_| {
                    StoreError::Serialization(format!("negative depth: {depth}"))
                })?,
                is_leaf: boolean(&row.get_value(5).map_err(db_err)?, "is_leaf")?,
                rollup_driver: opt_text(&row.get_value(6).map_err(db_err)?, "rollup_driver")?,
                rollup_value_source: source_from_text(&text(
                    &row.get_value(7).map_err(db_err)?,
                    "rollup_value_source",
                )?)?,
            });
        }
        if nodes.is_empty() {
            return Err(StoreError::Database(format!(
                "no such structure: {structure_id}"
            )));
        }
        Ok(nodes)
    }
}
