//! Turso adapter for the rule store.
//!
//! The engine only reads; `upsert` exists for seeding and the authoring
//! surface that lives outside the core.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Database, db_err, text};
use crate::application::ports::{RuleStorePort, StoreError};
use crate::domain::{Rule, RuleBody};

/// Rule rows in turso.
pub struct TursoRuleStore {
    db: Arc<Database>,
}

impl TursoRuleStore {
    /// Create the adapter.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace the rule for its `(use_case, node)` pair.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database or serialization failure.
    pub async fn upsert(&self, rule: &Rule) -> Result<(), StoreError> {
        let conn = self.db.connect()?;
        let body = serde_json::to_string(&rule.body)?;
        // Replace by pair first: the UNIQUE (use_case_id, node_id) index
        // enforces at most one rule per pair.
        conn.execute(
            "DELETE FROM rule WHERE use_case_id = ?1 AND node_id = ?2",
            (rule.use_case_id.clone(), rule.node_id.clone()),
        )
        .await
        .map_err(db_err)?;
        conn.execute(
            "INSERT INTO rule (id, use_case_id, node_id, measure_name, body, last_modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                rule.id.clone(),
                rule.use_case_id.clone(),
                rule.node_id.clone(),
                rule.measure_name.clone(),
                body,
                rule.last_modified_at.to_rfc3339(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{value}': {e}")))
}

fn rule_from_row(row: &turso::Row) -> Result<Rule, StoreError> {
    let body_json = text(&row.get_value(4).map_err(db_err)?, "body")?;
    let body: RuleBody = serde_json::from_str(&body_json)?;
    Ok(Rule {
        id: text(&row.get_value(0).map_err(db_err)?, "id")?,
        use_case_id: text(&row.get_value(1).map_err(db_err)?, "use_case_id")?,
        node_id: text(&row.get_value(2).map_err(db_err)?, "node_id")?,
        measure_name: text(&row.get_value(3).map_err(db_err)?, "measure_name")?,
        body,
        last_modified_at: parse_timestamp(&text(
            &row.get_value(5).map_err(db_err)?,
            "last_modified_at",
        )?)?,
    })
}

const SELECT_COLUMNS: &str = "id, use_case_id, node_id, measure_name, body, last_modified_at";

#[async_trait]
impl RuleStorePort for TursoRuleStore {
    async fn find_for_use_case(&self, use_case_id: &str) -> Result<Vec<Rule>, StoreError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM rule WHERE use_case_id = ?1 ORDER BY node_id"
                ),
                (use_case_id.to_string(),),
            )
            .await
            .map_err(db_err)?;
        let mut rules = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            rules.push(rule_from_row(&row)?);
        }
        Ok(rules)
    }

    async fn find(&self, use_case_id: &str, node_id: &str) -> Result<Option<Rule>, StoreError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM rule WHERE use_case_id = ?1 AND node_id = ?2"
                ),
                (use_case_id.to_string(), node_id.to_string()),
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(rule_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn latest_modification(
        &self,
        use_case_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT MAX(last_modified_at) FROM rule WHERE use_case_id = ?1",
                (use_case_id.to_string(),),
            )
            .await
            .map_err(db_err)?;
        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };
        match row.get_value(0).map_err(db_err)? {
            turso::Value::Null => Ok(None),
            turso::Value::Text(s) => parse_timestamp(&s).map(Some),
            other => Err(StoreError::Serialization(format!(
                "unexpected MAX(last_modified_at) value: {other:?}"
            ))),
        }
    }
}
