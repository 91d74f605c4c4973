//! Turso adapter for the use case store.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Database, db_err, opt_text, text};
use crate::application::ports::{StoreError, UseCaseStorePort};
use crate::domain::{MeasureMapping, UseCase, UseCaseStatus};

/// Use case rows in turso.
pub struct TursoUseCaseStore {
    db: Arc<Database>,
}

impl TursoUseCaseStore {
    /// Create the adapter.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a use case (seeding and admin tooling).
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database or serialization failure.
    pub async fn save(&self, use_case: &UseCase) -> Result<(), StoreError> {
        let conn = self.db.connect()?;
        let mapping = serde_json::to_string(&use_case.measure_mapping)?;
        let status = status_text(use_case.status);
        conn.execute(
            "INSERT OR REPLACE INTO use_case
             (id, name, owner, structure_id, input_table_name, measure_mapping, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            (
                use_case.id.clone(),
                use_case.name.clone(),
                use_case.owner.clone(),
                use_case.structure_id.clone(),
                use_case.input_table_name.clone(),
                mapping,
                status.to_string(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

fn status_text(status: UseCaseStatus) -> &'static str {
    match status {
        UseCaseStatus::Draft => "DRAFT",
        UseCaseStatus::Active => "ACTIVE",
        UseCaseStatus::Archived => "ARCHIVED",
    }
}

fn status_from_text(text: &str) -> Result<UseCaseStatus, StoreError> {
    match text {
        "DRAFT" => Ok(UseCaseStatus::Draft),
        "ACTIVE" => Ok(UseCaseStatus::Active),
        "ARCHIVED" => Ok(UseCaseStatus::Archived),
        other => Err(StoreError::Serialization(format!(
            "unknown use case status: {other}"
        ))),
    }
}

#[async_trait]
impl UseCaseStorePort for TursoUseCaseStore {
    async fn find(&self, id: &str) -> Result<Option<UseCase>, StoreError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT id, name, owner, structure_id, input_table_name, measure_mapping, status
                 FROM use_case WHERE id = ?1",
                (id.to_string(),),
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };
        let mapping_json = text(&row.get_value(5).map_err(db_err)?, "measure_mapping")?;
        let measure_mapping: MeasureMapping = serde_json::from_str(&mapping_json)?;
        Ok(Some(UseCase {
            id: text(&row.get_value(0).map_err(db_err)?, "id")?,
            name: text(&row.get_value(1).map_err(db_err)?, "name")?,
            owner: text(&row.get_value(2).map_err(db_err)?, "owner")?,
            structure_id: text(&row.get_value(3).map_err(db_err)?, "structure_id")?,
            input_table_name: opt_text(&row.get_value(4).map_err(db_err)?, "input_table_name")?,
            measure_mapping,
            status: status_from_text(&text(&row.get_value(6).map_err(db_err)?, "status")?)?,
        }))
    }
}
