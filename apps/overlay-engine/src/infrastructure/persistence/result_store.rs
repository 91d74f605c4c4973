//! Turso adapter for runs and results.
//!
//! Result batches are written inside one transaction: any failure rolls
//! the whole batch back so a FAILED run leaves no orphan rows.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::{Database, boolean, db_err, opt_integer, opt_text, text};
use crate::application::ports::{ResultStorePort, StoreError};
use crate::domain::{CalculatedResult, CalculationRun, MeasureVector, RunStatus};

/// Run and result rows in turso.
pub struct TursoResultStore {
    db: Arc<Database>,
}

impl TursoResultStore {
    /// Create the adapter.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn status_text(status: RunStatus) -> &'static str {
    match status {
        RunStatus::InProgress => "IN_PROGRESS",
        RunStatus::Completed => "COMPLETED",
        RunStatus::Failed => "FAILED",
    }
}

fn status_from_text(value: &str) -> Result<RunStatus, StoreError> {
    match value {
        "IN_PROGRESS" => Ok(RunStatus::InProgress),
        "COMPLETED" => Ok(RunStatus::Completed),
        "FAILED" => Ok(RunStatus::Failed),
        other => Err(StoreError::Serialization(format!(
            "unknown run status: {other}"
        ))),
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{value}': {e}")))
}

fn run_from_row(row: &turso::Row) -> Result<CalculationRun, StoreError> {
    let duration = opt_integer(&row.get_value(7).map_err(db_err)?, "duration_ms")?;
    Ok(CalculationRun {
        run_id: text(&row.get_value(0).map_err(db_err)?, "run_id")?,
        pnl_date: text(&row.get_value(1).map_err(db_err)?, "pnl_date")?,
        use_case_id: text(&row.get_value(2).map_err(db_err)?, "use_case_id")?,
        name: text(&row.get_value(3).map_err(db_err)?, "name")?,
        executed_at: parse_timestamp(&text(&row.get_value(4).map_err(db_err)?, "executed_at")?)?,
        status: status_from_text(&text(&row.get_value(5).map_err(db_err)?, "status")?)?,
        triggered_by: text(&row.get_value(6).map_err(db_err)?, "triggered_by")?,
        duration_ms: duration.map(|d| u64::try_from(d).unwrap_or(0)),
        failure_reason: opt_text(&row.get_value(8).map_err(db_err)?, "failure_reason")?,
        anomaly: opt_text(&row.get_value(9).map_err(db_err)?, "anomaly")?,
    })
}

fn vector_from_json(json: &str, column: &str) -> Result<MeasureVector, StoreError> {
    serde_json::from_str(json)
        .map_err(|e| StoreError::Serialization(format!("column '{column}': {e}")))
}

const RUN_COLUMNS: &str = "run_id, pnl_date, use_case_id, name, executed_at, status, \
                           triggered_by, duration_ms, failure_reason, anomaly";

#[async_trait]
impl ResultStorePort for TursoResultStore {
    async fn create_run(&self, run: &CalculationRun) -> Result<(), StoreError> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO calculation_run
             (run_id, pnl_date, use_case_id, name, executed_at, status, triggered_by,
              duration_ms, failure_reason, anomaly)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            (
                run.run_id.clone(),
                run.pnl_date.clone(),
                run.use_case_id.clone(),
                run.name.clone(),
                run.executed_at.to_rfc3339(),
                status_text(run.status).to_string(),
                run.triggered_by.clone(),
                run.duration_ms.map(|d| i64::try_from(d).unwrap_or(i64::MAX)),
                run.failure_reason.clone(),
                run.anomaly.clone(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_run(&self, run: &CalculationRun) -> Result<(), StoreError> {
        let conn = self.db.connect()?;
        let changed = conn
            .execute(
                "UPDATE calculation_run
                 SET status = ?2, duration_ms = ?3, failure_reason = ?4, anomaly = ?5
                 WHERE run_id = ?1",
                (
                    run.run_id.clone(),
                    status_text(run.status).to_string(),
                    run.duration_ms.map(|d| i64::try_from(d).unwrap_or(i64::MAX)),
                    run.failure_reason.clone(),
                    run.anomaly.clone(),
                ),
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(StoreError::Constraint(format!(
                "no such run: {}",
                run.run_id
            )));
        }
        Ok(())
    }

    async fn save_results(&self, results: &[CalculatedResult]) -> Result<(), StoreError> {
        if results.is_empty() {
            return Ok(());
        }
        let conn = self.db.connect()?;
        conn.execute("BEGIN", ()).await.map_err(db_err)?;
        for result in results {
            let insert = async {
                let measure_vector = serde_json::to_string(&result.measure_vector)?;
                let plug_vector = serde_json::to_string(&result.plug_vector)?;
                conn.execute(
                    "INSERT INTO calculated_result
                     (run_id, node_id, measure_vector, plug_vector, is_override, is_reconciled)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    (
                        result.run_id.clone(),
                        result.node_id.clone(),
                        measure_vector,
                        plug_vector,
                        i64::from(result.is_override),
                        i64::from(result.is_reconciled),
                    ),
                )
                .await
                .map_err(db_err)?;
                Ok::<(), StoreError>(())
            };
            if let Err(err) = insert.await {
                if let Err(rollback_err) = conn.execute("ROLLBACK", ()).await {
                    warn!(error = %rollback_err, "rollback after failed result batch also failed");
                }
                return Err(err);
            }
        }
        conn.execute("COMMIT", ()).await.map_err(db_err)?;
        Ok(())
    }

    async fn find_run(&self, run_id: &str) -> Result<Option<CalculationRun>, StoreError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM calculation_run WHERE run_id = ?1"),
                (run_id.to_string(),),
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(run_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn latest_completed_run(
        &self,
        use_case_id: &str,
    ) -> Result<Option<CalculationRun>, StoreError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM calculation_run
                     WHERE use_case_id = ?1 AND status = 'COMPLETED'
                     ORDER BY executed_at DESC LIMIT 1"
                ),
                (use_case_id.to_string(),),
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(run_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_runs(
        &self,
        use_case_id: Option<&str>,
        pnl_date: Option<&str>,
    ) -> Result<Vec<CalculationRun>, StoreError> {
        use crate::engine::predicate::escape_text;

        let mut clauses = Vec::new();
        if let Some(uc) = use_case_id {
            clauses.push(format!("use_case_id = '{}'", escape_text(uc)));
        }
        if let Some(date) = pnl_date {
            clauses.push(format!("pnl_date = '{}'", escape_text(date)));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM calculation_run{where_clause} ORDER BY executed_at DESC"
        );

        let conn = self.db.connect()?;
        let mut rows = conn.query(&sql, ()).await.map_err(db_err)?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            runs.push(run_from_row(&row)?);
        }
        Ok(runs)
    }

    async fn load_results(&self, run_id: &str) -> Result<Vec<CalculatedResult>, StoreError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT run_id, node_id, measure_vector, plug_vector, is_override, is_reconciled
                 FROM calculated_result WHERE run_id = ?1 ORDER BY node_id",
                (run_id.to_string(),),
            )
            .await
            .map_err(db_err)?;
        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(CalculatedResult {
                run_id: text(&row.get_value(0).map_err(db_err)?, "run_id")?,
                node_id: text(&row.get_value(1).map_err(db_err)?, "node_id")?,
                measure_vector: vector_from_json(
                    &text(&row.get_value(2).map_err(db_err)?, "measure_vector")?,
                    "measure_vector",
                )?,
                plug_vector: vector_from_json(
                    &text(&row.get_value(3).map_err(db_err)?, "plug_vector")?,
                    "plug_vector",
                )?,
                is_override: boolean(&row.get_value(4).map_err(db_err)?, "is_override")?,
                is_reconciled: boolean(&row.get_value(5).map_err(db_err)?, "is_reconciled")?,
            });
        }
        Ok(results)
    }
}
