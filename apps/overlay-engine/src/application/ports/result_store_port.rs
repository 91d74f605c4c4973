//! Result Store Port (Driven Port)
//!
//! Owns run receipts and their per-node results. `save_results` is the
//! pipeline's single bulk write: implementations must persist the batch
//! atomically (all rows or none).

use std::collections::HashMap;

use async_trait::async_trait;

use super::StoreError;
use crate::domain::{CalculatedResult, CalculationRun, RunStatus};

/// Port for run and result persistence.
#[async_trait]
pub trait ResultStorePort: Send + Sync {
    /// Record a freshly started run.
    async fn create_run(&self, run: &CalculationRun) -> Result<(), StoreError>;

    /// Persist a run's status transition and audit fields.
    async fn update_run(&self, run: &CalculationRun) -> Result<(), StoreError>;

    /// Persist a run's results as one atomic batch.
    async fn save_results(&self, results: &[CalculatedResult]) -> Result<(), StoreError>;

    /// Look up a run by id.
    async fn find_run(&self, run_id: &str) -> Result<Option<CalculationRun>, StoreError>;

    /// Most recent completed run of a use case.
    async fn latest_completed_run(
        &self,
        use_case_id: &str,
    ) -> Result<Option<CalculationRun>, StoreError>;

    /// Runs, optionally filtered by use case and business date, newest
    /// first.
    async fn list_runs(
        &self,
        use_case_id: Option<&str>,
        pnl_date: Option<&str>,
    ) -> Result<Vec<CalculationRun>, StoreError>;

    /// All results of a run.
    async fn load_results(&self, run_id: &str) -> Result<Vec<CalculatedResult>, StoreError>;
}

/// In-memory implementation for tests.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    runs: std::sync::RwLock<HashMap<String, CalculationRun>>,
    results: std::sync::RwLock<HashMap<String, Vec<CalculatedResult>>>,
}

impl InMemoryResultStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStorePort for InMemoryResultStore {
    async fn create_run(&self, run: &CalculationRun) -> Result<(), StoreError> {
        let mut runs = self
            .runs
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if runs.contains_key(&run.run_id) {
            return Err(StoreError::Constraint(format!(
                "run already exists: {}",
                run.run_id
            )));
        }
        runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &CalculationRun) -> Result<(), StoreError> {
        let mut runs = self
            .runs
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match runs.get_mut(&run.run_id) {
            Some(slot) => {
                *slot = run.clone();
                Ok(())
            }
            None => Err(StoreError::Constraint(format!(
                "no such run: {}",
                run.run_id
            ))),
        }
    }

    async fn save_results(&self, results: &[CalculatedResult]) -> Result<(), StoreError> {
        let Some(first) = results.first() else {
            return Ok(());
        };
        let mut stored = self
            .results
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        stored.insert(first.run_id.clone(), results.to_vec());
        Ok(())
    }

    async fn find_run(&self, run_id: &str) -> Result<Option<CalculationRun>, StoreError> {
        let runs = self
            .runs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(runs.get(run_id).cloned())
    }

    async fn latest_completed_run(
        &self,
        use_case_id: &str,
    ) -> Result<Option<CalculationRun>, StoreError> {
        let runs = self
            .runs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(runs
            .values()
            .filter(|r| r.use_case_id == use_case_id && r.status == RunStatus::Completed)
            .max_by_key(|r| r.executed_at)
            .cloned())
    }

    async fn list_runs(
        &self,
        use_case_id: Option<&str>,
        pnl_date: Option<&str>,
    ) -> Result<Vec<CalculationRun>, StoreError> {
        let runs = self
            .runs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut found: Vec<CalculationRun> = runs
            .values()
            .filter(|r| use_case_id.is_none_or(|uc| r.use_case_id == uc))
            .filter(|r| pnl_date.is_none_or(|d| r.pnl_date == d))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        Ok(found)
    }

    async fn load_results(&self, run_id: &str) -> Result<Vec<CalculatedResult>, StoreError> {
        let stored = self
            .results
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(stored.get(run_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MeasureVector;

    fn run(use_case: &str) -> CalculationRun {
        CalculationRun::start(use_case, "2025-06-30", "eod", "test")
    }

    #[tokio::test]
    async fn create_then_update_run() {
        let store = InMemoryResultStore::new();
        let mut r = run("uc1");
        store.create_run(&r).await.unwrap();

        r.complete(10, None);
        store.update_run(&r).await.unwrap();

        let found = store.find_run(&r.run_id).await.unwrap().unwrap();
        assert_eq!(found.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_run_id_is_a_constraint_violation() {
        let store = InMemoryResultStore::new();
        let r = run("uc1");
        store.create_run(&r).await.unwrap();
        assert!(matches!(
            store.create_run(&r).await,
            Err(StoreError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn latest_completed_ignores_failed_runs() {
        let store = InMemoryResultStore::new();

        let mut failed = run("uc1");
        store.create_run(&failed).await.unwrap();
        failed.fail("boom", 5);
        store.update_run(&failed).await.unwrap();

        assert!(store.latest_completed_run("uc1").await.unwrap().is_none());

        let mut ok = run("uc1");
        ok.executed_at += chrono::Duration::seconds(1);
        store.create_run(&ok).await.unwrap();
        ok.complete(5, None);
        store.update_run(&ok).await.unwrap();

        let latest = store.latest_completed_run("uc1").await.unwrap().unwrap();
        assert_eq!(latest.run_id, ok.run_id);
    }

    #[tokio::test]
    async fn list_runs_filters() {
        let store = InMemoryResultStore::new();
        let a = run("uc1");
        let mut b = run("uc2");
        b.pnl_date = "2025-07-01".to_string();
        store.create_run(&a).await.unwrap();
        store.create_run(&b).await.unwrap();

        assert_eq!(store.list_runs(None, None).await.unwrap().len(), 2);
        assert_eq!(store.list_runs(Some("uc1"), None).await.unwrap().len(), 1);
        assert_eq!(
            store
                .list_runs(None, Some("2025-07-01"))
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .list_runs(Some("uc1"), Some("2025-07-01"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn save_and_load_results() {
        let store = InMemoryResultStore::new();
        let r = run("uc1");
        let results = vec![CalculatedResult {
            run_id: r.run_id.clone(),
            node_id: "L1".to_string(),
            measure_vector: MeasureVector::zeroed(["daily"]),
            plug_vector: MeasureVector::zeroed(["daily"]),
            is_override: false,
            is_reconciled: true,
        }];
        store.save_results(&results).await.unwrap();
        let loaded = store.load_results(&r.run_id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].node_id, "L1");
    }
}
