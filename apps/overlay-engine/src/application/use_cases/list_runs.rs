//! List Runs Use Case

use crate::application::Stores;
use crate::application::ports::ResultStorePort;
use crate::domain::CalculationRun;
use crate::error::CalcError;

/// Use case for listing run receipts.
pub struct ListRunsUseCase {
    stores: Stores,
}

impl ListRunsUseCase {
    /// Create the use case over a store bundle.
    #[must_use]
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Runs, newest first, optionally filtered by use case and business
    /// date.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn execute(
        &self,
        use_case_id: Option<&str>,
        pnl_date: Option<&str>,
    ) -> Result<Vec<CalculationRun>, CalcError> {
        self.stores
            .results
            .list_runs(use_case_id, pnl_date)
            .await
            .map_err(CalcError::from)
    }
}
