//! Run Calculation Use Case
//!
//! The `calculate` verb: resolve the use case, execute the pipeline, and
//! hand back the run receipt with its results.

use tokio_util::sync::CancellationToken;

use crate::application::Stores;
use crate::application::ports::UseCaseStorePort;
use crate::engine::{CalculationPipeline, PipelineConfig, RunOutcome, RunRequest};
use crate::error::CalcError;

/// Parameters of one `calculate` request.
#[derive(Debug, Clone)]
pub struct CalculateCommand {
    /// Use case to calculate.
    pub use_case_id: String,
    /// Business date; defaults to the caller's notion of "today".
    pub pnl_date: String,
    /// Optional caller-supplied tag used as the run name.
    pub version_tag: Option<String>,
    /// Who or what triggered the run.
    pub triggered_by: String,
    /// Cooperative cancellation for the run.
    pub cancel: CancellationToken,
}

/// Use case for executing a calculation run.
pub struct RunCalculationUseCase {
    stores: Stores,
    pipeline: CalculationPipeline,
}

impl RunCalculationUseCase {
    /// Create the use case over a store bundle.
    #[must_use]
    pub fn new(stores: Stores, config: PipelineConfig) -> Self {
        Self {
            stores,
            pipeline: CalculationPipeline::new(config),
        }
    }

    /// Execute a run.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` for an unknown use case; otherwise the pipeline's
    /// classified error (the run record is already marked FAILED).
    pub async fn execute(&self, command: CalculateCommand) -> Result<RunOutcome, CalcError> {
        let use_case = self
            .stores
            .use_cases
            .find(&command.use_case_id)
            .await
            .map_err(CalcError::from)?
            .ok_or_else(|| CalcError::not_found("use case", &command.use_case_id))?;

        let request = RunRequest {
            pnl_date: command.pnl_date,
            name: command
                .version_tag
                .unwrap_or_else(|| "manual".to_string()),
            triggered_by: command.triggered_by,
            cancel: command.cancel,
        };
        self.pipeline
            .execute(
                &use_case,
                request,
                self.stores.facts.as_ref(),
                self.stores.hierarchies.as_ref(),
                self.stores.rules.as_ref(),
                self.stores.results.as_ref(),
            )
            .await
    }
}
