//! Preview Rule Use Case
//!
//! The `preview_rule` verb: count the rows a WHERE fragment would touch
//! before an analyst commits the rule. The fragment must pass the
//! dangerous-predicate guard; nothing else about it is trusted.

use crate::application::Stores;
use crate::application::ports::{FactStorePort, FilterPreview, UseCaseStorePort};
use crate::domain::CANONICAL_LEDGER_TABLE;
use crate::engine::predicate::ensure_safe_sql;
use crate::error::CalcError;

/// Use case for previewing a rule filter.
pub struct PreviewRuleUseCase {
    stores: Stores,
}

impl PreviewRuleUseCase {
    /// Create the use case over a store bundle.
    #[must_use]
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Count affected rows for a WHERE fragment against the use case's
    /// fact table (the canonical ledger when no use case is given).
    ///
    /// # Errors
    ///
    /// `DangerousPredicate` before anything touches the store;
    /// `ResourceNotFound` for an unknown use case; store failures
    /// otherwise.
    pub async fn execute(
        &self,
        sql_where: &str,
        use_case_id: Option<&str>,
    ) -> Result<FilterPreview, CalcError> {
        ensure_safe_sql(sql_where)?;

        let table = match use_case_id {
            Some(id) => {
                let use_case = self
                    .stores
                    .use_cases
                    .find(id)
                    .await
                    .map_err(CalcError::from)?
                    .ok_or_else(|| CalcError::not_found("use case", id))?;
                use_case
                    .input_table_name
                    .unwrap_or_else(|| CANONICAL_LEDGER_TABLE.to_string())
            }
            None => CANONICAL_LEDGER_TABLE.to_string(),
        };

        self.stores
            .facts
            .preview_filter(&table, sql_where)
            .await
            .map_err(CalcError::from)
    }
}
