//! Fact Store Port (Driven Port)
//!
//! Tabular query interface over the use case's fact table: schema
//! discovery, row enumeration for the run's working snapshot, and the
//! aggregations rule execution needs.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::StoreError;
use crate::domain::{
    Aggregation, CANONICAL_LEDGER_TABLE, FactRow, FactSchema, Predicate, USE_CASE_COLUMN, UseCase,
};
use crate::engine::predicate::matches_row;

/// Row counts returned by a rule preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FilterPreview {
    /// Rows the filter matches.
    pub affected_rows: u64,
    /// Rows in the table (within the use case's scope).
    pub total_rows: u64,
}

impl FilterPreview {
    /// Matched share as a percentage, zero for an empty table.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                self.affected_rows as f64 / self.total_rows as f64 * 100.0
            }
        }
    }
}

/// The physical fact table a use case reads.
#[must_use]
pub fn fact_table_name(use_case: &UseCase) -> &str {
    use_case
        .input_table_name
        .as_deref()
        .unwrap_or(CANONICAL_LEDGER_TABLE)
}

/// Port for fact (ledger) access.
#[async_trait]
pub trait FactStorePort: Send + Sync {
    /// Describe the use case's fact table.
    async fn fact_schema(&self, use_case: &UseCase) -> Result<FactSchema, StoreError>;

    /// Load the use case's fact rows into a working snapshot.
    async fn load_facts(&self, use_case: &UseCase) -> Result<Vec<FactRow>, StoreError>;

    /// Aggregate one measure column under a predicate, scoped to the use
    /// case.
    async fn aggregate(
        &self,
        use_case: &UseCase,
        aggregation: Aggregation,
        column: &str,
        predicate: &Predicate,
    ) -> Result<Decimal, StoreError>;

    /// Count rows matched by an already-sanitised WHERE fragment.
    async fn preview_filter(
        &self,
        table: &str,
        where_sql: &str,
    ) -> Result<FilterPreview, StoreError>;
}

/// One in-memory fact table: schema plus rows.
#[derive(Debug, Clone)]
pub struct FactTable {
    /// Table shape.
    pub schema: FactSchema,
    /// The rows.
    pub rows: Vec<FactRow>,
}

/// In-memory implementation for tests.
#[derive(Debug, Default)]
pub struct InMemoryFactStore {
    tables: std::sync::RwLock<HashMap<String, FactTable>>,
}

impl InMemoryFactStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a table.
    pub fn insert_table(&self, table: FactTable) {
        let mut tables = self
            .tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tables.insert(table.schema.table.clone(), table);
    }

    fn with_table<T>(
        &self,
        name: &str,
        f: impl FnOnce(&FactTable) -> T,
    ) -> Result<T, StoreError> {
        let tables = self
            .tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tables
            .get(name)
            .map(f)
            .ok_or_else(|| StoreError::Database(format!("no such fact table: {name}")))
    }

    /// Rows visible to a use case: canonical-ledger rows are scoped by the
    /// use-case column, dedicated tables are read whole.
    fn scoped_rows(table: &FactTable, use_case: &UseCase) -> Vec<FactRow> {
        if table.schema.scoped_by_use_case() {
            table
                .rows
                .iter()
                .filter(|row| row.dimension(USE_CASE_COLUMN) == Some(use_case.id.as_str()))
                .cloned()
                .collect()
        } else {
            table.rows.clone()
        }
    }
}

fn fold_aggregation(aggregation: Aggregation, values: &[Decimal]) -> Decimal {
    match aggregation {
        Aggregation::Sum => values.iter().copied().sum(),
        Aggregation::Count => Decimal::from(values.len()),
        Aggregation::Avg => {
            if values.is_empty() {
                Decimal::ZERO
            } else {
                values.iter().copied().sum::<Decimal>() / Decimal::from(values.len())
            }
        }
        Aggregation::Min => values.iter().copied().min().unwrap_or(Decimal::ZERO),
        Aggregation::Max => values.iter().copied().max().unwrap_or(Decimal::ZERO),
    }
}

#[async_trait]
impl FactStorePort for InMemoryFactStore {
    async fn fact_schema(&self, use_case: &UseCase) -> Result<FactSchema, StoreError> {
        self.with_table(fact_table_name(use_case), |table| table.schema.clone())
    }

    async fn load_facts(&self, use_case: &UseCase) -> Result<Vec<FactRow>, StoreError> {
        self.with_table(fact_table_name(use_case), |table| {
            Self::scoped_rows(table, use_case)
        })
    }

    async fn aggregate(
        &self,
        use_case: &UseCase,
        aggregation: Aggregation,
        column: &str,
        predicate: &Predicate,
    ) -> Result<Decimal, StoreError> {
        let column = column.to_string();
        self.with_table(fact_table_name(use_case), |table| {
            let values: Vec<Decimal> = Self::scoped_rows(table, use_case)
                .iter()
                .filter(|row| matches_row(predicate, row))
                .map(|row| row.measure(&column))
                .collect();
            fold_aggregation(aggregation, &values)
        })
    }

    async fn preview_filter(
        &self,
        _table: &str,
        _where_sql: &str,
    ) -> Result<FilterPreview, StoreError> {
        // Raw SQL fragments are only executable by a store that owns SQL.
        Err(StoreError::Unsupported(
            "in-memory fact store cannot execute raw WHERE fragments".to_string(),
        ))
    }
}
