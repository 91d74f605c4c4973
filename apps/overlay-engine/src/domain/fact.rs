//! Ledger facts: rows of categorical dimensions plus numeric measures.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Name of the canonical P&L ledger table.
pub const CANONICAL_LEDGER_TABLE: &str = "pnl_ledger";

/// Column that scopes canonical ledger rows to a use case.
pub const USE_CASE_COLUMN: &str = "use_case_id";

/// One ledger row, loaded into the run's working snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactRow {
    /// Categorical columns (leaf ids, cost centres, strategies, ...).
    pub dimensions: HashMap<String, String>,
    /// Numeric columns, exact decimals.
    pub measures: HashMap<String, Decimal>,
}

impl FactRow {
    /// A dimension value, if present.
    #[must_use]
    pub fn dimension(&self, column: &str) -> Option<&str> {
        self.dimensions.get(column).map(String::as_str)
    }

    /// A measure value; zero when the column is absent.
    #[must_use]
    pub fn measure(&self, column: &str) -> Decimal {
        self.measures.get(column).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Shape of a use case's fact table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSchema {
    /// Physical table name.
    pub table: String,
    /// Column identifying the owning leaf in the canonical ledger.
    pub leaf_column: String,
    /// Categorical columns available to predicates.
    pub dimension_columns: Vec<String>,
    /// Numeric columns available to aggregation.
    pub measure_columns: Vec<String>,
}

impl FactSchema {
    /// Whether a column exists in this table (either kind).
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.leaf_column == name
            || self.dimension_columns.iter().any(|c| c == name)
            || self.measure_columns.iter().any(|c| c == name)
    }

    /// Whether a column is numeric.
    #[must_use]
    pub fn is_measure(&self, name: &str) -> bool {
        self.measure_columns.iter().any(|c| c == name)
    }

    /// Whether the table carries the use-case scoping column.
    #[must_use]
    pub fn scoped_by_use_case(&self) -> bool {
        self.has_column(USE_CASE_COLUMN)
    }
}
