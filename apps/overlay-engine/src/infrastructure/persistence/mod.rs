//! Turso-backed store adapters.
//!
//! Only this module talks SQL. Every adapter implements its application
//! port; value decoding is centralised here so the stores agree on how
//! NULLs, booleans and decimals cross the boundary.

mod fact_store;
mod hierarchy_store;
mod result_store;
mod rule_store;
mod schema;
mod use_case_store;

use rust_decimal::Decimal;

pub use fact_store::TursoFactStore;
pub use hierarchy_store::TursoHierarchyStore;
pub use result_store::TursoResultStore;
pub use rule_store::TursoRuleStore;
pub use schema::SCHEMA_STATEMENTS;
pub use use_case_store::TursoUseCaseStore;

use crate::application::ports::StoreError;

/// Handle to the overlay database.
pub struct Database {
    inner: turso::Database,
}

impl Database {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` when the file cannot be opened.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let inner = turso::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        Ok(Self { inner })
    }

    /// Open an in-memory database (used in tests).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on failure.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:").await
    }

    /// Open a connection.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on failure.
    pub fn connect(&self) -> Result<turso::Connection, StoreError> {
        self.inner.connect().map_err(db_err)
    }

    /// Apply all schema migrations in order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` when a statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        for statement in SCHEMA_STATEMENTS {
            conn.execute(statement, ()).await.map_err(db_err)?;
        }
        Ok(())
    }
}

/// Map a turso error into the store taxonomy.
pub(crate) fn db_err(err: turso::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

/// Reject identifiers that cannot be safely inlined into SQL.
pub(crate) fn ensure_identifier(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::Constraint(format!(
            "invalid SQL identifier: {name:?}"
        )))
    }
}

// ============================================================================
// Value decoding
// ============================================================================

pub(crate) fn text(value: &turso::Value, column: &str) -> Result<String, StoreError> {
    match value {
        turso::Value::Text(s) => Ok(s.clone()),
        other => Err(StoreError::Serialization(format!(
            "column '{column}': expected text, got {other:?}"
        ))),
    }
}

pub(crate) fn opt_text(value: &turso::Value, column: &str) -> Result<Option<String>, StoreError> {
    match value {
        turso::Value::Null => Ok(None),
        other => text(other, column).map(Some),
    }
}

pub(crate) fn integer(value: &turso::Value, column: &str) -> Result<i64, StoreError> {
    match value {
        turso::Value::Integer(i) => Ok(*i),
        other => Err(StoreError::Serialization(format!(
            "column '{column}': expected integer, got {other:?}"
        ))),
    }
}

pub(crate) fn opt_integer(
    value: &turso::Value,
    column: &str,
) -> Result<Option<i64>, StoreError> {
    match value {
        turso::Value::Null => Ok(None),
        other => integer(other, column).map(Some),
    }
}

pub(crate) fn boolean(value: &turso::Value, column: &str) -> Result<bool, StoreError> {
    Ok(integer(value, column)? != 0)
}

/// Decode a numeric cell from whatever affinity SQLite stored it with.
pub(crate) fn decimal(value: &turso::Value, column: &str) -> Result<Decimal, StoreError> {
    match value {
        turso::Value::Null => Ok(Decimal::ZERO),
        turso::Value::Integer(i) => Ok(Decimal::from(*i)),
        turso::Value::Real(f) => Decimal::try_from(*f).map_err(|e| {
            StoreError::Serialization(format!("column '{column}': {e}"))
        }),
        turso::Value::Text(s) => Decimal::from_str_exact(s).map_err(|e| {
            StoreError::Serialization(format!("column '{column}': {e}"))
        }),
        turso::Value::Blob(_) => Err(StoreError::Serialization(format!(
            "column '{column}': expected number, got blob"
        ))),
    }
}
