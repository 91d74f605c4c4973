//! Turso adapter for the fact store.
//!
//! Fact tables are use-case-specific; their shape is discovered through
//! `PRAGMA table_info` and classified by column affinity. All rule
//! aggregation runs as `SELECT <agg>(<col>) ... WHERE <predicate>` with the
//! predicate rendered (and scanned) by the engine's converter.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{Database, db_err, decimal, ensure_identifier, integer};
use crate::application::ports::{FactStorePort, FilterPreview, StoreError, fact_table_name};
use crate::domain::{Aggregation, FactRow, FactSchema, Predicate, USE_CASE_COLUMN, UseCase};
use crate::engine::predicate::{ensure_safe_sql, escape_text, to_sql};

/// Column SQLite uses to identify the owning leaf in ledger-shaped tables.
const LEAF_COLUMN: &str = "leaf_id";

/// Fact tables in turso.
pub struct TursoFactStore {
    db: Arc<Database>,
}

impl TursoFactStore {
    /// Create the adapter.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append rows to a fact table (seeding and tests).
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn insert_rows(
        &self,
        schema: &FactSchema,
        rows: &[FactRow],
    ) -> Result<(), StoreError> {
        ensure_identifier(&schema.table)?;
        let conn = self.db.connect()?;
        for row in rows {
            let mut columns: Vec<&str> = Vec::new();
            let mut values: Vec<String> = Vec::new();
            for (column, value) in &row.dimensions {
                ensure_identifier(column)?;
                columns.push(column);
                values.push(format!("'{}'", escape_text(value)));
            }
            for (column, value) in &row.measures {
                ensure_identifier(column)?;
                columns.push(column);
                values.push(value.to_string());
            }
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                schema.table,
                columns.join(", "),
                values.join(", ")
            );
            conn.execute(&sql, ()).await.map_err(db_err)?;
        }
        Ok(())
    }

    async fn table_schema(&self, table: &str) -> Result<FactSchema, StoreError> {
        ensure_identifier(table)?;
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(&format!("PRAGMA table_info({table})"), ())
            .await
            .map_err(db_err)?;

        let mut dimension_columns = Vec::new();
        let mut measure_columns = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let name = match row.get_value(1).map_err(db_err)? {
                turso::Value::Text(s) => s,
                other => {
                    return Err(StoreError::Serialization(format!(
                        "table_info name: {other:?}"
                    )));
                }
            };
            let declared = match row.get_value(2).map_err(db_err)? {
                turso::Value::Text(s) => s.to_uppercase(),
                _ => String::new(),
            };
            if is_numeric_affinity(&declared) {
                measure_columns.push(name);
            } else {
                dimension_columns.push(name);
            }
        }

        if dimension_columns.is_empty() && measure_columns.is_empty() {
            return Err(StoreError::Database(format!("no such fact table: {table}")));
        }
        Ok(FactSchema {
            table: table.to_string(),
            leaf_column: LEAF_COLUMN.to_string(),
            dimension_columns,
            measure_columns,
        })
    }

    fn scope_clause(schema: &FactSchema, use_case: &UseCase) -> Option<String> {
        schema.scoped_by_use_case().then(|| {
            format!(
                "{USE_CASE_COLUMN} = '{}'",
                escape_text(&use_case.id)
            )
        })
    }

    fn where_clause(scope: Option<String>, fragment: Option<String>) -> String {
        let parts: Vec<String> = scope.into_iter().chain(fragment).collect();
        if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        }
    }
}

fn is_numeric_affinity(declared: &str) -> bool {
    ["REAL", "INT", "NUM", "DEC", "FLOAT", "DOUBLE"]
        .iter()
        .any(|kind| declared.contains(kind))
}

async fn count_rows(conn: &turso::Connection, sql: &str) -> Result<u64, StoreError> {
    let mut rows = conn.query(sql, ()).await.map_err(db_err)?;
    let Some(row) = rows.next().await.map_err(db_err)? else {
        return Ok(0);
    };
    let value = integer(&row.get_value(0).map_err(db_err)?, "count")?;
    Ok(u64::try_from(value).unwrap_or(0))
}

#[async_trait]
impl FactStorePort for TursoFactStore {
    async fn fact_schema(&self, use_case: &UseCase) -> Result<FactSchema, StoreError> {
        self.table_schema(fact_table_name(use_case)).await
    }

    async fn load_facts(&self, use_case: &UseCase) -> Result<Vec<FactRow>, StoreError> {
        let schema = self.fact_schema(use_case).await?;
        let conn = self.db.connect()?;

        // The leaf column, when present, is part of dimension_columns.
        let mut columns: Vec<String> = schema.dimension_columns.clone();
        columns.extend(schema.measure_columns.iter().cloned());

        let where_clause =
            Self::where_clause(Self::scope_clause(&schema, use_case), None);
        let sql = format!(
            "SELECT {} FROM {}{where_clause}",
            columns.join(", "),
            schema.table
        );

        let mut rows = conn.query(&sql, ()).await.map_err(db_err)?;
        let mut facts = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let mut fact = FactRow::default();
            for (index, column) in columns.iter().enumerate() {
                let value = row.get_value(index).map_err(db_err)?;
                if schema.is_measure(column) {
                    fact.measures
                        .insert(column.clone(), decimal(&value, column)?);
                } else {
                    match value {
                        turso::Value::Null => {}
                        turso::Value::Text(s) => {
                            fact.dimensions.insert(column.clone(), s);
                        }
                        turso::Value::Integer(i) => {
                            fact.dimensions.insert(column.clone(), i.to_string());
                        }
                        turso::Value::Real(f) => {
                            fact.dimensions.insert(column.clone(), f.to_string());
                        }
                        turso::Value::Blob(_) => {
                            return Err(StoreError::Serialization(format!(
                                "column '{column}': unexpected blob"
                            )));
                        }
                    }
                }
            }
            facts.push(fact);
        }
        Ok(facts)
    }

    async fn aggregate(
        &self,
        use_case: &UseCase,
        aggregation: Aggregation,
        column: &str,
        predicate: &Predicate,
    ) -> Result<Decimal, StoreError> {
        let schema = self.fact_schema(use_case).await?;
        ensure_identifier(column)?;
        let fragment = to_sql(predicate, &schema)
            .map_err(|e| StoreError::Constraint(e.to_string()))?;

        let select = if aggregation == Aggregation::Count {
            "COUNT(*)".to_string()
        } else {
            format!("{}({column})", aggregation.sql_name())
        };
        let where_clause =
            Self::where_clause(Self::scope_clause(&schema, use_case), Some(fragment));
        let sql = format!("SELECT {select} FROM {}{where_clause}", schema.table);

        let conn = self.db.connect()?;
        let mut rows = conn.query(&sql, ()).await.map_err(db_err)?;
        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(Decimal::ZERO);
        };
        decimal(&row.get_value(0).map_err(db_err)?, "aggregate")
    }

    async fn preview_filter(
        &self,
        table: &str,
        where_sql: &str,
    ) -> Result<FilterPreview, StoreError> {
        ensure_identifier(table)?;
        // The use case layer already guards; re-scan anyway before the
        // fragment reaches a connection.
        ensure_safe_sql(where_sql).map_err(|e| StoreError::Constraint(e.to_string()))?;

        let conn = self.db.connect()?;
        let total_rows = count_rows(&conn, &format!("SELECT COUNT(*) FROM {table}")).await?;
        let affected_rows = count_rows(
            &conn,
            &format!("SELECT COUNT(*) FROM {table} WHERE {where_sql}"),
        )
        .await?;
        Ok(FilterPreview {
            affected_rows,
            total_rows,
        })
    }
}
