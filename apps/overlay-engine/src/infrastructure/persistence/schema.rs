//! Schema migrations for the overlay database.
//!
//! Statements are idempotent (`IF NOT EXISTS`) and applied in order on
//! startup. Monetary JSON blobs (measure/plug vectors, measure mappings)
//! are TEXT with string-encoded decimals so values round-trip exactly;
//! ledger measure columns carry numeric affinity for SQL aggregation.

/// Ordered, idempotent DDL statements.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS use_case (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        owner TEXT NOT NULL,
        structure_id TEXT NOT NULL,
        input_table_name TEXT,
        measure_mapping TEXT NOT NULL,
        status TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS hierarchy_node (
        structure_id TEXT NOT NULL,
        node_id TEXT NOT NULL,
        parent_node_id TEXT,
        node_name TEXT NOT NULL,
        depth INTEGER NOT NULL,
        is_leaf INTEGER NOT NULL,
        rollup_driver TEXT,
        rollup_value_source TEXT NOT NULL DEFAULT 'node_id',
        PRIMARY KEY (structure_id, node_id)
    )",
    "CREATE TABLE IF NOT EXISTS hierarchy_bridge (
        structure_id TEXT NOT NULL,
        ancestor_node_id TEXT NOT NULL,
        leaf_node_id TEXT NOT NULL,
        PRIMARY KEY (structure_id, ancestor_node_id, leaf_node_id)
    )",
    "CREATE TABLE IF NOT EXISTS rule (
        id TEXT PRIMARY KEY,
        use_case_id TEXT NOT NULL,
        node_id TEXT NOT NULL,
        measure_name TEXT NOT NULL,
        body TEXT NOT NULL,
        last_modified_at TEXT NOT NULL,
        UNIQUE (use_case_id, node_id)
    )",
    "CREATE TABLE IF NOT EXISTS calculation_run (
        run_id TEXT PRIMARY KEY,
        pnl_date TEXT NOT NULL,
        use_case_id TEXT NOT NULL,
        name TEXT NOT NULL,
        executed_at TEXT NOT NULL,
        status TEXT NOT NULL,
        triggered_by TEXT NOT NULL,
        duration_ms INTEGER,
        failure_reason TEXT,
        anomaly TEXT
    )",
    "CREATE TABLE IF NOT EXISTS calculated_result (
        run_id TEXT NOT NULL,
        node_id TEXT NOT NULL,
        measure_vector TEXT NOT NULL,
        plug_vector TEXT NOT NULL,
        is_override INTEGER NOT NULL,
        is_reconciled INTEGER NOT NULL,
        PRIMARY KEY (run_id, node_id)
    )",
    // Canonical P&L ledger. Use cases with a dedicated table reference it
    // by input_table_name instead.
    "CREATE TABLE IF NOT EXISTS pnl_ledger (
        use_case_id TEXT NOT NULL,
        leaf_id TEXT NOT NULL,
        cc_id TEXT,
        strategy TEXT,
        process_2 TEXT,
        daily_pnl REAL NOT NULL DEFAULT 0,
        mtd_pnl REAL NOT NULL DEFAULT 0,
        ytd_pnl REAL NOT NULL DEFAULT 0,
        commission REAL NOT NULL DEFAULT 0,
        trade REAL NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_rule_use_case ON rule (use_case_id)",
    "CREATE INDEX IF NOT EXISTS idx_run_use_case ON calculation_run (use_case_id, executed_at)",
    "CREATE INDEX IF NOT EXISTS idx_result_run ON calculated_result (run_id)",
    "CREATE INDEX IF NOT EXISTS idx_ledger_use_case ON pnl_ledger (use_case_id, leaf_id)",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_are_single_and_idempotent() {
        for statement in SCHEMA_STATEMENTS {
            assert!(!statement.contains(';'));
            assert!(statement.contains("IF NOT EXISTS"));
        }
    }
}
