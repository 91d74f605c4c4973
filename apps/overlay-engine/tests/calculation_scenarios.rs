//! End-to-end calculation scenarios against the in-memory ports.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use overlay_engine::application::Stores;
use overlay_engine::application::ports::{
    FactTable, InMemoryFactStore, InMemoryHierarchyStore, InMemoryResultStore, InMemoryRuleStore,
    InMemoryUseCaseStore, ResultStorePort,
};
use overlay_engine::application::use_cases::{
    CalculateCommand, GetResultsUseCase, ListRunsUseCase, RunCalculationUseCase,
};
use overlay_engine::domain::{
    CANONICAL_LEDGER_TABLE, Condition, ConditionValue, Conjunction, FactRow, FactSchema,
    HierarchyNode, MeasureMapping, Predicate, PredicateOp, RollupValueSource, Rule, RuleBody,
    ScalarValue,
};
use overlay_engine::engine::PipelineConfig;
use overlay_engine::{RunOutcome, RunStatus, UseCase, UseCaseStatus};

// ============================================================================
// Fixture helpers
// ============================================================================

fn node(id: &str, parent: Option<&str>, depth: u32, is_leaf: bool) -> HierarchyNode {
    HierarchyNode {
        node_id: id.to_string(),
        parent_node_id: parent.map(str::to_string),
        node_name: id.to_string(),
        depth,
        is_leaf,
        structure_id: "s1".to_string(),
        rollup_driver: None,
        rollup_value_source: RollupValueSource::NodeId,
    }
}

fn ledger_schema(extra_measures: &[&str]) -> FactSchema {
    let mut measures = vec!["daily_pnl".to_string()];
    measures.extend(extra_measures.iter().map(|m| (*m).to_string()));
    FactSchema {
        table: CANONICAL_LEDGER_TABLE.to_string(),
        leaf_column: "leaf_id".to_string(),
        dimension_columns: vec![
            "use_case_id".to_string(),
            "strategy".to_string(),
            "process_2".to_string(),
        ],
        measure_columns: measures,
    }
}

fn ledger_row(leaf: &str, strategy: &str, daily: Decimal) -> FactRow {
    let mut row = FactRow::default();
    row.dimensions
        .insert("use_case_id".to_string(), "uc1".to_string());
    row.dimensions.insert("leaf_id".to_string(), leaf.to_string());
    row.dimensions
        .insert("strategy".to_string(), strategy.to_string());
    row.measures.insert("daily_pnl".to_string(), daily);
    row
}

fn use_case() -> UseCase {
    UseCase {
        id: "uc1".to_string(),
        name: "Scenario".to_string(),
        owner: "desk".to_string(),
        structure_id: "s1".to_string(),
        input_table_name: None,
        measure_mapping: MeasureMapping::new([("daily", "daily_pnl")]),
        status: UseCaseStatus::Active,
    }
}

struct Fixture {
    stores: Stores,
    rules: Arc<InMemoryRuleStore>,
    results: Arc<InMemoryResultStore>,
}

fn fixture(nodes: Vec<HierarchyNode>, table: FactTable) -> Fixture {
    fixture_for(use_case(), nodes, table)
}

fn fixture_for(use_case: UseCase, nodes: Vec<HierarchyNode>, table: FactTable) -> Fixture {
    let use_cases = Arc::new(InMemoryUseCaseStore::new());
    use_cases.insert(use_case);

    let facts = Arc::new(InMemoryFactStore::new());
    facts.insert_table(table);

    let hierarchies = Arc::new(InMemoryHierarchyStore::new());
    hierarchies.insert_structure("s1", nodes);

    let rules = Arc::new(InMemoryRuleStore::new());
    let results = Arc::new(InMemoryResultStore::new());
    let stores = Stores {
        use_cases,
        facts,
        hierarchies,
        rules: rules.clone(),
        results: results.clone(),
    };
    Fixture {
        stores,
        rules,
        results,
    }
}

/// Root with leaves L1 (100) and L2 (40).
fn two_leaf_fixture() -> Fixture {
    fixture(
        vec![
            node("R", None, 0, false),
            node("L1", Some("R"), 1, true),
            node("L2", Some("R"), 1, true),
        ],
        FactTable {
            schema: ledger_schema(&[]),
            rows: vec![
                ledger_row("L1", "CORE", dec!(60)),
                ledger_row("L1", "MACRO", dec!(40)),
                ledger_row("L2", "MACRO", dec!(40)),
            ],
        },
    )
}

/// R → P → {L1 (100), L2 (40)}.
fn parent_fixture() -> Fixture {
    fixture(
        vec![
            node("R", None, 0, false),
            node("P", Some("R"), 1, false),
            node("L1", Some("P"), 2, true),
            node("L2", Some("P"), 2, true),
        ],
        FactTable {
            schema: ledger_schema(&[]),
            rows: vec![
                ledger_row("L1", "CORE", dec!(70)),
                ledger_row("L1", "MACRO", dec!(30)),
                ledger_row("L2", "MACRO", dec!(40)),
            ],
        },
    )
}

fn filter_rule(id: &str, node_id: &str, field: &str, value: &str) -> Rule {
    Rule {
        id: id.to_string(),
        use_case_id: "uc1".to_string(),
        node_id: node_id.to_string(),
        measure_name: "daily".to_string(),
        body: RuleBody::Filter {
            predicate: Predicate {
                conjunction: Conjunction::And,
                conditions: vec![Condition {
                    field: field.to_string(),
                    operator: PredicateOp::Equals,
                    value: ConditionValue::Scalar(ScalarValue::Text(value.to_string())),
                }],
            },
        },
        last_modified_at: Utc::now(),
    }
}

fn math_rule(id: &str, node_id: &str, expression: &str, deps: &[&str]) -> Rule {
    Rule {
        id: id.to_string(),
        use_case_id: "uc1".to_string(),
        node_id: node_id.to_string(),
        measure_name: "daily".to_string(),
        body: RuleBody::NodeArithmetic {
            expression: expression.to_string(),
            dependencies: deps.iter().map(|s| (*s).to_string()).collect(),
        },
        last_modified_at: Utc::now(),
    }
}

async fn calculate(fixture: &Fixture) -> Result<RunOutcome, overlay_engine::CalcError> {
    RunCalculationUseCase::new(fixture.stores.clone(), PipelineConfig::default())
        .execute(CalculateCommand {
            use_case_id: "uc1".to_string(),
            pnl_date: "2025-06-30".to_string(),
            version_tag: None,
            triggered_by: "test".to_string(),
            cancel: CancellationToken::new(),
        })
        .await
}

fn values(outcome: &RunOutcome) -> HashMap<String, (Decimal, Decimal)> {
    outcome
        .results
        .iter()
        .map(|r| {
            (
                r.node_id.clone(),
                (r.measure_vector.get("daily"), r.plug_vector.get("daily")),
            )
        })
        .collect()
}

// ============================================================================
// Core scenarios
// ============================================================================

#[tokio::test]
async fn identity_run_has_zero_plug_everywhere() {
    let f = two_leaf_fixture();
    let outcome = calculate(&f).await.unwrap();

    let v = values(&outcome);
    assert_eq!(v["R"], (dec!(140), dec!(0)));
    assert_eq!(v["L1"], (dec!(100), dec!(0)));
    assert_eq!(v["L2"], (dec!(40), dec!(0)));
    assert!(outcome.results.iter().all(|r| r.is_reconciled));
    assert!(outcome.results.iter().all(|r| !r.is_override));
    assert!(outcome.run.anomaly.is_none());
}

#[tokio::test]
async fn single_leaf_override_reaggregates_ancestors() {
    let f = two_leaf_fixture();
    // FILTER at L1 keeps only the CORE slice (60 of its 100).
    f.rules
        .upsert(filter_rule("r1", "L1", "strategy", "CORE"));
    let outcome = calculate(&f).await.unwrap();

    let v = values(&outcome);
    assert_eq!(v["L1"], (dec!(60), dec!(40)));
    assert_eq!(v["L2"], (dec!(40), dec!(0)));
    assert_eq!(v["R"], (dec!(100), dec!(40)));

    let l1 = outcome.results.iter().find(|r| r.node_id == "L1").unwrap();
    assert!(l1.is_override);
    assert!(!l1.is_reconciled);
}

#[tokio::test]
async fn leaf_override_propagates_through_parent() {
    // Same override on the deeper tree: the CORE slice of L1 is 70.
    let f = parent_fixture();
    f.rules
        .upsert(filter_rule("r1", "L1", "strategy", "CORE"));
    let outcome = calculate(&f).await.unwrap();

    let v = values(&outcome);
    assert_eq!(v["L1"], (dec!(70), dec!(30)));
    assert_eq!(v["L2"], (dec!(40), dec!(0)));
    assert_eq!(v["P"], (dec!(110), dec!(30)));
    assert_eq!(v["R"], (dec!(110), dec!(30)));
}

#[tokio::test]
async fn most_specific_wins_skips_the_parent_rule() {
    let f = parent_fixture();
    // The rule at P would match everything (200-ish); L1's rule is more
    // specific, so P's must be skipped.
    f.rules
        .upsert(filter_rule("rp", "P", "strategy", "MACRO"));
    f.rules
        .upsert(filter_rule("rl", "L1", "strategy", "CORE"));
    let outcome = calculate(&f).await.unwrap();

    let v = values(&outcome);
    assert_eq!(v["L1"].0, dec!(70));
    assert_eq!(v["L2"].0, dec!(40));
    assert_eq!(v["P"].0, dec!(110));

    let p = outcome.results.iter().find(|r| r.node_id == "P").unwrap();
    assert!(!p.is_override);
}

#[tokio::test]
async fn filter_arithmetic_folds_query_results() {
    // Q1 = SUM(commission) where strategy = CORE = 180
    // Q2 = SUM(trade) where strategy = CORE and process_2 in {SWAP, SD} = 1900
    let mut rows = vec![ledger_row("L1", "CORE", dec!(100)), {
        let mut row = ledger_row("L2", "MACRO", dec!(40));
        row.measures.insert("commission".to_string(), dec!(999));
        row
    }];
    rows[0].measures.insert("commission".to_string(), dec!(80));
    let mut swap = ledger_row("L1", "CORE", dec!(0));
    swap.dimensions
        .insert("process_2".to_string(), "SWAP".to_string());
    swap.measures.insert("commission".to_string(), dec!(100));
    swap.measures.insert("trade".to_string(), dec!(1500));
    let mut sd = ledger_row("L2", "CORE", dec!(0));
    sd.dimensions
        .insert("process_2".to_string(), "SD".to_string());
    sd.measures.insert("trade".to_string(), dec!(400));
    rows.push(swap);
    rows.push(sd);

    let f = fixture(
        vec![
            node("R", None, 0, false),
            node("L1", Some("R"), 1, true),
            node("L2", Some("R"), 1, true),
        ],
        FactTable {
            schema: ledger_schema(&["commission", "trade"]),
            rows,
        },
    );

    let document = serde_json::from_str(
        r#"{
            "version": "2.0",
            "expression": {
                "operator": "+",
                "operands": [
                    {"type": "query", "query_id": "q1"},
                    {"type": "query", "query_id": "q2"}
                ]
            },
            "queries": [
                {"query_id": "q1", "measure": "commission", "aggregation": "SUM",
                 "filters": [
                    {"field": "strategy", "operator": "equals", "value": "CORE"}]},
                {"query_id": "q2", "measure": "trade", "aggregation": "SUM",
                 "filters": [
                    {"field": "strategy", "operator": "equals", "value": "CORE"},
                    {"field": "process_2", "operator": "in", "value": ["SWAP", "SD"]}]}
            ]
        }"#,
    )
    .unwrap();
    f.rules.upsert(Rule {
        id: "r2b".to_string(),
        use_case_id: "uc1".to_string(),
        node_id: "L1".to_string(),
        measure_name: "daily".to_string(),
        body: RuleBody::FilterArithmetic { document },
        last_modified_at: Utc::now(),
    });

    let outcome = calculate(&f).await.unwrap();
    let v = values(&outcome);
    assert_eq!(v["L1"].0, dec!(2080));
}

#[tokio::test]
async fn math_rule_redefines_a_node_from_its_dependencies() {
    // A=50, B=30, C has facts worth 20 but a math rule C = A + B.
    let f = fixture(
        vec![
            node("R", None, 0, false),
            node("A", Some("R"), 1, true),
            node("B", Some("R"), 1, true),
            node("C", Some("R"), 1, true),
        ],
        FactTable {
            schema: ledger_schema(&[]),
            rows: vec![
                ledger_row("A", "CORE", dec!(50)),
                ledger_row("B", "CORE", dec!(30)),
                ledger_row("C", "CORE", dec!(20)),
            ],
        },
    );
    f.rules.upsert(math_rule("rc", "C", "A + B", &["A", "B"]));

    let outcome = calculate(&f).await.unwrap();
    let v = values(&outcome);
    assert_eq!(v["C"], (dec!(80), dec!(-60)));
    // Stage 2 skipped C; R re-aggregated over the math value.
    assert_eq!(v["R"].0, dec!(160));
    let c = outcome.results.iter().find(|r| r.node_id == "C").unwrap();
    assert!(c.is_override);
}

#[tokio::test]
async fn chained_math_rules_follow_dependency_order() {
    let f = fixture(
        vec![
            node("R", None, 0, false),
            node("A", Some("R"), 1, true),
            node("B", Some("R"), 1, true),
            node("C", Some("R"), 1, true),
        ],
        FactTable {
            schema: ledger_schema(&[]),
            rows: vec![ledger_row("A", "CORE", dec!(50))],
        },
    );
    // C depends on B which depends on A; declaration order is reversed.
    f.rules.upsert(math_rule("rc", "C", "B * 2", &["B"]));
    f.rules.upsert(math_rule("rb", "B", "A + 10", &["A"]));

    let outcome = calculate(&f).await.unwrap();
    let v = values(&outcome);
    assert_eq!(v["B"].0, dec!(60));
    assert_eq!(v["C"].0, dec!(120));
}

#[tokio::test]
async fn cyclic_math_rules_fail_the_run() {
    let f = two_leaf_fixture();
    f.rules.upsert(math_rule("ra", "L1", "L2 + 1", &["L2"]));
    f.rules.upsert(math_rule("rb", "L2", "L1 + 1", &["L1"]));

    let err = calculate(&f).await.unwrap_err();
    match err {
        overlay_engine::CalcError::CircularDependency { cycle } => {
            assert!(cycle.contains(&"L1".to_string()));
            assert!(cycle.contains(&"L2".to_string()));
        }
        other => panic!("expected CircularDependency, got {other}"),
    }

    // No results persisted; the run is FAILED.
    let runs = f.results.list_runs(Some("uc1"), None).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(
        f.results
            .load_results(&runs[0].run_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn strategy_table_with_hybrid_parent() {
    // Dedicated fact table keyed by the nodes' rollup driver; P both holds
    // direct facts and parents two leaves.
    let strategy_node = |id: &str, parent: Option<&str>, depth: u32, is_leaf: bool| {
        HierarchyNode {
            rollup_driver: Some("strategy".to_string()),
            ..node(id, parent, depth, is_leaf)
        }
    };
    let schema = FactSchema {
        table: "pnl_strategy".to_string(),
        leaf_column: "leaf_id".to_string(),
        dimension_columns: vec!["strategy".to_string()],
        measure_columns: vec!["pnl_daily".to_string()],
    };
    let row = |strategy: &str, daily: Decimal| {
        let mut r = FactRow::default();
        r.dimensions
            .insert("strategy".to_string(), strategy.to_string());
        r.measures.insert("pnl_daily".to_string(), daily);
        r
    };
    let f = fixture_for(
        UseCase {
            input_table_name: Some("pnl_strategy".to_string()),
            measure_mapping: MeasureMapping::new([("daily", "pnl_daily")]),
            ..use_case()
        },
        vec![
            node("R", None, 0, false),
            strategy_node("P", Some("R"), 1, false),
            strategy_node("L1", Some("P"), 2, true),
            strategy_node("L2", Some("P"), 2, true),
        ],
        FactTable {
            schema,
            rows: vec![
                row("L1", dec!(100)),
                row("L2", dec!(40)),
                row("P", dec!(25)),
            ],
        },
    );

    let outcome = calculate(&f).await.unwrap();
    let v = values(&outcome);
    // P's direct 25 sits on top of its children's 140.
    assert_eq!(v["P"], (dec!(165), dec!(0)));
    assert_eq!(v["R"], (dec!(165), dec!(0)));
    assert_eq!(v["L1"], (dec!(100), dec!(0)));

    // The hybrid direct share is not owned by any leaf, so the
    // completeness check reports it on the synthetic orphan bucket while
    // the root still reconciles.
    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert!(outcome.report.root_reconciled);
    assert!(!outcome.report.complete);
    let orphan = outcome
        .results
        .iter()
        .find(|r| r.node_id == overlay_engine::domain::NODE_ORPHAN)
        .unwrap();
    assert_eq!(orphan.plug_vector.get("daily"), dec!(25));
}

// ============================================================================
// Boundary behaviours and invariants
// ============================================================================

#[tokio::test]
async fn math_rule_referencing_unknown_node_evaluates_it_to_zero() {
    let f = two_leaf_fixture();
    f.rules
        .upsert(math_rule("r1", "L1", "GHOST + L2", &["GHOST", "L2"]));

    let outcome = calculate(&f).await.unwrap();
    let v = values(&outcome);
    assert_eq!(v["L1"].0, dec!(40));
}

#[tokio::test]
async fn division_by_zero_fails_the_run() {
    let f = two_leaf_fixture();
    f.rules
        .upsert(math_rule("r1", "L1", "L2 / (L2 - L2)", &["L2"]));

    let err = calculate(&f).await.unwrap_err();
    assert_eq!(err.reason(), "DIVISION_BY_ZERO");
}

#[tokio::test]
async fn two_identical_runs_produce_identical_vectors() {
    let f = parent_fixture();
    f.rules
        .upsert(filter_rule("r1", "L1", "strategy", "CORE"));

    let first = calculate(&f).await.unwrap();
    let second = calculate(&f).await.unwrap();
    assert_ne!(first.run.run_id, second.run.run_id);

    let first_vals = values(&first);
    let second_vals = values(&second);
    assert_eq!(first_vals, second_vals);
}

#[tokio::test]
async fn plug_equals_natural_minus_adjusted_everywhere() {
    let f = parent_fixture();
    f.rules
        .upsert(filter_rule("r1", "L1", "strategy", "CORE"));
    let outcome = calculate(&f).await.unwrap();

    let tree = GetResultsUseCase::new(f.stores.clone())
        .execute("uc1", Some(&outcome.run.run_id))
        .await
        .unwrap();
    let mut stack = vec![&tree.root];
    while let Some(view) = stack.pop() {
        assert_eq!(
            view.plug.get("daily"),
            view.natural.get("daily") - view.adjusted.get("daily"),
            "plug invariant broken at {}",
            view.node_id
        );
        // Re-aggregation invariant for non-leaves (no math rules here).
        if !view.children.is_empty() {
            let child_sum: Decimal = view
                .children
                .iter()
                .map(|c| c.adjusted.get("daily"))
                .sum();
            assert_eq!(view.adjusted.get("daily"), child_sum);
        }
        stack.extend(view.children.iter());
    }
}

#[tokio::test]
async fn list_runs_shows_both_outcomes() {
    let f = two_leaf_fixture();
    calculate(&f).await.unwrap();
    f.rules
        .upsert(math_rule("r1", "L1", "L2 / (L2 - L2)", &["L2"]));
    let _ = calculate(&f).await;

    let runs = ListRunsUseCase::new(f.stores.clone())
        .execute(Some("uc1"), None)
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().any(|r| r.status == RunStatus::Completed));
    assert!(runs.iter().any(|r| r.status == RunStatus::Failed));
}

// ============================================================================
// Property: the accounting identities hold for arbitrary ledgers
// ============================================================================

mod properties {
    use std::collections::{HashMap, HashSet};

    use overlay_engine::domain::Hierarchy;
    use overlay_engine::engine::rollup::natural_rollup;
    use overlay_engine::engine::stages::{StageState, compute_plugs, waterfall_up};
    use proptest::prelude::*;

    use super::*;

    fn leaf_values() -> impl Strategy<Value = Vec<(u8, i64)>> {
        prop::collection::vec((0u8..4, -1_000_000i64..1_000_000), 1..40)
    }

    proptest! {
        #[test]
        fn natural_rollup_conserves_every_cent(rows in leaf_values()) {
            let hierarchy = Hierarchy::new(
                "s1",
                vec![
                    node("R", None, 0, false),
                    node("P", Some("R"), 1, false),
                    node("L0", Some("P"), 2, true),
                    node("L1", Some("P"), 2, true),
                    node("L2", Some("R"), 1, true),
                    node("L3", Some("R"), 1, true),
                ],
            )
            .unwrap();

            let leaves = ["L0", "L1", "L2", "L3"];
            let facts: Vec<FactRow> = rows
                .iter()
                .map(|(leaf, cents)| {
                    ledger_row(leaves[*leaf as usize], "CORE", Decimal::new(*cents, 2))
                })
                .collect();

            let rollup =
                natural_rollup(&use_case(), &hierarchy, &ledger_schema(&[]), &facts).unwrap();
            let leaf_sum: Decimal = leaves
                .iter()
                .map(|l| rollup.natural[*l].get("daily"))
                .sum();
            let total: Decimal = facts.iter().map(|f| f.measure("daily_pnl")).sum();
            prop_assert_eq!(rollup.natural["R"].get("daily"), total);
            prop_assert_eq!(leaf_sum, total);
        }

        #[test]
        fn waterfall_keeps_plug_identity(
            rows in leaf_values(),
            override_cents in -500_000i64..500_000,
        ) {
            let hierarchy = Hierarchy::new(
                "s1",
                vec![
                    node("R", None, 0, false),
                    node("P", Some("R"), 1, false),
                    node("L0", Some("P"), 2, true),
                    node("L1", Some("P"), 2, true),
                    node("L2", Some("R"), 1, true),
                    node("L3", Some("R"), 1, true),
                ],
            )
            .unwrap();
            let leaves = ["L0", "L1", "L2", "L3"];
            let facts: Vec<FactRow> = rows
                .iter()
                .map(|(leaf, cents)| {
                    ledger_row(leaves[*leaf as usize], "CORE", Decimal::new(*cents, 2))
                })
                .collect();
            let rollup =
                natural_rollup(&use_case(), &hierarchy, &ledger_schema(&[]), &facts).unwrap();

            // Simulate a Stage-1a override at L0.
            let mut state = StageState {
                keys: vec!["daily".to_string()],
                natural: rollup.natural.clone(),
                adjusted: rollup.natural.clone(),
                applied_sql: HashSet::from(["L0".to_string()]),
                math_ruled: HashSet::new(),
            };
            state.adjusted.insert(
                "L0".to_string(),
                overlay_engine::MeasureVector::from_pairs([
                    ("daily", Decimal::new(override_cents, 2)),
                ]),
            );
            waterfall_up(&mut state, &hierarchy);
            let plugs = compute_plugs(&state);

            let all: HashMap<&str, Decimal> = plugs
                .iter()
                .map(|(k, v)| (k.as_str(), v.get("daily")))
                .collect();
            for (node_id, plug) in &all {
                let natural = state.natural[*node_id].get("daily");
                let adjusted = state.adjusted[*node_id].get("daily");
                prop_assert_eq!(*plug, natural - adjusted);
            }
            // Every non-leaf re-aggregates exactly.
            for parent in ["R", "P"] {
                let child_sum: Decimal = hierarchy
                    .children(parent)
                    .iter()
                    .map(|c| state.adjusted[c].get("daily"))
                    .sum();
                prop_assert_eq!(state.adjusted[parent].get("daily"), child_sum);
            }
        }
    }
}
