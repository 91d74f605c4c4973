//! Dependency ordering for math rules.
//!
//! Builds the directed graph `dependency → target` over the run's
//! `NODE_ARITHMETIC` rules and produces a topological order of their target
//! nodes via Kahn's algorithm. Nodes that appear only as dependencies are
//! treated as already available. A cycle fails the run, naming the nodes
//! involved.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::CalcError;

/// A math rule's target node and its declared dependencies.
#[derive(Debug, Clone)]
pub struct DependencyEntry {
    /// Node the rule writes.
    pub target: String,
    /// Declared dependency node ids.
    pub dependencies: Vec<String>,
}

/// Order math-rule targets so every dependency evaluates first.
///
/// # Errors
///
/// Returns `CalcError::CircularDependency` naming the cycle when the
/// declared graph is not a DAG.
pub fn topological_order(entries: &[DependencyEntry]) -> Result<Vec<String>, CalcError> {
    // BTree containers keep the order deterministic across runs.
    let targets: BTreeSet<&str> = entries.iter().map(|e| e.target.as_str()).collect();

    // Edges dependency -> target, restricted to targets; external nodes are
    // already-final values.
    let mut in_degree: BTreeMap<&str, usize> = targets.iter().map(|t| (*t, 0)).collect();
    let mut downstream: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for entry in entries {
        for dep in &entry.dependencies {
            if targets.contains(dep.as_str()) && dep != &entry.target {
                downstream
                    .entry(dep.as_str())
                    .or_default()
                    .push(entry.target.as_str());
                if let Some(count) = in_degree.get_mut(entry.target.as_str()) {
                    *count += 1;
                }
            }
        }
        // A rule depending on its own node is a one-node cycle.
        if entry.dependencies.iter().any(|d| d == &entry.target) {
            return Err(CalcError::CircularDependency {
                cycle: vec![entry.target.clone(), entry.target.clone()],
            });
        }
    }

    let mut frontier: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut order = Vec::with_capacity(targets.len());
    while let Some(node) = frontier.pop_front() {
        order.push(node.to_string());
        if let Some(next) = downstream.get(node) {
            for target in next {
                if let Some(count) = in_degree.get_mut(target) {
                    *count -= 1;
                    if *count == 0 {
                        frontier.push_back(target);
                    }
                }
            }
        }
    }

    if order.len() == targets.len() {
        return Ok(order);
    }

    // A component survived the drain: isolate one cycle for the error.
    let remaining: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(node, _)| *node)
        .collect();
    Err(CalcError::CircularDependency {
        cycle: isolate_cycle(&remaining, &downstream),
    })
}

/// Walk the remaining subgraph until a node repeats, then return the loop.
fn isolate_cycle(
    remaining: &BTreeSet<&str>,
    downstream: &BTreeMap<&str, Vec<&str>>,
) -> Vec<String> {
    let Some(start) = remaining.iter().next() else {
        return Vec::new();
    };
    let mut path: Vec<&str> = Vec::new();
    let mut current = *start;
    loop {
        if let Some(position) = path.iter().position(|n| *n == current) {
            let mut cycle: Vec<String> = path[position..].iter().map(|s| (*s).to_string()).collect();
            cycle.push(current.to_string());
            return cycle;
        }
        path.push(current);
        let next = downstream
            .get(current)
            .and_then(|targets| targets.iter().find(|t| remaining.contains(*t)));
        match next {
            Some(node) => current = *node,
            // Dead end inside the remainder; report the path walked.
            None => return path.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(target: &str, deps: &[&str]) -> DependencyEntry {
        DependencyEntry {
            target: target.to_string(),
            dependencies: deps.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn orders_simple_chain() {
        let order = topological_order(&[
            entry("C", &["A", "B"]),
            entry("B", &["A"]),
            entry("A", &[]),
        ])
        .unwrap();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn external_dependencies_are_available() {
        // L1/L2 are plain hierarchy nodes, not math targets.
        let order = topological_order(&[entry("C", &["L1", "L2"])]).unwrap();
        assert_eq!(order, vec!["C"]);
    }

    #[test]
    fn independent_targets_keep_deterministic_order() {
        let order = topological_order(&[entry("Z", &[]), entry("A", &[]), entry("M", &[])]).unwrap();
        assert_eq!(order, vec!["A", "M", "Z"]);
    }

    #[test]
    fn two_node_cycle_is_reported() {
        let err = topological_order(&[entry("A", &["B"]), entry("B", &["A"])]).unwrap_err();
        match err {
            CalcError::CircularDependency { cycle } => {
                assert!(cycle.contains(&"A".to_string()));
                assert!(cycle.contains(&"B".to_string()));
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let err = topological_order(&[entry("A", &["A"])]).unwrap_err();
        assert_eq!(err.reason(), "CIRCULAR_DEPENDENCY");
    }

    #[test]
    fn cycle_inside_larger_graph() {
        let err = topological_order(&[
            entry("A", &[]),
            entry("B", &["A", "D"]),
            entry("C", &["B"]),
            entry("D", &["C"]),
        ])
        .unwrap_err();
        match err {
            CalcError::CircularDependency { cycle } => {
                for node in ["B", "C", "D"] {
                    assert!(cycle.contains(&node.to_string()), "missing {node} in {cycle:?}");
                }
                assert!(!cycle.contains(&"A".to_string()));
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn diamond_orders_dependencies_first() {
        let order = topological_order(&[
            entry("D", &["B", "C"]),
            entry("B", &["A"]),
            entry("C", &["A"]),
            entry("A", &[]),
        ])
        .unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("A") < pos("B"));
        assert!(pos("A") < pos("C"));
        assert!(pos("B") < pos("D"));
        assert!(pos("C") < pos("D"));
    }
}
