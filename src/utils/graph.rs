//! Dependency graph utilities
//!
//! Shared cycle detection and topological ordering used by both the service
//! registry and the module loader, so the two components agree on what a
//! cycle is and how load order is computed.

use std::collections::{HashMap, HashSet};

/// Adjacency map: node name -> names it depends on.
pub type DependencyGraph = HashMap<String, Vec<String>>;

/// Find a dependency cycle reachable from `start`, if one exists.
///
/// Depth-first traversal tracking the current path; a name reappearing in
/// that path is the cycle. Returns the explicit chain ending in the repeated
/// name (e.g. `["a", "b", "a"]`). Edges to unknown nodes are ignored - a
/// missing dependency is a different failure, not a cycle.
pub fn find_cycle(graph: &DependencyGraph, start: &str) -> Option<Vec<String>> {
    let mut path = Vec::new();
    let mut visited = HashSet::new();
    dfs(graph, start, &mut path, &mut visited)
}

fn dfs(
    graph: &DependencyGraph,
    node: &str,
    path: &mut Vec<String>,
    visited: &mut HashSet<String>,
) -> Option<Vec<String>> {
    if let Some(pos) = path.iter().position(|n| n == node) {
        let mut chain: Vec<String> = path[pos..].to_vec();
        chain.push(node.to_string());
        return Some(chain);
    }
    if visited.contains(node) {
        return None;
    }

    path.push(node.to_string());
    if let Some(deps) = graph.get(node) {
        for dep in deps {
            if let Some(chain) = dfs(graph, dep, path, visited) {
                return Some(chain);
            }
        }
    }
    path.pop();
    visited.insert(node.to_string());
    None
}

/// Topological sort of the whole graph, dependencies (leaves) first.
///
/// Kahn's algorithm, with ties broken by the order nodes appear in
/// `insertion_order` so registration order is stable across recomputations.
/// Returns `Err` with one of the offending cycles if the graph is cyclic.
pub fn topological_order(
    graph: &DependencyGraph,
    insertion_order: &[String],
) -> Result<Vec<String>, Vec<String>> {
    // out_degree counts unresolved dependencies; dependents is the reverse map
    let mut out_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for name in insertion_order {
        out_degree.entry(name.as_str()).or_insert(0);
    }
    for (name, deps) in graph {
        for dep in deps {
            // Edges leaving the graph (services satisfied elsewhere) don't
            // constrain the order.
            if !graph.contains_key(dep.as_str()) {
                continue;
            }
            *out_degree.entry(name.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(name.as_str());
        }
    }

    let mut emitted: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(insertion_order.len());

    // Repeatedly take the earliest-registered node whose dependencies are all
    // satisfied, so ties keep registration order.
    loop {
        let next = insertion_order
            .iter()
            .map(String::as_str)
            .find(|n| !emitted.contains(n) && out_degree.get(n).copied() == Some(0));
        let Some(node) = next else { break };

        emitted.insert(node);
        order.push(node.to_string());
        if let Some(deps) = dependents.get(node) {
            for dependent in deps {
                let degree = out_degree.get_mut(dependent).expect("known node");
                *degree -= 1;
            }
        }
    }

    if order.len() != insertion_order.len() {
        // Some node never reached zero degree; report one of its cycles
        for name in insertion_order {
            if !order.contains(name) {
                if let Some(chain) = find_cycle(graph, name) {
                    return Err(chain);
                }
            }
        }
        return Err(vec![]);
    }

    Ok(order)
}
