// SPDX-License-Identifier: MIT

//! Dependency resolution
//!
//! Builds the node dependency graph from a definition's connections and
//! produces a reproducible topological order. Ties are broken by ascending
//! node id so an unchanged definition always yields the same plan.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::flow::workflow::types::WorkflowDefinition;
use crate::flow::Result;
use crate::sdk::{CycleError, FlowError};

/// Execution order plus the adjacency needed to schedule it
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionPlan {
    /// Topological order, ties broken by ascending node id
    pub order: Vec<String>,
    /// Nodes with no incoming connections, ready at run start
    pub roots: Vec<String>,
    #[serde(skip)]
    upstream: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    downstream: BTreeMap<String, Vec<String>>,
}

impl ExecutionPlan {
    /// Distinct producer node ids feeding `node_id`
    pub fn dependencies(&self, node_id: &str) -> &[String] {
        self.upstream
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Distinct consumer node ids fed by `node_id`
    pub fn dependents(&self, node_id: &str) -> &[String] {
        self.downstream
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn position(&self, node_id: &str) -> Option<usize> {
        self.order.iter().position(|id| id == node_id)
    }

    /// Every node reachable from `node_id` along connections
    pub fn transitive_dependents(&self, node_id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents(node_id).iter().map(|s| s.as_str()).collect();
        while let Some(current) = stack.pop() {
            if seen.insert(current.to_string()) {
                stack.extend(self.dependents(current).iter().map(|s| s.as_str()));
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Compute the execution plan for a definition.
///
/// Fails with `FlowError::Cycle` (carrying the full cycle) when the graph is
/// not a DAG, and with `FlowError::Planning` when connections reference
/// nodes that do not exist. A partial order is never returned.
pub fn plan(def: &WorkflowDefinition) -> Result<ExecutionPlan> {
    let mut upstream: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut downstream: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    let mut ids = HashSet::new();
    for node in &def.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(FlowError::planning(format!(
                "Duplicate node id '{}'",
                node.id
            )));
        }
        upstream.entry(node.id.clone()).or_default();
        downstream.entry(node.id.clone()).or_default();
    }

    for edge in &def.connections {
        for endpoint in [&edge.source, &edge.target] {
            if !ids.contains(endpoint.as_str()) {
                return Err(FlowError::planning(format!(
                    "Connection '{}' references unknown node '{}'",
                    edge.id, endpoint
                )));
            }
        }
        upstream
            .entry(edge.target.clone())
            .or_default()
            .insert(edge.source.clone());
        downstream
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.target.clone());
    }

    if let Some(cycle) = find_cycle(&downstream) {
        return Err(CycleError { cycle }.into());
    }

    let order = topological_order(&upstream, &downstream);
    let roots = upstream
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(id, _)| id.clone())
        .collect();

    Ok(ExecutionPlan {
        order,
        roots,
        upstream: flatten(upstream),
        downstream: flatten(downstream),
    })
}

fn flatten(map: BTreeMap<String, BTreeSet<String>>) -> BTreeMap<String, Vec<String>> {
    map.into_iter()
        .map(|(k, v)| (k, v.into_iter().collect()))
        .collect()
}

/// Depth-first search with a recursion stack; returns the first cycle found
fn find_cycle(downstream: &BTreeMap<String, BTreeSet<String>>) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    let mut on_path = HashSet::new();

    for node in downstream.keys() {
        if !visited.contains(node.as_str()) {
            if let Some(cycle) = visit(node, downstream, &mut visited, &mut path, &mut on_path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit<'a>(
    node: &'a str,
    downstream: &'a BTreeMap<String, BTreeSet<String>>,
    visited: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
    on_path: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    path.push(node);
    on_path.insert(node);

    if let Some(neighbors) = downstream.get(node) {
        for neighbor in neighbors {
            let neighbor = neighbor.as_str();
            if on_path.contains(neighbor) {
                let start = path.iter().position(|n| *n == neighbor).unwrap_or(0);
                return Some(path[start..].iter().map(|s| s.to_string()).collect());
            }
            if !visited.contains(neighbor) {
                if let Some(cycle) = visit(neighbor, downstream, visited, path, on_path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    on_path.remove(node);
    None
}

/// Kahn's algorithm, always releasing the smallest ready id first
fn topological_order(
    upstream: &BTreeMap<String, BTreeSet<String>>,
    downstream: &BTreeMap<String, BTreeSet<String>>,
) -> Vec<String> {
    let mut remaining: BTreeMap<&str, usize> = upstream
        .iter()
        .map(|(id, deps)| (id.as_str(), deps.len()))
        .collect();
    let mut ready: BTreeSet<&str> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(upstream.len());
    while let Some(next) = ready.pop_first() {
        order.push(next.to_string());
        if let Some(dependents) = downstream.get(next) {
            for dependent in dependents {
                if let Some(count) = remaining.get_mut(dependent.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }
    }
    order
}
