// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::errors::{PipedagError, Result};
use crate::pattern::OutputSpec;
use crate::task::{TaskName, TaskSpec};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct TaskNode {
    /// Tasks whose outputs this task consumes (explicit or inferred).
    data_deps: BTreeSet<TaskName>,
    /// Ordering-only prerequisites (`follows`).
    order_deps: BTreeSet<TaskName>,
    /// Direct dependents of either kind.
    dependents: BTreeSet<TaskName>,
}

/// Task-level dependency graph.
///
/// Edges come from `from`/`add_inputs`, from inference (an input pattern
/// that overlaps another task's output pattern) and from `follows`.
/// Construction fails with [`PipedagError::CycleDetected`] if the result is
/// not acyclic.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: BTreeMap<TaskName, TaskNode>,
    order: Vec<TaskName>,
}

impl TaskGraph {
    pub fn build(tasks: &BTreeMap<TaskName, Arc<TaskSpec>>) -> Result<Self> {
        let mut nodes: BTreeMap<TaskName, TaskNode> = tasks
            .keys()
            .map(|name| (name.clone(), TaskNode::default()))
            .collect();

        // First pass: explicit and inferred dependencies.
        for (name, spec) in tasks {
            let mut data = BTreeSet::new();
            data.extend(spec.explicit_data_deps().cloned());

            for (producer, pspec) in tasks {
                if producer == name {
                    continue;
                }
                if feeds(&pspec.output, spec) {
                    debug!(task = %name, producer = %producer, "inferred dependency from patterns");
                    data.insert(producer.clone());
                }
            }

            if let Some(node) = nodes.get_mut(name) {
                node.data_deps = data;
                node.order_deps = spec.follows.iter().cloned().collect();
            }
        }

        // Second pass: populate dependents based on deps.
        let edges: Vec<(TaskName, TaskName)> = nodes
            .iter()
            .flat_map(|(name, node)| {
                node.data_deps
                    .iter()
                    .chain(node.order_deps.iter())
                    .map(move |dep| (dep.clone(), name.clone()))
            })
            .collect();
        for (dep, name) in &edges {
            if let Some(dep_node) = nodes.get_mut(dep) {
                dep_node.dependents.insert(name.clone());
            }
        }

        let order = topological_order(&nodes, &edges)?;

        Ok(Self { nodes, order })
    }

    /// Task names in a dependency-respecting order.
    pub fn order(&self) -> &[TaskName] {
        &self.order
    }

    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Tasks whose outputs `name` consumes.
    pub fn data_deps_of(&self, name: &str) -> impl Iterator<Item = &TaskName> {
        self.nodes.get(name).into_iter().flat_map(|n| n.data_deps.iter())
    }

    /// `follows` prerequisites of `name`.
    pub fn order_deps_of(&self, name: &str) -> impl Iterator<Item = &TaskName> {
        self.nodes.get(name).into_iter().flat_map(|n| n.order_deps.iter())
    }

    /// All direct dependencies (data and ordering).
    pub fn dependencies_of(&self, name: &str) -> BTreeSet<&TaskName> {
        self.data_deps_of(name).chain(self.order_deps_of(name)).collect()
    }

    pub fn dependents_of(&self, name: &str) -> impl Iterator<Item = &TaskName> {
        self.nodes.get(name).into_iter().flat_map(|n| n.dependents.iter())
    }

    /// Tasks nothing depends on.
    pub fn sinks(&self) -> Vec<TaskName> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.dependents.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// `targets` plus everything they transitively depend on.
    pub fn upstream_closure<S: AsRef<str>>(&self, targets: &[S]) -> BTreeSet<TaskName> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<TaskName> = targets.iter().map(|t| t.as_ref().to_string()).collect();

        while let Some(name) = stack.pop() {
            if !self.nodes.contains_key(&name) || !closure.insert(name.clone()) {
                continue;
            }
            stack.extend(self.dependencies_of(&name).into_iter().cloned());
        }

        closure
    }
}

/// Whether `output` could produce a file that `consumer` selects.
fn feeds(output: &OutputSpec, consumer: &TaskSpec) -> bool {
    let produced = output.shape();
    consumer
        .inputs
        .iter()
        .any(|sel| sel.shape().overlaps(&produced))
}

fn topological_order(
    nodes: &BTreeMap<TaskName, TaskNode>,
    edges: &[(TaskName, TaskName)],
) -> Result<Vec<TaskName>> {
    // Edge direction: dep -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in nodes.keys() {
        graph.add_node(name.as_str());
    }
    for (dep, name) in edges {
        graph.add_edge(dep.as_str(), name.as_str(), ());
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(_) => {
            let mut involved: Vec<String> = tarjan_scc(&graph)
                .into_iter()
                .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
                .flatten()
                .map(str::to_string)
                .collect();
            involved.sort();
            Err(PipedagError::CycleDetected(involved))
        }
    }
}
