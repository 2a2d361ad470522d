//! Dependency graph over the tasks of a run
//!
//! Edges point from a dependency to its dependent, so a topological order
//! lists every task after everything it depends on.

use crate::error::{CloudError, Result};
use crate::task::{TaskKey, TaskSet};
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Walker};
use std::collections::HashMap;

#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<TaskKey, ()>,
    index: HashMap<TaskKey, NodeIndex>,
    order: Vec<TaskKey>,
}

impl DependencyGraph {
    /// Build the graph from each task's declared dependencies.
    pub fn build<C: ?Sized + Send + Sync + 'static>(tasks: &TaskSet<C>) -> Result<Self> {
        Self::from_declarations(
            tasks
                .iter()
                .map(|(key, task)| (key.clone(), task.dependencies().to_vec())),
        )
    }

    /// Build from `(task, dependencies)` pairs.
    ///
    /// Fails with [`CloudError::Conflict`] on a self dependency, a
    /// dependency on an unknown task, or a cycle.
    pub fn from_declarations(
        declarations: impl IntoIterator<Item = (TaskKey, Vec<TaskKey>)>,
    ) -> Result<Self> {
        let declarations: Vec<(TaskKey, Vec<TaskKey>)> = declarations.into_iter().collect();

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for (key, _) in &declarations {
            if index.contains_key(key) {
                return Err(CloudError::Conflict(format!("duplicate task {}", key)));
            }
            index.insert(key.clone(), graph.add_node(key.clone()));
        }

        for (key, deps) in &declarations {
            let dependent = index[key];
            for dep in deps {
                if dep == key {
                    return Err(CloudError::Conflict(format!("{} depends on itself", key)));
                }
                let dependency = *index.get(dep).ok_or_else(|| {
                    CloudError::Conflict(format!("{} depends on unknown task {}", key, dep))
                })?;
                graph.update_edge(dependency, dependent, ());
            }
        }

        let order = match toposort(&graph, None) {
            Ok(nodes) => nodes.into_iter().map(|n| graph[n].clone()).collect(),
            Err(cycle) => return Err(cycle_error(&graph, cycle.node_id())),
        };

        tracing::debug!(
            tasks = graph.node_count(),
            edges = graph.edge_count(),
            "Built dependency graph"
        );
        Ok(Self {
            graph,
            index,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Every task, each after all of its dependencies.
    pub fn topological_order(&self) -> &[TaskKey] {
        &self.order
    }

    /// Direct dependencies of a task, sorted.
    pub fn dependencies(&self, key: &TaskKey) -> Vec<TaskKey> {
        self.neighbors(key, Direction::Incoming)
    }

    /// Tasks that directly depend on `key`, sorted.
    pub fn dependents(&self, key: &TaskKey) -> Vec<TaskKey> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// Every task with a dependency path to `key`, sorted.
    pub fn transitive_dependents(&self, key: &TaskKey) -> Vec<TaskKey> {
        let Some(&start) = self.index.get(key) else {
            return Vec::new();
        };
        let mut found: Vec<TaskKey> = Dfs::new(&self.graph, start)
            .iter(&self.graph)
            .filter(|&n| n != start)
            .map(|n| self.graph[n].clone())
            .collect();
        found.sort();
        found
    }

    fn neighbors(&self, key: &TaskKey, direction: Direction) -> Vec<TaskKey> {
        let Some(&node) = self.index.get(key) else {
            return Vec::new();
        };
        let mut keys: Vec<TaskKey> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        keys.sort();
        keys
    }
}

fn cycle_error(graph: &DiGraph<TaskKey, ()>, node: NodeIndex) -> CloudError {
    let members = tarjan_scc(graph)
        .into_iter()
        .find(|component| component.contains(&node))
        .unwrap_or_else(|| vec![node]);
    let mut names: Vec<String> = members.iter().map(|n| graph[*n].to_string()).collect();
    names.sort();
    CloudError::Conflict(format!("dependency cycle between {}", names.join(", ")))
}
