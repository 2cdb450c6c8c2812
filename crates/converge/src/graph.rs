//! Dependency extraction and the task graph
//!
//! Edges point from a dependent to its dependency: `(sg, vpc)` means the
//! security group task must wait for the VPC task.

use crate::error::ConfigurationError;
use crate::task::{TaskSet, task_addr};
use std::collections::{BTreeSet, HashMap, btree_set};

/// A "must complete before" relation between two tasks
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub dependent: String,
    pub dependency: String,
}

impl Edge {
    pub fn new(dependent: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self {
            dependent: dependent.into(),
            dependency: dependency.into(),
        }
    }
}

/// Discover the edges between members of `tasks`.
///
/// A reference counts only when it points at the very object held by the
/// collection; a reference to an equal-looking task outside the collection
/// is not an edge. Repeated references collapse into one edge.
pub fn extract_edges<C: 'static>(
    tasks: &TaskSet<C>,
) -> Result<Vec<Edge>, ConfigurationError> {
    let members: HashMap<usize, &str> = tasks.iter().map(|t| (task_addr(t), t.name())).collect();

    let mut edges = BTreeSet::new();
    for task in tasks.iter() {
        let own = task_addr(task);
        for dependency in task.dependencies() {
            let addr = dependency.addr();
            if addr == own {
                return Err(ConfigurationError::SelfReference {
                    task: task.name().to_string(),
                });
            }
            match members.get(&addr) {
                Some(name) => {
                    edges.insert(Edge::new(task.name(), *name));
                }
                None => log::trace!(
                    "{}: reference to {} is outside the task set",
                    task.name(),
                    dependency.name()
                ),
            }
        }
    }
    Ok(edges.into_iter().collect())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Acyclic graph of task names
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    dependencies: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
}

impl TaskGraph {
    /// Build the graph for a task collection
    pub fn build<C: 'static>(tasks: &TaskSet<C>) -> Result<Self, ConfigurationError> {
        let edges = extract_edges(tasks)?;
        Self::from_edges(tasks.names().map(str::to_string), edges)
    }

    /// Build a graph from explicit nodes and edges, rejecting cycles
    pub fn from_edges(
        nodes: impl IntoIterator<Item = String>,
        edges: impl IntoIterator<Item = Edge>,
    ) -> Result<Self, ConfigurationError> {
        let mut graph = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
        };
        for node in nodes {
            if graph.index.contains_key(&node) {
                return Err(ConfigurationError::DuplicateTask(node));
            }
            graph.index.insert(node.clone(), graph.nodes.len());
            graph.nodes.push(node);
            graph.dependencies.push(BTreeSet::new());
            graph.dependents.push(BTreeSet::new());
        }
        for edge in edges {
            let from = graph.position(&edge.dependent)?;
            let to = graph.position(&edge.dependency)?;
            graph.dependencies[from].insert(to);
            graph.dependents[to].insert(from);
        }
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn position(&self, name: &str) -> Result<usize, ConfigurationError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ConfigurationError::UnknownTask(name.to_string()))
    }

    /// Depth-first search with per-node marks; a back-edge to an
    /// in-progress node is a cycle. Iterative, so long chains do not
    /// grow the call stack.
    fn check_acyclic(&self) -> Result<(), ConfigurationError> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        // Current DFS path, each node with the iterator over what is left
        // of its dependencies
        let mut path: Vec<(usize, btree_set::Iter<'_, usize>)> = Vec::new();

        for start in 0..self.nodes.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            marks[start] = Mark::InProgress;
            path.push((start, self.dependencies[start].iter()));

            while let Some((node, remaining)) = path.last_mut() {
                let node = *node;
                match remaining.next().copied() {
                    None => {
                        marks[node] = Mark::Done;
                        path.pop();
                    }
                    Some(next) => match marks[next] {
                        Mark::Done => {}
                        Mark::InProgress => return Err(self.cycle_error(&path, next)),
                        Mark::Unvisited => {
                            marks[next] = Mark::InProgress;
                            path.push((next, self.dependencies[next].iter()));
                        }
                    },
                }
            }
        }
        Ok(())
    }

    /// The cycle closed by a back-edge to `next`, which is on `path`
    fn cycle_error<I>(&self, path: &[(usize, I)], next: usize) -> ConfigurationError {
        let mut cycle: Vec<String> = path
            .iter()
            .map(|(n, _)| *n)
            .skip_while(|&n| n != next)
            .map(|n| self.nodes[n].clone())
            .collect();
        cycle.push(self.nodes[next].clone());
        ConfigurationError::Cycle { path: cycle }
    }

    /// Node names in insertion order
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Direct dependencies of `name`
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.neighbours(name, &self.dependencies)
    }

    /// Direct dependents of `name`
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.neighbours(name, &self.dependents)
    }

    fn neighbours<'g>(&'g self, name: &str, adjacency: &'g [BTreeSet<usize>]) -> Vec<&'g str> {
        match self.index.get(name) {
            Some(&i) => adjacency[i].iter().map(|&n| self.nodes[n].as_str()).collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn dependency_count(&self, node: usize) -> usize {
        self.dependencies[node].len()
    }

    pub(crate) fn dependent_indices(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.dependents[node].iter().copied()
    }

    /// All edges, ordered by dependent then dependency index
    pub fn edges(&self) -> Vec<Edge> {
        self.dependencies
            .iter()
            .enumerate()
            .flat_map(|(from, deps)| {
                deps.iter()
                    .map(move |&to| Edge::new(&self.nodes[from], &self.nodes[to]))
            })
            .collect()
    }

    /// Topological layers: every task's dependencies lie in strictly
    /// earlier layers, so the tasks of one layer may run in parallel.
    pub fn layers(&self) -> Vec<Vec<String>> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut current: Vec<usize> = (0..self.nodes.len())
            .filter(|&n| remaining[n] == 0)
            .collect();
        let mut layers = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for &node in &current {
                for &dependent in &self.dependents[node] {
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            layers.push(current.iter().map(|&n| self.nodes[n].clone()).collect());
            current = next;
        }
        layers
    }

    /// The same graph with every edge flipped, for deletion passes
    pub fn reversed(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            index: self.index.clone(),
            dependencies: self.dependents.clone(),
            dependents: self.dependencies.clone(),
        }
    }
}
