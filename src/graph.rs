//! The task graph and its resolver.
//!
//! A [`Task`] is a named unit of build work. Tasks are organized into a
//! Directed Acyclic Graph (DAG) where each edge points from a dependency to
//! the task that needs it. The graph is built once, validated, and never
//! mutated afterwards.
//!
//! ## Edges
//!
//! * **deps**: hard dependencies. Requesting a task pulls every dependency
//!   into the Build Run and runs it first.
//! * **after**: order-only constraints. If both tasks end up in the same
//!   Build Run, the task waits for them. They are never pulled in on their
//!   own, which lets `clean` precede everything inside `build` while a
//!   standalone `styles` run leaves the output tree alone.
//!
//! ## Resolution
//!
//! [`TaskGraph::resolve`] computes the dependency closure of the requested
//! task and layers it into *ready sets* (Kahn's algorithm). Every task of a
//! ready set may run concurrently once all previous ready sets are done.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::core::Environment;
use crate::error::{GraphError, TaskError};

/// Function executed by a task. Receives the shared environment, returns
/// completion or failure.
pub type TaskFn = Arc<dyn Fn(&Environment) -> Result<(), TaskError> + Send + Sync>;

/// A named unit of work with declared dependencies.
#[derive(Clone)]
pub struct Task {
    id: String,
    deps: Vec<String>,
    after: Vec<String>,
    group: Option<String>,
    func: Option<TaskFn>,
}

impl Task {
    /// Creates an aggregate task: no work of its own, just dependencies.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            deps: Vec::new(),
            after: Vec::new(),
            group: None,
            func: None,
        }
    }

    pub fn deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn after<I, S>(mut self, after: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after.extend(after.into_iter().map(Into::into));
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn run_with<F>(mut self, func: F) -> Self
    where
        F: Fn(&Environment) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        self.func = Some(Arc::new(func));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dependencies(&self) -> &[String] {
        &self.deps
    }

    pub fn ordered_after(&self) -> &[String] {
        &self.after
    }

    pub fn group_tag(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// True for tasks that only group other tasks.
    pub fn is_aggregate(&self) -> bool {
        self.func.is_none()
    }

    pub(crate) fn run(&self, env: &Environment) -> Result<(), TaskError> {
        match &self.func {
            Some(func) => func(env),
            None => Ok(()),
        }
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("deps", &self.deps)
            .field("after", &self.after)
            .field("group", &self.group)
            .field("func", &self.func.as_ref().map(|_| "*"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Requires,
    After,
}

/// Immutable, validated mapping from task identifier to [`Task`].
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<Task, Edge>,
    index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    /// Builds the graph, rejecting duplicate identifiers, references to
    /// unknown tasks, and cycles (through either kind of edge).
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for task in tasks {
            if index.contains_key(task.id()) {
                return Err(GraphError::DuplicateTask(task.id));
            }
            let id = task.id.clone();
            index.insert(id, graph.add_node(task));
        }

        let mut edges = Vec::new();
        for node in graph.node_indices() {
            let task = &graph[node];
            let kinds = task
                .deps
                .iter()
                .map(|dep| (dep, Edge::Requires))
                .chain(task.after.iter().map(|dep| (dep, Edge::After)));

            for (dep, kind) in kinds {
                let Some(&source) = index.get(dep) else {
                    return Err(GraphError::UnknownDependency {
                        task: task.id.clone(),
                        missing: dep.clone(),
                    });
                };
                edges.push((source, node, kind));
            }
        }

        for (source, target, kind) in edges {
            graph.add_edge(source, target, kind);
        }

        if let Some(cycle) = find_cycle(&graph) {
            return Err(GraphError::Cycle(cycle));
        }

        Ok(Self { graph, index })
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&node| &self.graph[node])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Task identifiers in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.graph.node_indices().map(|node| self.graph[node].id())
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Computes the execution plan for a single requested task.
    pub fn resolve(&self, requested: &str) -> Result<ExecutionPlan, GraphError> {
        self.resolve_many([requested])
    }

    /// Computes one execution plan covering the union of the dependency
    /// closures of all requested tasks.
    pub fn resolve_many<'a>(
        &self,
        requested: impl IntoIterator<Item = &'a str>,
    ) -> Result<ExecutionPlan, GraphError> {
        let mut stack = Vec::new();
        for id in requested {
            match self.index.get(id) {
                Some(&node) => stack.push(node),
                None => return Err(GraphError::UnknownTask(id.to_string())),
            }
        }

        // Dependency closure, following only hard edges backwards.
        let mut closure = HashSet::new();
        while let Some(node) = stack.pop() {
            if !closure.insert(node) {
                continue;
            }
            for edge in self.graph.edges_directed(node, Direction::Incoming) {
                if *edge.weight() == Edge::Requires {
                    stack.push(edge.source());
                }
            }
        }

        // Both edge kinds constrain ordering inside the closure.
        let mut degree: HashMap<NodeIndex, usize> = closure
            .iter()
            .map(|&node| {
                let count = self
                    .graph
                    .edges_directed(node, Direction::Incoming)
                    .filter(|edge| closure.contains(&edge.source()))
                    .count();
                (node, count)
            })
            .collect();

        let mut ready: Vec<NodeIndex> = closure
            .iter()
            .copied()
            .filter(|node| degree[node] == 0)
            .collect();

        let mut steps = Vec::new();
        let mut placed = 0;

        while !ready.is_empty() {
            ready.sort_by(|&a, &b| {
                let (a, b) = (&self.graph[a], &self.graph[b]);
                (a.group_tag(), a.id()).cmp(&(b.group_tag(), b.id()))
            });

            let mut next = Vec::new();
            for &node in &ready {
                for edge in self.graph.edges_directed(node, Direction::Outgoing) {
                    let target = edge.target();
                    if let Some(count) = degree.get_mut(&target) {
                        *count -= 1;
                        if *count == 0 {
                            next.push(target);
                        }
                    }
                }
            }

            placed += ready.len();
            steps.push(ReadySet(
                ready.iter().map(|&node| self.graph[node].clone()).collect(),
            ));
            ready = next;
        }

        if placed < closure.len() {
            let mut stuck: Vec<String> = degree
                .into_iter()
                .filter(|&(_, count)| count > 0)
                .map(|(node, _)| self.graph[node].id.clone())
                .collect();
            stuck.sort();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(ExecutionPlan { steps })
    }
}

/// Returns the sorted identifiers of the first strongly connected component
/// that forms a cycle, if any.
fn find_cycle(graph: &DiGraph<Task, Edge>) -> Option<Vec<String>> {
    let mut cycles: Vec<Vec<String>> = petgraph::algo::tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut ids: Vec<String> = scc.into_iter().map(|node| graph[node].id.clone()).collect();
            ids.sort();
            ids
        })
        .collect();

    cycles.sort();
    cycles.into_iter().next()
}

impl Display for TaskGraph {
    /// Renders the graph as a Mermaid diagram. Order-only edges are dotted.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;

        for node in self.graph.node_indices() {
            let task = &self.graph[node];
            let name = task.id().replace('"', "\\\"");
            match task.group_tag() {
                Some(group) => writeln!(f, "    {}[\"{}\\n({})\"]", node.index(), name, group)?,
                None => writeln!(f, "    {}[\"{}\"]", node.index(), name)?,
            }
        }

        for edge in self.graph.edge_references() {
            let arrow = match edge.weight() {
                Edge::Requires => "-->",
                Edge::After => "-.->",
            };
            writeln!(
                f,
                "    {} {} {}",
                edge.source().index(),
                arrow,
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

/// Tasks eligible to run concurrently at one step of a plan.
#[derive(Debug, Clone)]
pub struct ReadySet(Vec<Task>);

impl ReadySet {
    pub fn tasks(&self) -> &[Task] {
        &self.0
    }

    pub fn ids(&self) -> Vec<&str> {
        self.0.iter().map(Task::id).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ordered sequence of ready sets produced by the resolver.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    steps: Vec<ReadySet>,
}

impl ExecutionPlan {
    pub fn ready_sets(&self) -> &[ReadySet] {
        &self.steps
    }

    /// Identifiers of every ready set, in order.
    pub fn ids(&self) -> Vec<Vec<&str>> {
        self.steps.iter().map(ReadySet::ids).collect()
    }

    /// Flattened execution order.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().flat_map(|set| set.0.iter().map(Task::id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.order().any(|other| other == id)
    }

    /// Number of tasks in the plan.
    pub fn len(&self) -> usize {
        self.steps.iter().map(ReadySet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Display for ExecutionPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, set) in self.steps.iter().enumerate() {
            writeln!(f, "[{}] {}", i + 1, set.ids().join(", "))?;
        }
        Ok(())
    }
}
