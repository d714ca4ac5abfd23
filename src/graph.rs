//! Dependency graph over tasks: build-time validation and ready-set queries.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::debug;

use crate::error::GraphError;
use crate::model::{Task, TaskStatus};

/// Validated DAG of tasks. An edge `dep -> task` means `task` waits on
/// `dep`. Node insertion order (the order tasks were supplied in) is the
/// deterministic tiebreak wherever ordering matters.
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<Task, ()>,
    index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    /// Build and validate. Rejects duplicate ids, dependencies on unknown
    /// tasks, and cycles (reported with the member ids).
    pub fn build(tasks: Vec<Task>) -> Result<Self, GraphError> {
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut index = HashMap::with_capacity(tasks.len());

        for task in tasks {
            let id = task.id.clone();
            if index.contains_key(&id) {
                return Err(GraphError::DuplicateId(id));
            }
            let node = graph.add_node(task);
            index.insert(id, node);
        }

        // Duplicate dependency declarations collapse to a single edge.
        let nodes: Vec<NodeIndex> = graph.node_indices().collect();
        for node in nodes {
            let (task_id, deps) = {
                let task = &graph[node];
                (task.id.clone(), task.dependencies.clone())
            };
            let mut seen = HashSet::new();
            for dep in deps {
                if !seen.insert(dep.clone()) {
                    continue;
                }
                let dep_node =
                    *index
                        .get(&dep)
                        .ok_or_else(|| GraphError::UnknownDependency {
                            task: task_id.clone(),
                            dependency: dep.clone(),
                        })?;
                graph.add_edge(dep_node, node, ());
            }
        }

        let built = Self { graph, index };
        built.check_cycles()?;
        debug!(
            tasks = built.graph.node_count(),
            edges = built.graph.edge_count(),
            "task graph validated"
        );
        Ok(built)
    }

    // Any strongly connected component with more than one node is a cycle;
    // a single node only if it carries a self-edge.
    fn check_cycles(&self) -> Result<(), GraphError> {
        for component in tarjan_scc(&self.graph) {
            let is_cycle = component.len() > 1
                || self
                    .graph
                    .find_edge(component[0], component[0])
                    .is_some();
            if is_cycle {
                let mut members = component;
                members.sort();
                let cycle = members
                    .into_iter()
                    .map(|node| self.graph[node].id.clone())
                    .collect();
                return Err(GraphError::CycleDetected { cycle });
            }
        }
        Ok(())
    }

    /// Tasks eligible to start now: not yet started, every dependency in
    /// `satisfied`. Ordered by priority descending; the stable sort keeps
    /// supply order for ties. Callable at any point mid-run.
    pub fn ready_set(&self, satisfied: &HashSet<String>) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .graph
            .node_indices()
            .filter_map(|node| {
                let task = &self.graph[node];
                if !matches!(task.status, TaskStatus::Pending | TaskStatus::Ready) {
                    return None;
                }
                let deps_met = self
                    .graph
                    .neighbors_directed(node, Direction::Incoming)
                    .all(|dep| satisfied.contains(self.graph[dep].id.as_str()));
                deps_met.then_some(task)
            })
            .collect();
        ready.sort_by_key(|task| std::cmp::Reverse(task.priority));
        ready
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&node| &self.graph[node])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.index.get(id).map(|&node| self.graph[node].status)
    }

    /// Forward-only status mutation; unknown ids are ignored.
    pub fn set_status(&mut self, id: &str, next: TaskStatus) {
        if let Some(&node) = self.index.get(id) {
            let task = &mut self.graph[node];
            debug_assert!(
                task.status.can_transition(next),
                "illegal status transition {:?} -> {:?} for '{}'",
                task.status,
                next,
                id
            );
            debug!(task_id = %id, from = ?task.status, to = ?next, "status change");
            task.status = next;
        }
    }

    /// Tasks in supply order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_weights()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Direct dependency ids of `id`, supply order.
    pub fn direct_dependencies(&self, id: &str) -> Vec<String> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .collect();
        deps.sort();
        deps.into_iter()
            .map(|dep| self.graph[dep].id.clone())
            .collect()
    }

    /// Transitive dependencies of `id`, supply order.
    pub fn ancestors(&self, id: &str) -> Vec<String> {
        self.reachable(id, Direction::Incoming)
    }

    /// Everything downstream of `id`, supply order.
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        self.reachable(id, Direction::Outgoing)
    }

    fn reachable(&self, id: &str, direction: Direction) -> Vec<String> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for next in self.graph.neighbors_directed(node, direction) {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        let mut nodes: Vec<NodeIndex> = visited.into_iter().collect();
        nodes.sort();
        nodes
            .into_iter()
            .map(|node| self.graph[node].id.clone())
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.graph
            .node_weights()
            .all(|task| task.status.is_terminal())
    }

    pub fn non_terminal_ids(&self) -> Vec<String> {
        self.graph
            .node_weights()
            .filter(|task| !task.status.is_terminal())
            .map(|task| task.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(id, "agent", format!("task {id}"), format!("prompt {id}"))
            .with_dependencies(deps.iter().copied())
    }

    fn diamond() -> Vec<Task> {
        vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ]
    }

    #[test]
    fn empty_graph_is_valid() {
        let graph = TaskGraph::build(Vec::new()).unwrap();
        assert!(graph.is_empty());
        assert!(graph.all_terminal());
        assert!(graph.ready_set(&HashSet::new()).is_empty());
    }

    #[test]
    fn duplicate_id_rejected() {
        let err = TaskGraph::build(vec![task("a", &[]), task("a", &[])]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateId("a".into()));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let err = TaskGraph::build(vec![task("a", &["ghost"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                task: "a".into(),
                dependency: "ghost".into(),
            }
        );
    }

    #[test]
    fn self_dependency_is_a_one_cycle() {
        let err = TaskGraph::build(vec![task("a", &["a"])]).unwrap_err();
        assert_eq!(err, GraphError::CycleDetected { cycle: vec!["a".into()] });
    }

    #[test]
    fn two_node_cycle_reports_members() {
        let err = TaskGraph::build(vec![task("a", &["b"]), task("b", &["a"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                cycle: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn three_node_cycle_reports_members() {
        let err = TaskGraph::build(vec![
            task("a", &["c"]),
            task("b", &["a"]),
            task("c", &["b"]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                cycle: vec!["a".into(), "b".into(), "c".into()],
            }
        );
    }

    #[test]
    fn cycle_off_the_main_line_is_still_caught() {
        let err = TaskGraph::build(vec![
            task("root", &[]),
            task("x", &["root", "y"]),
            task("y", &["x"]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                cycle: vec!["x".into(), "y".into()],
            }
        );
    }

    #[test]
    fn duplicate_dependency_declarations_are_tolerated() {
        let graph = TaskGraph::build(vec![task("a", &[]), task("b", &["a", "a"])]).unwrap();
        assert_eq!(graph.direct_dependencies("b"), vec!["a"]);

        let satisfied: HashSet<String> = ["a".to_string()].into();
        let ready: Vec<&str> = graph
            .ready_set(&satisfied)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn diamond_ready_set_progression() {
        let mut graph = TaskGraph::build(diamond()).unwrap();
        let mut satisfied = HashSet::new();

        let ready: Vec<&str> = graph
            .ready_set(&satisfied)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ready, vec!["a"]);

        complete(&mut graph, "a");
        satisfied.insert("a".to_string());
        let ready: Vec<&str> = graph
            .ready_set(&satisfied)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ready, vec!["b", "c"]);

        complete(&mut graph, "b");
        satisfied.insert("b".to_string());
        let ready: Vec<&str> = graph
            .ready_set(&satisfied)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ready, vec!["c"], "d still waits on c");

        complete(&mut graph, "c");
        satisfied.insert("c".to_string());
        let ready: Vec<&str> = graph
            .ready_set(&satisfied)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ready, vec!["d"]);
    }

    fn complete(graph: &mut TaskGraph, id: &str) {
        graph.set_status(id, TaskStatus::Ready);
        graph.set_status(id, TaskStatus::Running);
        graph.set_status(id, TaskStatus::Completed);
    }

    #[test]
    fn ready_set_orders_by_priority_then_supply_order() {
        let tasks = vec![
            task("low", &[]).with_priority(1),
            task("high", &[]).with_priority(5),
            task("mid-first", &[]).with_priority(3),
            task("mid-second", &[]).with_priority(3),
        ];
        let graph = TaskGraph::build(tasks).unwrap();
        let ready: Vec<&str> = graph
            .ready_set(&HashSet::new())
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ready, vec!["high", "mid-first", "mid-second", "low"]);
    }

    #[test]
    fn ready_set_excludes_started_tasks() {
        let mut graph = TaskGraph::build(vec![task("a", &[]), task("b", &[])]).unwrap();
        graph.set_status("a", TaskStatus::Ready);
        graph.set_status("a", TaskStatus::Running);

        let ready: Vec<&str> = graph
            .ready_set(&HashSet::new())
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn diamond_traversals() {
        let graph = TaskGraph::build(diamond()).unwrap();
        assert_eq!(graph.transitive_dependents("a"), vec!["b", "c", "d"]);
        assert_eq!(graph.transitive_dependents("b"), vec!["d"]);
        assert_eq!(graph.ancestors("d"), vec!["a", "b", "c"]);
        assert_eq!(graph.ancestors("a"), Vec::<String>::new());
        assert_eq!(graph.direct_dependencies("d"), vec!["b", "c"]);
    }

    #[test]
    fn terminal_bookkeeping() {
        let mut graph = TaskGraph::build(vec![task("a", &[]), task("b", &["a"])]).unwrap();
        assert!(!graph.all_terminal());
        assert_eq!(graph.non_terminal_ids(), vec!["a", "b"]);

        complete(&mut graph, "a");
        assert_eq!(graph.non_terminal_ids(), vec!["b"]);

        graph.set_status("b", TaskStatus::Skipped);
        assert!(graph.all_terminal());
        assert!(graph.non_terminal_ids().is_empty());
    }

    #[test]
    fn unknown_ids_are_harmless() {
        let graph = TaskGraph::build(vec![task("a", &[])]).unwrap();
        assert_eq!(graph.status("ghost"), None);
        assert!(graph.get("ghost").is_none());
        assert!(graph.ancestors("ghost").is_empty());
        assert!(graph.transitive_dependents("ghost").is_empty());
    }
}
