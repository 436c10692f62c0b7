//! Work graph: dependency-tracked tasks for parallel execution
//!
//! Tasks are keyed by id with adjacency stored separately, so the modeled
//! graph can contain cycles (which validation rejects) without any runtime
//! pointer cycles. The graph is owned by the
//! [`ParallelExecutor`](crate::parallel::ParallelExecutor) for the duration
//! of a single execute call.

use crate::error::{OrchestrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Task execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    /// Whether the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Boxed async closure executed for one task.
pub type TaskExecutor =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<String>> + Send>> + Send + Sync>;

/// An atomic unit of work that a sub-agent can execute independently.
#[derive(Clone)]
pub struct GraphTask {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub depends_on: Vec<String>,

    /// Absent executors complete immediately with a neutral result
    pub executor: Option<TaskExecutor>,

    pub result: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<Instant>,
    pub ended_at: Option<Instant>,

    /// Coordinator agent id assigned at spawn time
    pub agent_id: Option<String>,
}

impl GraphTask {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            depends_on: Vec::new(),
            executor: None,
            result: None,
            error: None,
            started_at: None,
            ended_at: None,
            agent_id: None,
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_executor(mut self, executor: TaskExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Task duration once both timestamps are set.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Whether all dependencies are in the completed set.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.depends_on.iter().all(|dep| completed.contains(dep))
    }
}

impl std::fmt::Debug for GraphTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphTask")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("depends_on", &self.depends_on)
            .field("has_executor", &self.executor.is_some())
            .field("error", &self.error)
            .finish()
    }
}

/// A DAG of work tasks with explicit dependencies.
#[derive(Debug, Clone, Default)]
pub struct WorkGraph {
    tasks: HashMap<String, GraphTask>,
}

impl WorkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, replacing any existing task with the same id.
    pub fn add(&mut self, task: GraphTask) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<&GraphTask> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut GraphTask> {
        self.tasks.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &GraphTask> {
        self.tasks.values()
    }

    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut GraphTask> {
        self.tasks.values_mut()
    }

    /// Task ids in deterministic (sorted) order.
    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Validate the graph before execution.
    ///
    /// Rejects dependencies on unknown task ids, then runs DFS with a
    /// recursion-stack set and rejects on any back-edge.
    pub fn validate(&self) -> Result<()> {
        for task in self.tasks.values() {
            for dep in &task.depends_on {
                if !self.tasks.contains_key(dep) {
                    return Err(OrchestrationError::Validation(format!(
                        "Task '{}' depends on unknown task '{}'",
                        task.id, dep
                    )));
                }
            }
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut rec_stack: HashSet<&str> = HashSet::new();

        for start in self.tasks.keys() {
            if !visited.contains(start.as_str()) {
                self.dfs_cycle(start, &mut visited, &mut rec_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> Result<()> {
        visited.insert(node);
        rec_stack.insert(node);

        if let Some(task) = self.tasks.get(node) {
            for dep in &task.depends_on {
                let dep = dep.as_str();
                if rec_stack.contains(dep) {
                    return Err(OrchestrationError::Validation(format!(
                        "Work graph contains a circular dependency through '{}'",
                        dep
                    )));
                }
                if !visited.contains(dep) {
                    self.dfs_cycle(dep, visited, rec_stack)?;
                }
            }
        }

        rec_stack.remove(node);
        Ok(())
    }

    /// Ids of completed tasks.
    pub fn completed(&self) -> HashSet<String> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Pending tasks whose dependencies are all completed, excluding any in
    /// the running set, in deterministic id order.
    pub fn ready_tasks(&self, running: &HashSet<String>) -> Vec<String> {
        let completed = self.completed();
        let mut ready: Vec<String> = self
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && !running.contains(&t.id)
                    && t.is_ready(&completed)
            })
            .map(|t| t.id.clone())
            .collect();
        ready.sort();
        ready
    }

    /// Ids of tasks that are not yet terminal.
    pub fn non_terminal(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Whether every task has reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_graph(edges: &[(&str, &[&str])]) -> WorkGraph {
        let mut graph = WorkGraph::new();
        for (id, deps) in edges {
            graph.add(GraphTask::new(*id, format!("task {}", id)).depends_on(deps.iter().copied()));
        }
        graph
    }

    #[test]
    fn test_acyclic_graph_validates() {
        let graph = noop_graph(&[
            ("a", &[]),
            ("b", &[]),
            ("c", &["a", "b"]),
            ("d", &["c"]),
        ]);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_cycle_rejected() {
        let graph = noop_graph(&[("x", &["z"]), ("y", &["x"]), ("z", &["y"])]);
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));
    }

    #[test]
    fn test_self_cycle_rejected() {
        let graph = noop_graph(&[("a", &["a"])]);
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let graph = noop_graph(&[("a", &["ghost"])]);
        let err = graph.validate().unwrap_err();
        assert!(err.to_string().contains("unknown task"));
    }

    #[test]
    fn test_ready_tasks_respect_dependencies() {
        let mut graph = noop_graph(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);

        let running = HashSet::new();
        assert_eq!(graph.ready_tasks(&running), vec!["a"]);

        graph.get_mut("a").unwrap().status = TaskStatus::Completed;
        assert_eq!(graph.ready_tasks(&running), vec!["b"]);

        graph.get_mut("b").unwrap().status = TaskStatus::Completed;
        assert_eq!(graph.ready_tasks(&running), vec!["c"]);
    }

    #[test]
    fn test_ready_excludes_running() {
        let graph = noop_graph(&[("a", &[]), ("b", &[])]);
        let mut running = HashSet::new();
        running.insert("a".to_string());
        assert_eq!(graph.ready_tasks(&running), vec!["b"]);
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let graph = noop_graph(&[
            ("root", &[]),
            ("left", &["root"]),
            ("right", &["root"]),
            ("join", &["left", "right"]),
        ]);
        assert!(graph.validate().is_ok());
    }
}
