//! Parallel executor: dependency-aware scheduling with bounded concurrency
//!
//! Drives a validated [`WorkGraph`] to completion:
//! - At most `max_concurrent` tasks in flight (default 4)
//! - Each spawned task runs under a `spawn_timeout` deadline (default 30 s)
//! - Deadlock detection when no task can run yet work remains
//! - Automatic rollback on failure: siblings are cancelled and awaited, and
//!   every coordinator agent tied to the graph is marked failed
//!
//! The executor owns the graph for the duration of one `execute` call and
//! returns it inside the report.

use crate::coordinator::{AgentState, Coordinator};
use crate::error::{OrchestrationError, Result};
use crate::graph::{TaskStatus, WorkGraph};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A spawned task resolves to its id and either the executor outcome or a
/// deadline overrun.
type TaskJoinSet = JoinSet<(String, std::result::Result<Result<String>, tokio::time::error::Elapsed>)>;

/// Utilization above which execution is refused: sub-agent context needs the
/// remaining headroom.
const SAFETY_UTILIZATION_LIMIT: f64 = 0.75;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct ParallelExecutorConfig {
    /// Maximum concurrent tasks (default 4)
    pub max_concurrent: usize,

    /// Per-task execution deadline (default 30 s)
    pub spawn_timeout: Duration,
}

impl Default for ParallelExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            spawn_timeout: Duration::from_secs(30),
        }
    }
}

/// Execution statistics for one graph run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_tasks: usize,
    pub successful: usize,
    pub failed: usize,
    pub completion_rate: f64,
    pub wall_time_secs: f64,
    pub avg_task_duration_secs: f64,
    pub min_task_duration_secs: f64,
    pub max_task_duration_secs: f64,

    /// Speedup over sequential divided by the concurrency bound, in [0, 1]
    pub parallel_efficiency: f64,
}

/// Result of a successful graph execution.
#[derive(Debug)]
pub struct ExecutionReport {
    pub graph: WorkGraph,
    pub stats: ExecutionStats,
}

/// Dependency-aware parallel scheduler.
pub struct ParallelExecutor {
    coordinator: Coordinator,
    config: ParallelExecutorConfig,
}

impl ParallelExecutor {
    pub fn new(coordinator: Coordinator, config: ParallelExecutorConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Execute a work graph to completion.
    ///
    /// Validates the graph, checks the context safety gate, then repeatedly
    /// spawns ready tasks up to the concurrency bound and waits for the
    /// first completion. Fails with [`OrchestrationError::Deadlock`] when no
    /// progress is possible and with [`OrchestrationError::ExecutionFailed`]
    /// (after rollback) when any task fails.
    pub async fn execute(&self, mut graph: WorkGraph) -> Result<ExecutionReport> {
        graph.validate()?;

        let utilization = self.coordinator.get_context_utilization().await;
        if utilization > SAFETY_UTILIZATION_LIMIT {
            return Err(OrchestrationError::State(format!(
                "Context utilization {:.0}% exceeds the {:.0}% safety limit for parallel execution",
                utilization * 100.0,
                SAFETY_UTILIZATION_LIMIT * 100.0
            )));
        }

        info!(
            "Executing work graph: {} tasks, max_concurrent={}",
            graph.len(),
            self.config.max_concurrent
        );

        let wall_start = Instant::now();
        let mut running: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut join_set: TaskJoinSet = JoinSet::new();

        while !graph.all_terminal() {
            // Spawn ready tasks into free slots, in deterministic order
            let ready = graph.ready_tasks(&running);
            let slots = self.config.max_concurrent.saturating_sub(running.len());
            for task_id in ready.iter().take(slots) {
                self.spawn_task(&mut graph, task_id, &mut join_set).await;
                running.insert(task_id.clone());
            }

            if running.is_empty() {
                // Nothing in flight and nothing became ready: stalled
                let blocked = graph.non_terminal();
                if blocked.is_empty() {
                    break;
                }
                for id in &blocked {
                    if let Some(task) = graph.get_mut(id) {
                        task.status = TaskStatus::Blocked;
                    }
                }
                self.rollback(&mut graph, &mut join_set).await;
                if failed.is_empty() {
                    warn!("Deadlock detected: {} tasks blocked", blocked.len());
                    return Err(OrchestrationError::Deadlock { blocked });
                }
                return Err(OrchestrationError::ExecutionFailed {
                    failed: failed.len(),
                });
            }

            // Wait for at least one spawned task to finish
            if let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((task_id, outcome)) => {
                        running.remove(&task_id);
                        self.record_outcome(&mut graph, &task_id, outcome, &mut failed)
                            .await;
                    }
                    Err(join_err) => {
                        // A panicked executor closure is a programmer error;
                        // abort the whole graph
                        self.rollback(&mut graph, &mut join_set).await;
                        return Err(OrchestrationError::Other(format!(
                            "Graph task panicked: {}",
                            join_err
                        )));
                    }
                }
            }
        }

        let wall_time = wall_start.elapsed();

        if !failed.is_empty() {
            self.rollback(&mut graph, &mut join_set).await;
            return Err(OrchestrationError::ExecutionFailed {
                failed: failed.len(),
            });
        }

        let stats = self.compute_stats(&graph, wall_time, failed.len());
        info!(
            "Graph execution complete: {}/{} tasks in {:.2}s (efficiency {:.0}%)",
            stats.successful,
            stats.total_tasks,
            stats.wall_time_secs,
            stats.parallel_efficiency * 100.0
        );

        Ok(ExecutionReport { graph, stats })
    }

    /// Spawn one task under the deadline, registering a fresh coordinator
    /// agent `exec_<taskid>_<ts>` for it.
    async fn spawn_task(
        &self,
        graph: &mut WorkGraph,
        task_id: &str,
        join_set: &mut TaskJoinSet,
    ) {
        let agent_id = format!("exec_{}_{}", task_id, Utc::now().timestamp_millis());

        self.coordinator.register_agent(&agent_id).await;
        self.coordinator
            .update_agent_state(&agent_id, AgentState::Running)
            .await;
        self.coordinator.mark_task_ready(task_id).await;

        let Some(task) = graph.get_mut(task_id) else {
            return;
        };
        task.status = TaskStatus::Running;
        task.started_at = Some(Instant::now());
        task.agent_id = Some(agent_id);

        debug!("Spawning task '{}'", task_id);

        let executor = task.executor.clone();
        let timeout = self.config.spawn_timeout;
        let id = task_id.to_string();

        join_set.spawn(async move {
            let work = async move {
                match executor {
                    Some(f) => f().await,
                    // Absent executors are no-ops with a neutral result
                    None => Ok("{\"status\":\"completed\"}".to_string()),
                }
            };
            let outcome = tokio::time::timeout(timeout, work).await;
            (id, outcome)
        });
    }

    /// Record one finished task's result, end time, and status.
    async fn record_outcome(
        &self,
        graph: &mut WorkGraph,
        task_id: &str,
        outcome: std::result::Result<Result<String>, tokio::time::error::Elapsed>,
        failed: &mut HashSet<String>,
    ) {
        let Some(task) = graph.get_mut(task_id) else {
            return;
        };
        task.ended_at = Some(Instant::now());
        let agent_id = task.agent_id.clone();

        let agent_state = match outcome {
            Ok(Ok(result)) => {
                task.status = TaskStatus::Completed;
                task.result = Some(result);
                AgentState::Complete
            }
            Ok(Err(e)) => {
                warn!("Task '{}' failed: {}", task_id, e);
                task.status = TaskStatus::Failed;
                task.error = Some(e.to_string());
                failed.insert(task_id.to_string());
                AgentState::Failed
            }
            Err(_elapsed) => {
                warn!(
                    "Task '{}' timed out after {:?}",
                    task_id, self.config.spawn_timeout
                );
                task.status = TaskStatus::Failed;
                task.error = Some(
                    OrchestrationError::Timeout(format!(
                        "Task timed out after {}s",
                        self.config.spawn_timeout.as_secs()
                    ))
                    .to_string(),
                );
                failed.insert(task_id.to_string());
                AgentState::Failed
            }
        };

        if let Some(agent_id) = agent_id {
            self.coordinator
                .update_agent_state(&agent_id, agent_state)
                .await;
        }
    }

    /// Roll back after failure or deadlock: cancel all in-flight tasks,
    /// await their cancellation without raising, and mark every coordinator
    /// agent tied to the graph as failed.
    async fn rollback(
        &self,
        graph: &mut WorkGraph,
        join_set: &mut TaskJoinSet,
    ) {
        warn!("Rolling back graph execution");

        // Aborts every remaining task and awaits them; cancellation errors
        // are swallowed
        join_set.shutdown().await;

        for task in graph.tasks_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Failed;
                task.ended_at = Some(Instant::now());
                task.error
                    .get_or_insert_with(|| "Cancelled by rollback".to_string());
            }
        }

        let agent_ids: Vec<String> = graph
            .tasks()
            .filter_map(|t| t.agent_id.clone())
            .collect();
        for agent_id in agent_ids {
            self.coordinator
                .update_agent_state(&agent_id, AgentState::Failed)
                .await;
        }
    }

    fn compute_stats(&self, graph: &WorkGraph, wall_time: Duration, failed: usize) -> ExecutionStats {
        let total = graph.len();
        let successful = graph
            .tasks()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();

        let durations: Vec<f64> = graph
            .tasks()
            .filter_map(|t| t.duration())
            .map(|d| d.as_secs_f64())
            .collect();

        let sequential_time: f64 = durations.iter().sum();
        let wall_secs = wall_time.as_secs_f64();

        let parallel_efficiency = if wall_secs > 0.0 && self.config.max_concurrent > 0 {
            (sequential_time / (wall_secs * self.config.max_concurrent as f64)).min(1.0)
        } else {
            0.0
        };

        ExecutionStats {
            total_tasks: total,
            successful,
            failed,
            completion_rate: if total > 0 {
                successful as f64 / total as f64
            } else {
                0.0
            },
            wall_time_secs: wall_secs,
            avg_task_duration_secs: if durations.is_empty() {
                0.0
            } else {
                sequential_time / durations.len() as f64
            },
            min_task_duration_secs: if durations.is_empty() {
                0.0
            } else {
                durations.iter().copied().fold(f64::INFINITY, f64::min)
            },
            max_task_duration_secs: durations.iter().copied().fold(0.0, f64::max),
            parallel_efficiency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphTask;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sleeping_task(id: &str, millis: u64) -> GraphTask {
        GraphTask::new(id, format!("sleep {}ms", millis)).with_executor(Arc::new(move || {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(format!("slept {}ms", millis))
            })
        }))
    }

    fn failing_task(id: &str) -> GraphTask {
        GraphTask::new(id, "fails").with_executor(Arc::new(|| {
            Box::pin(async { Err(OrchestrationError::Other("boom".to_string())) })
        }))
    }

    #[tokio::test]
    async fn test_empty_graph_completes() {
        let executor = ParallelExecutor::new(Coordinator::new(), ParallelExecutorConfig::default());
        let report = executor.execute(WorkGraph::new()).await.unwrap();
        assert_eq!(report.stats.total_tasks, 0);
    }

    #[tokio::test]
    async fn test_noop_tasks_complete_immediately() {
        let mut graph = WorkGraph::new();
        graph.add(GraphTask::new("a", "no executor"));
        graph.add(GraphTask::new("b", "no executor").depends_on(["a"]));

        let executor = ParallelExecutor::new(Coordinator::new(), ParallelExecutorConfig::default());
        let report = executor.execute(graph).await.unwrap();

        assert_eq!(report.stats.successful, 2);
        let task = report.graph.get("a").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.result.as_deref().unwrap().contains("completed"));
    }

    #[tokio::test]
    async fn test_safety_gate_rejects_high_utilization() {
        let coordinator = Coordinator::new();
        coordinator.update_context_utilization(0.80).await;

        let mut graph = WorkGraph::new();
        graph.add(GraphTask::new("a", "task"));

        let executor = ParallelExecutor::new(coordinator, ParallelExecutorConfig::default());
        let err = executor.execute(graph).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::State(_)));
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let active = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));

        let mut graph = WorkGraph::new();
        for i in 0..8 {
            let active = active.clone();
            let high_water = high_water.clone();
            graph.add(
                GraphTask::new(format!("t{}", i), "counts concurrency").with_executor(Arc::new(
                    move || {
                        let active = active.clone();
                        let high_water = high_water.clone();
                        Box::pin(async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            high_water.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok("done".to_string())
                        })
                    },
                )),
            );
        }

        let executor = ParallelExecutor::new(
            Coordinator::new(),
            ParallelExecutorConfig {
                max_concurrent: 3,
                spawn_timeout: Duration::from_secs(5),
            },
        );
        executor.execute(graph).await.unwrap();

        assert!(high_water.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_timeout_fails_task() {
        let mut graph = WorkGraph::new();
        graph.add(sleeping_task("slow", 500));

        let executor = ParallelExecutor::new(
            Coordinator::new(),
            ParallelExecutorConfig {
                max_concurrent: 4,
                spawn_timeout: Duration::from_millis(50),
            },
        );

        let err = executor.execute(graph).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::ExecutionFailed { failed: 1 }
        ));
    }

    #[tokio::test]
    async fn test_failure_triggers_rollback() {
        let coordinator = Coordinator::new();
        let mut graph = WorkGraph::new();
        graph.add(failing_task("bad"));
        graph.add(sleeping_task("good", 10));

        let executor = ParallelExecutor::new(coordinator.clone(), ParallelExecutorConfig::default());
        let err = executor.execute(graph).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::ExecutionFailed { .. }));

        // No graph agent may remain running after rollback
        let states = coordinator.get_all_agent_states().await;
        assert!(states
            .iter()
            .filter(|(id, _)| id.starts_with("exec_"))
            .all(|(_, state)| *state != AgentState::Running));
    }

    #[tokio::test]
    async fn test_failed_dependency_blocks_dependents() {
        let mut graph = WorkGraph::new();
        graph.add(failing_task("bad"));
        graph.add(sleeping_task("child", 10).depends_on(["bad"]));

        let executor = ParallelExecutor::new(Coordinator::new(), ParallelExecutorConfig::default());
        let err = executor.execute(graph).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::ExecutionFailed { failed: 1 }
        ));
    }
}
