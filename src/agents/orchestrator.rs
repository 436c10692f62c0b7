//! Orchestrator agent: central coordinator and state manager
//!
//! Builds the work graph from a plan, registers the requested agents,
//! installs the context-preservation callback, and drives execution through
//! the parallel executor. Preservation writes a checkpoint memory holding a
//! snapshot of the active agents, the work graph, and the utilization that
//! triggered it.

use crate::agents::{Agent, AgentRole};
use crate::coordinator::{AgentState, Coordinator};
use crate::error::Result;
use crate::graph::{GraphTask, WorkGraph};
use crate::monitor::ContextMonitor;
use crate::parallel::{ExecutionStats, ParallelExecutor};
use crate::ports::{MemoryPort, MemoryRecord};
use crate::types::{Namespace, WorkItem, WorkPlan, WorkResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Orchestration phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorPhase {
    Idle,
    Planning,
    Executing,
    Monitoring,
    Preserving,
    Completed,
}

/// Configuration for the Orchestrator agent.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub agent_id: String,

    /// Maximum simultaneously registered workflow agents (default 4)
    pub max_parallel_agents: usize,

    /// Utilization at which checkpoints are written (default 0.75)
    pub preservation_threshold: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent_id: "orchestrator".to_string(),
            max_parallel_agents: 4,
            preservation_threshold: 0.75,
        }
    }
}

/// Result of one coordinated workflow.
#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub executed_tasks: usize,
    pub checkpoints: u64,
    pub stats: Option<ExecutionStats>,
}

/// Central coordinator for multi-agent workflows.
pub struct OrchestratorAgent {
    config: OrchestratorConfig,
    coordinator: Coordinator,
    memory: Arc<dyn MemoryPort>,
    monitor: ContextMonitor,
    executor: Arc<ParallelExecutor>,
    phase: RwLock<OrchestratorPhase>,

    /// agent_id -> role for agents active in the current workflow
    active_agents: Arc<RwLock<HashMap<String, String>>>,

    /// task_id -> dependencies snapshot for checkpoints
    work_graph_snapshot: Arc<RwLock<HashMap<String, Vec<String>>>>,
    checkpoint_count: Arc<AtomicU64>,
    session_active: AtomicBool,
}

impl OrchestratorAgent {
    pub async fn new(
        config: OrchestratorConfig,
        coordinator: Coordinator,
        memory: Arc<dyn MemoryPort>,
        monitor: ContextMonitor,
        executor: Arc<ParallelExecutor>,
    ) -> Arc<Self> {
        coordinator.register_agent(&config.agent_id).await;

        Arc::new(Self {
            config,
            coordinator,
            memory,
            monitor,
            executor,
            phase: RwLock::new(OrchestratorPhase::Idle),
            active_agents: Arc::new(RwLock::new(HashMap::new())),
            work_graph_snapshot: Arc::new(RwLock::new(HashMap::new())),
            checkpoint_count: Arc::new(AtomicU64::new(0)),
            session_active: AtomicBool::new(false),
        })
    }

    /// Coordinate a multi-agent workflow end to end.
    pub async fn coordinate_workflow(&self, plan: &WorkPlan) -> Result<OrchestrationOutcome> {
        self.set_phase(OrchestratorPhase::Planning).await;
        self.coordinator
            .update_agent_state(&self.config.agent_id, AgentState::Running)
            .await;

        // Build and validate the work graph before anything is spawned
        let graph = self.build_work_graph(plan)?;
        {
            let mut snapshot = self.work_graph_snapshot.write().await;
            snapshot.clear();
            for task in graph.tasks() {
                snapshot.insert(task.id.clone(), task.depends_on.clone());
            }
        }

        self.register_plan_agents(plan).await;

        self.set_phase(OrchestratorPhase::Executing).await;
        self.install_preservation_callback().await;
        self.set_phase(OrchestratorPhase::Monitoring).await;

        let (executed_tasks, stats) = if graph.is_empty() {
            (0, None)
        } else {
            let report = match self.executor.execute(graph).await {
                Ok(report) => report,
                Err(e) => {
                    self.coordinator
                        .update_agent_state(&self.config.agent_id, AgentState::Failed)
                        .await;
                    self.set_phase(OrchestratorPhase::Idle).await;
                    return Err(e);
                }
            };
            (report.stats.successful, Some(report.stats))
        };

        self.cleanup().await;
        self.set_phase(OrchestratorPhase::Completed).await;
        self.coordinator
            .update_agent_state(&self.config.agent_id, AgentState::Complete)
            .await;

        Ok(OrchestrationOutcome {
            executed_tasks,
            checkpoints: self.checkpoint_count.load(Ordering::SeqCst),
            stats,
        })
    }

    /// Build the dependency graph from the plan's task list.
    fn build_work_graph(&self, plan: &WorkPlan) -> Result<WorkGraph> {
        let mut graph = WorkGraph::new();
        for task in &plan.tasks {
            graph.add(
                GraphTask::new(task.id.clone(), task.description.clone())
                    .depends_on(task.depends_on.iter().cloned()),
            );
        }
        graph.validate()?;
        Ok(graph)
    }

    /// Register the agents the plan requests with the coordinator.
    ///
    /// `max_parallel_agents` is advisory at registration time: agents past
    /// the limit are still registered, with a warning per excess agent.
    /// Actual in-flight concurrency is bounded by the parallel executor's
    /// `max_concurrent`.
    async fn register_plan_agents(&self, plan: &WorkPlan) {
        let mut active = self.active_agents.write().await;
        for agent in &plan.agents {
            if active.len() >= self.config.max_parallel_agents {
                warn!(
                    "[Orchestrator] Max parallel agents ({}) reached while registering '{}'",
                    self.config.max_parallel_agents, agent.id
                );
            }
            self.coordinator.register_agent(&agent.id).await;
            active.insert(agent.id.clone(), agent.role.clone());
        }
    }

    /// Install the monitor callback that checkpoints state when utilization
    /// crosses the preservation threshold.
    async fn install_preservation_callback(&self) {
        let memory = self.memory.clone();
        let coordinator = self.coordinator.clone();
        let active_agents = self.active_agents.clone();
        let work_graph = self.work_graph_snapshot.clone();
        let checkpoint_count = self.checkpoint_count.clone();
        let threshold = self.config.preservation_threshold;

        self.monitor
            .set_preservation_callback(Arc::new(move |metrics| {
                let memory = memory.clone();
                let coordinator = coordinator.clone();
                let active_agents = active_agents.clone();
                let work_graph = work_graph.clone();
                let checkpoint_count = checkpoint_count.clone();

                Box::pin(async move {
                    if metrics.utilization < threshold {
                        return;
                    }

                    let agents = active_agents.read().await.clone();
                    let graph = work_graph.read().await.clone();
                    let count = checkpoint_count.fetch_add(1, Ordering::SeqCst);

                    let snapshot = json!({
                        "utilization": metrics.utilization,
                        "timestamp": metrics.timestamp.to_rfc3339(),
                        "agents": agents,
                        "work_graph": graph,
                    });

                    let record = MemoryRecord::new(
                        format!(
                            "Context snapshot at {:.1}% utilization: {}",
                            metrics.utilization * 100.0,
                            snapshot
                        ),
                        Namespace::ProjectAgent {
                            agent_id: "orchestration".to_string(),
                        },
                        10,
                    )
                    .with_summary(format!("Checkpoint {}", count))
                    .with_tags(vec![
                        "checkpoint".to_string(),
                        "context-preservation".to_string(),
                    ]);

                    match memory.store(record).await {
                        Ok(id) => {
                            info!(
                                "[Orchestrator] Preserved checkpoint {} at {:.1}% -> {}",
                                count,
                                metrics.utilization * 100.0,
                                id
                            );
                            coordinator
                                .set_metric("checkpoint_count", (count + 1) as f64)
                                .await;
                        }
                        Err(e) => warn!("[Orchestrator] Checkpoint store failed: {}", e),
                    }
                })
            }))
            .await;
    }

    /// Mark all workflow agents complete and clear the active map.
    async fn cleanup(&self) {
        let mut active = self.active_agents.write().await;
        for agent_id in active.keys() {
            self.coordinator
                .update_agent_state(agent_id, AgentState::Complete)
                .await;
        }
        active.clear();
    }

    pub async fn current_phase(&self) -> OrchestratorPhase {
        *self.phase.read().await
    }

    pub fn checkpoint_count(&self) -> u64 {
        self.checkpoint_count.load(Ordering::SeqCst)
    }

    pub async fn active_agent_count(&self) -> usize {
        self.active_agents.read().await.len()
    }

    async fn set_phase(&self, phase: OrchestratorPhase) {
        *self.phase.write().await = phase;
    }
}

#[async_trait]
impl Agent for OrchestratorAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Orchestrator
    }

    async fn start_session(&self) -> Result<()> {
        self.session_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_session(&self) -> Result<()> {
        self.session_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, item: &WorkItem) -> WorkResult {
        let plan = WorkPlan::from_work_item(item);

        match self.coordinate_workflow(&plan).await {
            Ok(outcome) => WorkResult::success_with(
                json!({
                    "status": "success",
                    "executed": outcome.executed_tasks,
                    "checkpoints": outcome.checkpoints,
                })
                .to_string(),
            ),
            Err(e) => WorkResult::failure(format!("Orchestration failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ContextMonitorConfig;
    use crate::parallel::ParallelExecutorConfig;
    use crate::ports::InMemoryStore;
    use crate::types::{PlanAgent, PlanTask, WorkPhase};

    struct Fixture {
        orchestrator: Arc<OrchestratorAgent>,
        coordinator: Coordinator,
        monitor: ContextMonitor,
        store: Arc<InMemoryStore>,
    }

    async fn fixture() -> Fixture {
        let coordinator = Coordinator::new();
        let store = Arc::new(InMemoryStore::new());
        let monitor = ContextMonitor::new(coordinator.clone(), ContextMonitorConfig::default());
        let executor = Arc::new(ParallelExecutor::new(
            coordinator.clone(),
            ParallelExecutorConfig::default(),
        ));

        let orchestrator = OrchestratorAgent::new(
            OrchestratorConfig::default(),
            coordinator.clone(),
            store.clone(),
            monitor.clone(),
            executor,
        )
        .await;

        Fixture {
            orchestrator,
            coordinator,
            monitor,
            store,
        }
    }

    fn plan_with_tasks() -> WorkPlan {
        let mut plan = WorkPlan::new(
            "wp-1",
            "Coordinate building the login endpoint across agents",
            WorkPhase::Planning,
        );
        plan.tasks = vec![
            PlanTask {
                id: "a".to_string(),
                description: "first".to_string(),
                depends_on: vec![],
            },
            PlanTask {
                id: "b".to_string(),
                description: "second".to_string(),
                depends_on: vec!["a".to_string()],
            },
        ];
        plan.agents = vec![PlanAgent {
            id: "worker-1".to_string(),
            role: "executor".to_string(),
        }];
        plan
    }

    #[tokio::test]
    async fn test_workflow_completes_and_clears_agents() {
        let f = fixture().await;
        let outcome = f
            .orchestrator
            .coordinate_workflow(&plan_with_tasks())
            .await
            .unwrap();

        assert_eq!(outcome.executed_tasks, 2);
        assert_eq!(f.orchestrator.active_agent_count().await, 0);
        assert_eq!(
            f.orchestrator.current_phase().await,
            OrchestratorPhase::Completed
        );
        assert_eq!(
            f.coordinator.get_agent_state("worker-1").await,
            Some(AgentState::Complete)
        );
    }

    #[tokio::test]
    async fn test_cyclic_plan_rejected_before_execution() {
        let f = fixture().await;

        let mut plan = plan_with_tasks();
        plan.tasks = vec![
            PlanTask {
                id: "x".to_string(),
                description: "x".to_string(),
                depends_on: vec!["y".to_string()],
            },
            PlanTask {
                id: "y".to_string(),
                description: "y".to_string(),
                depends_on: vec!["x".to_string()],
            },
        ];

        let err = f.orchestrator.coordinate_workflow(&plan).await.unwrap_err();
        assert!(err.to_string().contains("circular"));
        // Coordinator saw no exec_ agents
        let states = f.coordinator.get_all_agent_states().await;
        assert!(states.keys().all(|id| !id.starts_with("exec_")));
    }

    #[tokio::test]
    async fn test_preservation_callback_checkpoints() {
        let f = fixture().await;

        // Install the callback by running a (task-free) workflow
        let mut plan = plan_with_tasks();
        plan.tasks.clear();
        f.orchestrator.coordinate_workflow(&plan).await.unwrap();

        // Drive utilization into the preservation band and poll
        f.coordinator.update_context_utilization(0.80).await;
        f.monitor.poll_once().await;

        assert_eq!(f.orchestrator.checkpoint_count(), 1);
        let checkpoints = f
            .store
            .query(
                Namespace::ProjectAgent {
                    agent_id: "orchestration".to_string(),
                },
                vec!["checkpoint".to_string()],
                10,
            )
            .await
            .unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].record.importance, 10);
        assert_eq!(
            f.coordinator.get_metric("checkpoint_count").await,
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_empty_plan_executes_nothing() {
        let f = fixture().await;
        let mut plan = plan_with_tasks();
        plan.tasks.clear();
        plan.agents.clear();

        let outcome = f.orchestrator.coordinate_workflow(&plan).await.unwrap();
        assert_eq!(outcome.executed_tasks, 0);
        assert!(outcome.stats.is_none());
    }

    #[tokio::test]
    async fn test_agents_past_parallel_limit_still_register() {
        // The registration limit is advisory; requesting more agents than
        // max_parallel_agents registers them all (the scheduler's
        // max_concurrent bounds actual parallelism)
        let f = fixture().await;
        assert_eq!(f.orchestrator.config.max_parallel_agents, 4);

        let mut plan = plan_with_tasks();
        plan.tasks.clear();
        plan.agents = (0..6)
            .map(|i| PlanAgent {
                id: format!("worker-{}", i),
                role: "executor".to_string(),
            })
            .collect();

        f.orchestrator.register_plan_agents(&plan).await;
        assert_eq!(f.orchestrator.active_agent_count().await, 6);
        for i in 0..6 {
            assert_eq!(
                f.coordinator
                    .get_agent_state(&format!("worker-{}", i))
                    .await,
                Some(AgentState::Registered)
            );
        }

        // Cleanup releases every registered agent
        f.orchestrator.cleanup().await;
        assert_eq!(f.orchestrator.active_agent_count().await, 0);
        assert_eq!(
            f.coordinator.get_agent_state("worker-5").await,
            Some(AgentState::Complete)
        );
    }
}
