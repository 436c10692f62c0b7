//! Orchestration engine: composition root
//!
//! Wires the coordinator, context monitor, parallel executor, and the four
//! role-agents, then drives work plans end to end:
//! Optimizer (skills + budget) -> Executor (tool-use loop) -> Reviewer
//! (quality gates) -> on failure, a bounded review-retry loop with
//! consolidated guidance -> Orchestrator (finalization and checkpoints).

use crate::agents::{
    Agent, AgentRole, ExecutorAgent, ExecutorConfig, OptimizerAgent, OptimizerConfig,
    OrchestratorAgent, OrchestratorConfig, ReviewArtifact, ReviewerAgent, ReviewerConfig,
};
use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::monitor::{ContextMonitor, ContextMonitorConfig};
use crate::parallel::{ParallelExecutor, ParallelExecutorConfig};
use crate::ports::{FsPort, LlmPort, MemoryPort};
use crate::types::{WorkItem, WorkPlan};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// External ports the engine is composed over.
pub struct EnginePorts {
    pub llm: Arc<dyn LlmPort>,
    pub memory: Arc<dyn MemoryPort>,
    pub fs: Arc<dyn FsPort>,
}

/// Per-agent configuration bundle.
#[derive(Debug, Clone, Default)]
pub struct AgentConfigs {
    pub executor: ExecutorConfig,
    pub reviewer: ReviewerConfig,
    pub optimizer: OptimizerConfig,
    pub orchestrator: OrchestratorConfig,
}

/// How a work plan run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// Executed and review passed
    Success,

    /// The circuit breaker rejected the work; re-queue after `retry_after`
    CircuitOpen,

    /// The executor challenged vague requirements
    Challenged,

    /// Execution failed outright
    Failed,

    /// Review kept failing within the retry budget
    ReviewFailed,
}

/// Result of driving one work plan through the engine.
#[derive(Debug, Clone)]
pub struct EngineReport {
    pub status: EngineStatus,

    /// Number of executor+review attempts consumed
    pub review_attempt_count: u32,
    pub retry_after_secs: Option<f64>,
    pub response_text: Option<String>,
    pub issues: Vec<String>,
    pub questions: Vec<String>,
    pub checkpoints: u64,
    pub error: Option<String>,
}

/// The orchestration engine.
pub struct Engine {
    config: EngineConfig,
    coordinator: Coordinator,
    monitor: ContextMonitor,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
    optimizer: Arc<OptimizerAgent>,
    executor: Arc<ExecutorAgent>,
    reviewer: Arc<ReviewerAgent>,
    orchestrator: Arc<OrchestratorAgent>,
}

impl Engine {
    /// Compose a new engine over the given ports.
    pub async fn new(config: EngineConfig, agents: AgentConfigs, ports: EnginePorts) -> Arc<Self> {
        let coordinator = Coordinator::new();

        let monitor = ContextMonitor::new(
            coordinator.clone(),
            ContextMonitorConfig {
                polling_interval: config.polling_interval,
                preservation_threshold: config.preservation_threshold,
                critical_threshold: config.critical_threshold,
            },
        );

        let parallel = Arc::new(ParallelExecutor::new(
            coordinator.clone(),
            ParallelExecutorConfig {
                max_concurrent: config.max_concurrent,
                spawn_timeout: config.spawn_timeout,
            },
        ));

        let optimizer = OptimizerAgent::new(
            agents.optimizer,
            coordinator.clone(),
            ports.memory.clone(),
        )
        .await;

        let executor = ExecutorAgent::new(
            agents.executor,
            coordinator.clone(),
            ports.llm.clone(),
            ports.memory.clone(),
            ports.fs.clone(),
        )
        .await;

        let reviewer = ReviewerAgent::new(
            agents.reviewer,
            coordinator.clone(),
            ports.llm.clone(),
            ports.memory.clone(),
        )
        .await;

        let orchestrator = OrchestratorAgent::new(
            agents.orchestrator,
            coordinator.clone(),
            ports.memory.clone(),
            monitor.clone(),
            parallel,
        )
        .await;

        Arc::new(Self {
            config,
            coordinator,
            monitor,
            monitor_handle: Mutex::new(None),
            optimizer,
            executor,
            reviewer,
            orchestrator,
        })
    }

    /// Start the engine: spawns the context monitoring loop.
    pub async fn start(&self) {
        let mut handle = self.monitor_handle.lock().await;
        if handle.is_none() {
            *handle = Some(self.monitor.start());
            info!(
                "Orchestration engine started ({}ms monitoring, max {} concurrent)",
                self.config.polling_interval.as_millis(),
                self.config.max_concurrent
            );
        }
    }

    /// Stop the engine: cancels the monitor loop and drains it.
    pub async fn stop(&self) {
        self.monitor.stop();
        if let Some(handle) = self.monitor_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Monitor task ended abnormally: {}", e);
            }
        }
        info!("Orchestration engine stopped");
    }

    /// Route to a role-agent by tag.
    pub fn agent(&self, role: AgentRole) -> Arc<dyn Agent> {
        match role {
            AgentRole::Orchestrator => self.orchestrator.clone(),
            AgentRole::Optimizer => self.optimizer.clone(),
            AgentRole::Reviewer => self.reviewer.clone(),
            AgentRole::Executor => self.executor.clone(),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn monitor(&self) -> &ContextMonitor {
        &self.monitor
    }

    /// Execute a work plan through the full agent pipeline.
    pub async fn execute_work_plan(&self, plan: &WorkPlan) -> Result<EngineReport> {
        info!("=== Starting multi-agent orchestration for '{}' ===", plan.id);

        // Step 1: Optimizer discovers relevant skills and allocates budget
        let available = self.monitor.available_budget().await as usize;
        let context = self
            .optimizer
            .optimize_context(&plan.description, available)
            .await?;
        info!(
            "[Engine] Optimizer loaded {} skills, {} token budget",
            context.skills.len(),
            context.total_budget
        );

        let mut item = WorkItem {
            id: plan.id.clone(),
            description: plan.description.clone(),
            phase: plan.phase,
            priority: plan.priority,
            consolidated_context_id: plan.consolidated_context_id,
            review_feedback: plan.review_feedback.clone(),
            review_attempt: plan.review_attempt,
        };

        // Steps 2-3: execute then review, retrying with consolidated
        // guidance while the retry budget lasts
        loop {
            let attempt = item.review_attempt + 1;
            info!("[Engine] Execution attempt {} for '{}'", attempt, item.id);

            let result = self.executor.execute(&item).await;

            if result.is_circuit_open() {
                info!("[Engine] Circuit open; returning work for re-queue");
                return Ok(EngineReport {
                    status: EngineStatus::CircuitOpen,
                    review_attempt_count: attempt,
                    retry_after_secs: result.retry_after(),
                    response_text: None,
                    issues: Vec::new(),
                    questions: Vec::new(),
                    checkpoints: self.orchestrator.checkpoint_count(),
                    error: None,
                });
            }

            if !result.success {
                let payload = result
                    .data
                    .as_deref()
                    .and_then(|d| serde_json::from_str::<serde_json::Value>(d).ok());
                let challenged = payload
                    .as_ref()
                    .and_then(|v| v.get("status").and_then(|s| s.as_str()))
                    .map(|s| s == "challenged")
                    .unwrap_or(false);

                if challenged {
                    let questions = payload
                        .as_ref()
                        .and_then(|v| v.get("questions").cloned())
                        .and_then(|q| serde_json::from_value::<Vec<String>>(q).ok())
                        .unwrap_or_default();
                    return Ok(EngineReport {
                        status: EngineStatus::Challenged,
                        review_attempt_count: attempt,
                        retry_after_secs: None,
                        response_text: None,
                        issues: Vec::new(),
                        questions,
                        checkpoints: self.orchestrator.checkpoint_count(),
                        error: result.error,
                    });
                }

                return Ok(EngineReport {
                    status: EngineStatus::Failed,
                    review_attempt_count: attempt,
                    retry_after_secs: None,
                    response_text: None,
                    issues: Vec::new(),
                    questions: Vec::new(),
                    checkpoints: self.orchestrator.checkpoint_count(),
                    error: result.error,
                });
            }

            let response_text = result
                .data
                .as_deref()
                .and_then(|d| serde_json::from_str::<serde_json::Value>(d).ok())
                .and_then(|v| {
                    v.get("response_text")
                        .and_then(|t| t.as_str())
                        .map(String::from)
                })
                .unwrap_or_default();

            // Step 3: Reviewer validates the artifact
            let artifact = ReviewArtifact {
                id: item.id.clone(),
                description: item.description.clone(),
                phase: Some(item.phase),
                content: response_text.clone(),
                test_results: None,
                execution_memory_ids: result.memory_ids.clone(),
                review_attempt: item.review_attempt,
            };

            let review = self.reviewer.review(&artifact).await?;

            if review.passed {
                info!(
                    "[Engine] Review passed (confidence {:.0}%) after {} attempt(s)",
                    review.confidence * 100.0,
                    attempt
                );

                // Step 4: Orchestrator coordinates completion
                let orchestration = self.orchestrator.coordinate_workflow(plan).await?;

                return Ok(EngineReport {
                    status: EngineStatus::Success,
                    review_attempt_count: attempt,
                    retry_after_secs: None,
                    response_text: Some(response_text),
                    issues: Vec::new(),
                    questions: Vec::new(),
                    checkpoints: orchestration.checkpoints,
                    error: None,
                });
            }

            warn!(
                "[Engine] Review failed attempt {}: {} issue(s)",
                attempt,
                review.issues.len()
            );

            if attempt >= self.config.max_review_attempts {
                return Ok(EngineReport {
                    status: EngineStatus::ReviewFailed,
                    review_attempt_count: attempt,
                    retry_after_secs: None,
                    response_text: Some(response_text),
                    issues: review.issues,
                    questions: Vec::new(),
                    checkpoints: self.orchestrator.checkpoint_count(),
                    error: Some("Review failed within the retry budget".to_string()),
                });
            }

            // Consolidate guidance into a retry context and re-queue locally
            let failed_gates: Vec<String> = review
                .failed_gates()
                .iter()
                .map(|g| g.to_string())
                .collect();
            let guidance = self
                .reviewer
                .generate_improvement_guidance(
                    &failed_gates,
                    &review.issues,
                    &item.description,
                    &[],
                )
                .await?;

            let consolidated_id = self
                .optimizer
                .consolidate_review_context(&item, &guidance)
                .await?;

            item.review_feedback.extend(review.issues);
            item.review_feedback.push(guidance);
            item.review_attempt += 1;
            item.consolidated_context_id = Some(consolidated_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::llm::MockLlmPort;
    use crate::ports::{
        ChatResponse, ContentBlock, InMemoryStore, LocalFs, StopReason, TokenUsage,
    };
    use crate::types::WorkPhase;

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            content: vec![ContentBlock::text(text)],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }
    }

    async fn engine_with_llm(llm: MockLlmPort) -> Arc<Engine> {
        let mut agents = AgentConfigs::default();
        agents.executor.api_key = Some("sk-ant-test-key".to_string());
        agents.reviewer.api_key = Some("sk-ant-test-key".to_string());

        Engine::new(
            EngineConfig::default(),
            agents,
            EnginePorts {
                llm: Arc::new(llm),
                memory: Arc::new(InMemoryStore::new()),
                fs: Arc::new(LocalFs::new()),
            },
        )
        .await
    }

    fn clear_plan() -> WorkPlan {
        let mut plan = WorkPlan::new(
            "wp-engine",
            "Build a REST login endpoint using axum because we need session auth; \
             must include only the password flow and all error cases",
            WorkPhase::Implementation,
        );
        plan.tech_stack = Some("Rust".to_string());
        plan.success_criteria = Some("Tests pass".to_string());
        plan
    }

    fn all_pass_review() -> String {
        crate::agents::QualityGate::all()
            .iter()
            .map(|g| format!("{}: PASS", g.as_str().replace('_', " ")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn test_engine_lifecycle() {
        let engine = engine_with_llm(MockLlmPort::new()).await;
        engine.start().await;
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_tagged_dispatch_routes_roles() {
        let engine = engine_with_llm(MockLlmPort::new()).await;
        for role in [
            AgentRole::Orchestrator,
            AgentRole::Optimizer,
            AgentRole::Reviewer,
            AgentRole::Executor,
        ] {
            assert_eq!(engine.agent(role).role(), role);
        }
    }

    #[tokio::test]
    async fn test_single_pass_success() {
        let mut llm = MockLlmPort::new();
        let review = all_pass_review();
        llm.expect_chat().returning(move |system, _, _| {
            let is_review = system
                .as_deref()
                .map(|s| s.contains("Reviewer Agent"))
                .unwrap_or(false);
            if is_review {
                Ok(text_response(&review))
            } else {
                Ok(text_response("Implemented the endpoint with full error handling."))
            }
        });

        let engine = engine_with_llm(llm).await;
        let report = engine.execute_work_plan(&clear_plan()).await.unwrap();

        assert_eq!(report.status, EngineStatus::Success);
        assert_eq!(report.review_attempt_count, 1);
    }
}
