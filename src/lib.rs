//! Mnemosyne Engine - Multi-Agent Orchestration
//!
//! A multi-agent orchestration engine that coordinates four cooperating
//! role-agents (Orchestrator, Optimizer, Reviewer, Executor) through the
//! four-phase work plan protocol against an external LLM service.
//!
//! # Architecture
//!
//! The engine is organized around five core subsystems:
//! - **Coordinator**: process-wide registry of agent states, metrics, and
//!   the context-utilization gauge
//! - **ContextMonitor**: ~10 ms polling loop driving preservation and
//!   emergency-compaction callbacks from the single gauge
//! - **WorkGraph + ParallelExecutor**: dependency-aware DAG execution with
//!   bounded concurrency, deadlock detection, and rollback
//! - **SkillIndex + budget allocation**: multi-root skill discovery with
//!   local-over-global precedence under a proportional token budget
//! - **Agents**: the work-item protocol (Executor -> Reviewer -> re-Executor
//!   on failure) with the circuit breaker guarding every LLM call
//!
//! External collaborators (the LLM, the memory store, the filesystem) are
//! pluggable ports; see [`ports`].
//!
//! # Example
//!
//! ```ignore
//! use mnemosyne_engine::{AgentConfigs, Engine, EngineConfig, EnginePorts};
//! use mnemosyne_engine::ports::{AnthropicClient, InMemoryStore, LocalFs};
//! use mnemosyne_engine::types::{WorkPhase, WorkPlan};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::new(
//!         EngineConfig::default(),
//!         AgentConfigs::default(),
//!         EnginePorts {
//!             llm: Arc::new(AnthropicClient::with_default()?),
//!             memory: Arc::new(InMemoryStore::new()),
//!             fs: Arc::new(LocalFs::new()),
//!         },
//!     )
//!     .await;
//!
//!     engine.start().await;
//!     let mut plan = WorkPlan::new("wp-1", "Build the thing...", WorkPhase::Implementation);
//!     plan.tech_stack = Some("Rust".into());
//!     plan.success_criteria = Some("Tests pass".into());
//!     let report = engine.execute_work_plan(&plan).await?;
//!     engine.stop().await;
//!
//!     println!("{:?}", report.status);
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod breaker;
pub mod budget;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod graph;
pub mod monitor;
pub mod parallel;
pub mod ports;
pub mod skills;
pub mod types;

// Re-export commonly used types
pub use agents::{
    Agent, AgentRole, ExecutorAgent, ExecutorConfig, OptimizerAgent, OptimizerConfig,
    OrchestratorAgent, OrchestratorConfig, QualityGate, ReviewArtifact, ReviewResult,
    ReviewerAgent, ReviewerConfig,
};
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use budget::{allocate, BudgetAllocation, BudgetFractions};
pub use config::EngineConfig;
pub use coordinator::{AgentState, Coordinator};
pub use engine::{AgentConfigs, Engine, EnginePorts, EngineReport, EngineStatus};
pub use error::{OrchestrationError, Result};
pub use graph::{GraphTask, TaskStatus, WorkGraph};
pub use monitor::{ContextMetrics, ContextMonitor, ContextMonitorConfig, ContextState};
pub use parallel::{ExecutionReport, ExecutionStats, ParallelExecutor, ParallelExecutorConfig};
pub use skills::{SkillIndex, SkillIndexConfig, SkillMatch};
pub use types::{MemoryId, Namespace, WorkItem, WorkPhase, WorkPlan, WorkResult};
