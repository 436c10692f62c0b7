//! The four role-agents of the work plan protocol
//!
//! - **Orchestrator**: builds the work graph and drives phases 1–4
//! - **Optimizer**: skill discovery and context-budget allocation
//! - **Reviewer**: eight-gate quality review with improvement guidance
//! - **Executor**: primary work agent running the LLM tool-use loop
//!
//! All agents share one capability set (`start_session`, `stop_session`,
//! `execute`) expressed as the [`Agent`] trait; the engine routes work by
//! [`AgentRole`] tagged dispatch.

pub mod error_context;
pub mod executor;
pub mod metrics;
pub mod optimizer;
pub mod orchestrator;
pub mod reviewer;
pub mod validation;

pub use error_context::ErrorContext;
pub use executor::{ExecutionOutcome, ExecutionStatus, ExecutorAgent, ExecutorConfig, ExecutorPhase};
pub use metrics::{AgentMetricsSummary, MetricsCollector, WorkItemMetrics};
pub use optimizer::{OptimizedContext, OptimizerAgent, OptimizerConfig};
pub use orchestrator::{OrchestratorAgent, OrchestratorConfig, OrchestratorPhase};
pub use reviewer::{
    QualityGate, ReviewArtifact, ReviewResult, ReviewerAgent, ReviewerConfig, TestResults,
};
pub use validation::{validate_work_item, validate_work_plan, ValidationReport};

use crate::error::Result;
use crate::types::{WorkItem, WorkResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Agent role within the orchestration system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Central coordinator and state manager
    Orchestrator,

    /// Context optimization specialist
    Optimizer,

    /// Quality assurance and validation
    Reviewer,

    /// Primary work agent with sub-agent spawning
    Executor,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::Optimizer => "optimizer",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Executor => "executor",
        }
    }

    pub fn parse(s: &str) -> Option<AgentRole> {
        match s.to_ascii_lowercase().as_str() {
            "orchestrator" => Some(AgentRole::Orchestrator),
            "optimizer" => Some(AgentRole::Optimizer),
            "reviewer" => Some(AgentRole::Reviewer),
            "executor" => Some(AgentRole::Executor),
            _ => None,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared capability set of all four role-agents.
///
/// Agents borrow the work item for the duration of the call; results carry
/// everything the caller needs. `stop_session` is idempotent.
#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> AgentRole;

    /// Validate prerequisites (e.g. an LLM credential) and activate the
    /// session.
    async fn start_session(&self) -> Result<()>;

    /// Deactivate the session; a no-op when not active.
    async fn stop_session(&self) -> Result<()>;

    /// Execute one work item and report the outcome.
    async fn execute(&self, item: &WorkItem) -> WorkResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        for role in [
            AgentRole::Orchestrator,
            AgentRole::Optimizer,
            AgentRole::Reviewer,
            AgentRole::Executor,
        ] {
            assert_eq!(AgentRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(AgentRole::parse("Executor"), Some(AgentRole::Executor));
        assert_eq!(AgentRole::parse("unknown"), None);
    }
}
