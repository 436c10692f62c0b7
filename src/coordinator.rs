//! Shared coordination state for the multi-agent system
//!
//! The [`Coordinator`] is the single process-wide registry visible to every
//! component. It tracks:
//! - Agent states and progress
//! - Context utilization (a single gauge in [0, 1])
//! - Task readiness edge triggers
//! - Named scalar metrics
//!
//! It is constructed at engine composition and passed by handle; it is not a
//! hidden singleton. Thread-safe via `Arc<RwLock<T>>`; every method is total
//! and per-key updates are atomic.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Agent execution state as tracked by the coordinator.
///
/// Observations are monotone per agent: agents advance through `Running`
/// before reaching `Complete` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Known to the coordinator, no work yet
    Registered,

    /// Actively executing work
    Running,

    /// Finished successfully
    Complete,

    /// Finished with an error
    Failed,

    /// Waiting on something that has not resolved
    Blocked,

    /// Operating with reduced capability (e.g. circuit open)
    Degraded,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Registered => "registered",
            AgentState::Running => "running",
            AgentState::Complete => "complete",
            AgentState::Failed => "failed",
            AgentState::Blocked => "blocked",
            AgentState::Degraded => "degraded",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared coordination state for multi-agent orchestration.
///
/// Cloning produces another handle onto the same shared state.
#[derive(Clone)]
pub struct Coordinator {
    /// Agent states (agent_id -> state)
    agent_states: Arc<RwLock<HashMap<String, AgentState>>>,

    /// Context utilization (0.0 - 1.0)
    context_utilization: Arc<RwLock<f64>>,

    /// Task readiness (task_id -> ready)
    task_ready: Arc<RwLock<HashMap<String, bool>>>,

    /// Shared metrics
    metrics: Arc<RwLock<HashMap<String, f64>>>,
}

impl Coordinator {
    /// Create a new coordinator with empty state.
    pub fn new() -> Self {
        Self {
            agent_states: Arc::new(RwLock::new(HashMap::new())),
            context_utilization: Arc::new(RwLock::new(0.0)),
            task_ready: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register an agent. Idempotent: re-registering an existing agent does
    /// not reset its state.
    pub async fn register_agent(&self, agent_id: &str) {
        let mut states = self.agent_states.write().await;
        states
            .entry(agent_id.to_string())
            .or_insert(AgentState::Registered);
    }

    /// Update an agent's state. Unknown agents are auto-registered.
    pub async fn update_agent_state(&self, agent_id: &str, state: AgentState) {
        let mut states = self.agent_states.write().await;
        states.insert(agent_id.to_string(), state);
    }

    /// Get a single agent's state.
    pub async fn get_agent_state(&self, agent_id: &str) -> Option<AgentState> {
        let states = self.agent_states.read().await;
        states.get(agent_id).copied()
    }

    /// Snapshot of all agent states.
    pub async fn get_all_agent_states(&self) -> HashMap<String, AgentState> {
        let states = self.agent_states.read().await;
        states.clone()
    }

    /// Number of agents currently in the given state.
    pub async fn count_agents_in_state(&self, state: AgentState) -> usize {
        let states = self.agent_states.read().await;
        states.values().filter(|s| **s == state).count()
    }

    /// Update the context utilization gauge. Values are clamped to [0, 1].
    pub async fn update_context_utilization(&self, utilization: f64) {
        let clamped = utilization.clamp(0.0, 1.0);
        let mut util = self.context_utilization.write().await;
        *util = clamped;
    }

    /// Read the context utilization gauge.
    pub async fn get_context_utilization(&self) -> f64 {
        *self.context_utilization.read().await
    }

    /// Check if utilization has reached the given threshold.
    pub async fn is_context_threshold_exceeded(&self, threshold: f64) -> bool {
        self.get_context_utilization().await >= threshold
    }

    /// Mark a task as ready (monotone edge trigger for observability).
    pub async fn mark_task_ready(&self, task_id: &str) {
        let mut ready = self.task_ready.write().await;
        ready.insert(task_id.to_string(), true);
    }

    /// Mark a task as blocked.
    pub async fn mark_task_blocked(&self, task_id: &str) {
        let mut ready = self.task_ready.write().await;
        ready.insert(task_id.to_string(), false);
    }

    /// Check if a task has been marked ready. Unknown tasks read as false.
    pub async fn is_task_ready(&self, task_id: &str) -> bool {
        let ready = self.task_ready.read().await;
        ready.get(task_id).copied().unwrap_or(false)
    }

    /// Set a named metric.
    pub async fn set_metric(&self, key: &str, value: f64) {
        let mut metrics = self.metrics.write().await;
        metrics.insert(key.to_string(), value);
    }

    /// Read a named metric.
    pub async fn get_metric(&self, key: &str) -> Option<f64> {
        let metrics = self.metrics.read().await;
        metrics.get(key).copied()
    }

    /// Snapshot of all metrics.
    pub async fn get_all_metrics(&self) -> HashMap<String, f64> {
        let metrics = self.metrics.read().await;
        metrics.clone()
    }

    /// Reset all coordinator state.
    pub async fn reset(&self) {
        self.agent_states.write().await.clear();
        *self.context_utilization.write().await = 0.0;
        self.task_ready.write().await.clear();
        self.metrics.write().await.clear();
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let coordinator = Coordinator::new();

        coordinator.register_agent("executor").await;
        coordinator
            .update_agent_state("executor", AgentState::Running)
            .await;

        // Re-registering must not reset the running state
        coordinator.register_agent("executor").await;
        assert_eq!(
            coordinator.get_agent_state("executor").await,
            Some(AgentState::Running)
        );
    }

    #[tokio::test]
    async fn test_update_auto_registers() {
        let coordinator = Coordinator::new();

        coordinator
            .update_agent_state("reviewer", AgentState::Running)
            .await;

        assert_eq!(
            coordinator.get_agent_state("reviewer").await,
            Some(AgentState::Running)
        );
        assert_eq!(coordinator.get_all_agent_states().await.len(), 1);
    }

    #[tokio::test]
    async fn test_utilization_clamped() {
        let coordinator = Coordinator::new();

        coordinator.update_context_utilization(1.5).await;
        assert_eq!(coordinator.get_context_utilization().await, 1.0);

        coordinator.update_context_utilization(-0.3).await;
        assert_eq!(coordinator.get_context_utilization().await, 0.0);

        coordinator.update_context_utilization(0.42).await;
        assert_eq!(coordinator.get_context_utilization().await, 0.42);
        assert!(coordinator.is_context_threshold_exceeded(0.40).await);
        assert!(!coordinator.is_context_threshold_exceeded(0.50).await);
    }

    #[tokio::test]
    async fn test_task_readiness() {
        let coordinator = Coordinator::new();

        assert!(!coordinator.is_task_ready("t1").await);
        coordinator.mark_task_ready("t1").await;
        assert!(coordinator.is_task_ready("t1").await);
        coordinator.mark_task_blocked("t1").await;
        assert!(!coordinator.is_task_ready("t1").await);
    }

    #[tokio::test]
    async fn test_metrics() {
        let coordinator = Coordinator::new();

        assert_eq!(coordinator.get_metric("skill_count").await, None);
        coordinator.set_metric("skill_count", 7.0).await;
        assert_eq!(coordinator.get_metric("skill_count").await, Some(7.0));

        coordinator.set_metric("file_count", 3.0).await;
        assert_eq!(coordinator.get_all_metrics().await.len(), 2);
    }

    #[tokio::test]
    async fn test_running_count() {
        let coordinator = Coordinator::new();

        coordinator.update_agent_state("a", AgentState::Running).await;
        coordinator.update_agent_state("b", AgentState::Running).await;
        coordinator.update_agent_state("c", AgentState::Complete).await;

        assert_eq!(coordinator.count_agents_in_state(AgentState::Running).await, 2);
    }

    #[tokio::test]
    async fn test_reset() {
        let coordinator = Coordinator::new();
        coordinator.register_agent("a").await;
        coordinator.update_context_utilization(0.8).await;
        coordinator.set_metric("m", 1.0).await;

        coordinator.reset().await;

        assert!(coordinator.get_all_agent_states().await.is_empty());
        assert_eq!(coordinator.get_context_utilization().await, 0.0);
        assert!(coordinator.get_all_metrics().await.is_empty());
    }
}
