//! Execution metrics for work items and agents
//!
//! Records per-work-item timing and outcome, and aggregates per-agent
//! success rate and duration statistics.

use crate::types::WorkPhase;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Metrics for a single work item execution.
#[derive(Debug, Clone)]
pub struct WorkItemMetrics {
    pub work_item_id: String,
    pub agent_id: String,
    pub phase: WorkPhase,
    pub started_at: Instant,
    pub duration_secs: Option<f64>,
    pub success: Option<bool>,

    /// Error kind when the item failed (e.g. "ValidationError")
    pub error_kind: Option<String>,
}

/// Aggregated metrics for one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetricsSummary {
    pub total_items: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub avg_duration_secs: f64,
    pub min_duration_secs: f64,
    pub max_duration_secs: f64,
}

/// Collector for work item metrics across agents.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    items: Arc<RwLock<HashMap<String, WorkItemMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a work item.
    pub async fn start_work_item(
        &self,
        work_item_id: &str,
        agent_id: &str,
        phase: WorkPhase,
    ) {
        let work_item_id = work_item_id.to_string();
        let metrics = WorkItemMetrics {
            work_item_id: work_item_id.clone(),
            agent_id: agent_id.to_string(),
            phase,
            started_at: Instant::now(),
            duration_secs: None,
            success: None,
            error_kind: None,
        };
        self.items.write().await.insert(work_item_id, metrics);
    }

    /// Finish tracking a work item, recording outcome and duration.
    pub async fn finish_work_item(
        &self,
        work_item_id: &str,
        success: bool,
        error_kind: Option<String>,
    ) {
        let mut items = self.items.write().await;
        if let Some(metrics) = items.get_mut(work_item_id) {
            metrics.duration_secs = Some(metrics.started_at.elapsed().as_secs_f64());
            metrics.success = Some(success);
            metrics.error_kind = error_kind;
        }
    }

    /// Metrics for a single work item.
    pub async fn work_item_metrics(&self, work_item_id: &str) -> Option<WorkItemMetrics> {
        self.items.read().await.get(work_item_id).cloned()
    }

    /// Aggregate finished-item metrics for one agent.
    pub async fn agent_summary(&self, agent_id: &str) -> AgentMetricsSummary {
        let items = self.items.read().await;
        let finished: Vec<&WorkItemMetrics> = items
            .values()
            .filter(|m| m.agent_id == agent_id && m.success.is_some())
            .collect();

        let total = finished.len();
        let successful = finished.iter().filter(|m| m.success == Some(true)).count();
        let durations: Vec<f64> = finished.iter().filter_map(|m| m.duration_secs).collect();

        AgentMetricsSummary {
            total_items: total,
            successful,
            failed: total - successful,
            success_rate: if total > 0 {
                successful as f64 / total as f64
            } else {
                0.0
            },
            avg_duration_secs: if durations.is_empty() {
                0.0
            } else {
                durations.iter().sum::<f64>() / durations.len() as f64
            },
            min_duration_secs: if durations.is_empty() {
                0.0
            } else {
                durations.iter().copied().fold(f64::INFINITY, f64::min)
            },
            max_duration_secs: durations.iter().copied().fold(0.0, f64::max),
        }
    }
}
