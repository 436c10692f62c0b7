//! Core data types shared across the orchestration engine
//!
//! - **WorkItem / WorkResult**: the unit of work handed to an agent and what
//!   comes back, including review history carried across retries
//! - **WorkPlan**: the executor/orchestrator input (prompt, criteria, tasks)
//! - **WorkPhase**: lifecycle phase tags for work items
//! - **Namespace / MemoryId**: addressing for the external memory store

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque handle to a memory stored through the [`MemoryPort`](crate::ports::MemoryPort).
///
/// The store owns the data; the engine only passes handles around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryId(Uuid);

impl MemoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MemoryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Memory store scope, rendered colon-delimited on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    /// Scoped to a single session: `session:<id>`
    Session { id: String },

    /// Scoped to a project: `project:<slug>`
    Project { slug: String },

    /// Scoped to one agent within a project: `project:agent-<id>`
    ProjectAgent { agent_id: String },

    /// Shared across everything: `global`
    Global,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Session { id } => write!(f, "session:{}", id),
            Namespace::Project { slug } => write!(f, "project:{}", slug),
            Namespace::ProjectAgent { agent_id } => write!(f, "project:agent-{}", agent_id),
            Namespace::Global => write!(f, "global"),
        }
    }
}

/// Work item lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkPhase {
    Planning,
    Implementation,
    Review,
    Testing,
    Documentation,
    Deployment,
    Optimization,
    Analysis,
}

impl WorkPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkPhase::Planning => "planning",
            WorkPhase::Implementation => "implementation",
            WorkPhase::Review => "review",
            WorkPhase::Testing => "testing",
            WorkPhase::Documentation => "documentation",
            WorkPhase::Deployment => "deployment",
            WorkPhase::Optimization => "optimization",
            WorkPhase::Analysis => "analysis",
        }
    }

    /// Parse a phase string, case-insensitively.
    pub fn parse(s: &str) -> Option<WorkPhase> {
        match s.to_ascii_lowercase().as_str() {
            "planning" => Some(WorkPhase::Planning),
            "implementation" => Some(WorkPhase::Implementation),
            "review" => Some(WorkPhase::Review),
            "testing" => Some(WorkPhase::Testing),
            "documentation" => Some(WorkPhase::Documentation),
            "deployment" => Some(WorkPhase::Deployment),
            "optimization" => Some(WorkPhase::Optimization),
            "analysis" => Some(WorkPhase::Analysis),
            _ => None,
        }
    }
}

impl fmt::Display for WorkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single unit of work handed to one agent.
///
/// Mutated only between agent handoffs: the engine appends to
/// `review_feedback` and increments `review_attempt` when re-queueing after
/// a failed review; agents borrow the item for the duration of a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identifier (≤ 256 chars)
    pub id: String,

    /// What needs to be done (10 ..= 50000 chars)
    pub description: String,

    /// Lifecycle phase
    pub phase: WorkPhase,

    /// Priority (0 = lowest; values above 10 draw a warning)
    pub priority: u32,

    /// Consolidated retry context produced by the Optimizer
    pub consolidated_context_id: Option<MemoryId>,

    /// Reviewer feedback accumulated across attempts, oldest first
    pub review_feedback: Vec<String>,

    /// How many times this item has been through review
    pub review_attempt: u32,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, description: impl Into<String>, phase: WorkPhase) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            phase,
            priority: 0,
            consolidated_context_id: None,
            review_feedback: Vec::new(),
            review_attempt: 0,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Result of executing a work item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkResult {
    pub success: bool,

    /// Agent-defined payload, typically JSON
    pub data: Option<String>,

    /// Memories written during execution
    pub memory_ids: Vec<MemoryId>,

    /// Formatted error when `success` is false (absent for circuit-open)
    pub error: Option<String>,
}

impl WorkResult {
    pub fn success_with(data: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            memory_ids: Vec::new(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            memory_ids: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Non-error rejection emitted when the circuit breaker is open.
    ///
    /// The caller is expected to re-queue the work after `retry_after` seconds.
    pub fn circuit_open(retry_after_secs: f64) -> Self {
        let payload = serde_json::json!({
            "status": "circuit_open",
            "retry_after": retry_after_secs,
        });
        Self {
            success: false,
            data: Some(payload.to_string()),
            memory_ids: Vec::new(),
            error: None,
        }
    }

    /// Whether this result is a circuit-open rejection rather than a failure.
    pub fn is_circuit_open(&self) -> bool {
        self.error.is_none()
            && self
                .data
                .as_deref()
                .and_then(|d| serde_json::from_str::<serde_json::Value>(d).ok())
                .and_then(|v| v.get("status").and_then(|s| s.as_str()).map(|s| s == "circuit_open"))
                .unwrap_or(false)
    }

    /// Seconds until a circuit-open rejection may be retried, if present.
    pub fn retry_after(&self) -> Option<f64> {
        self.data
            .as_deref()
            .and_then(|d| serde_json::from_str::<serde_json::Value>(d).ok())
            .and_then(|v| v.get("retry_after").and_then(|r| r.as_f64()))
    }
}

/// A task entry inside a work plan, scheduled through the work graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTask {
    pub id: String,
    pub description: String,

    /// Task ids that must complete before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Agent requested by a work plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAgent {
    pub id: String,
    pub role: String,
}

/// Input to the executor and orchestrator: what to build and how to know
/// it is done.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkPlan {
    pub id: String,

    /// The prompt / requirement statement
    pub description: String,

    pub phase: WorkPhase,

    #[serde(default)]
    pub priority: u32,

    /// Technologies the work must use
    pub tech_stack: Option<String>,

    /// How completion will be judged
    pub success_criteria: Option<String>,

    #[serde(default)]
    pub constraints: Vec<String>,

    /// Tasks for parallel scheduling (may be empty for single-shot work)
    #[serde(default)]
    pub tasks: Vec<PlanTask>,

    /// Agents the orchestrator should register
    #[serde(default)]
    pub agents: Vec<PlanAgent>,

    #[serde(default)]
    pub review_feedback: Vec<String>,

    #[serde(default)]
    pub review_attempt: u32,

    pub consolidated_context_id: Option<MemoryId>,
}

impl WorkPlan {
    pub fn new(id: impl Into<String>, description: impl Into<String>, phase: WorkPhase) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            phase,
            priority: 0,
            tech_stack: None,
            success_criteria: None,
            constraints: Vec::new(),
            tasks: Vec::new(),
            agents: Vec::new(),
            review_feedback: Vec::new(),
            review_attempt: 0,
            consolidated_context_id: None,
        }
    }

    /// Build a plan from a work item, carrying review history across.
    pub fn from_work_item(item: &WorkItem) -> Self {
        Self {
            id: item.id.clone(),
            description: item.description.clone(),
            phase: item.phase,
            priority: item.priority,
            tech_stack: None,
            success_criteria: None,
            constraints: Vec::new(),
            tasks: Vec::new(),
            agents: Vec::new(),
            review_feedback: item.review_feedback.clone(),
            review_attempt: item.review_attempt,
            consolidated_context_id: item.consolidated_context_id,
        }
    }
}
