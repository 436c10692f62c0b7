//! Optimizer agent: context and resource optimization specialist
//!
//! Builds the per-task context payload: discovers relevant skills across the
//! configured roots, allocates the token budget proportionally, and
//! consolidates review feedback into a single retry-context memory when a
//! work item comes back from a failed review.

use crate::agents::{Agent, AgentRole};
use crate::budget::{allocate, BudgetAllocation, BudgetFractions};
use crate::coordinator::{AgentState, Coordinator};
use crate::error::Result;
use crate::monitor::TOTAL_CONTEXT_TOKENS;
use crate::ports::{MemoryPort, MemoryRecord};
use crate::skills::{SkillIndex, SkillIndexConfig, SkillMatch};
use crate::types::{MemoryId, Namespace, WorkItem, WorkResult};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Configuration for the Optimizer agent.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub agent_id: String,
    pub skills: SkillIndexConfig,
    pub budget: BudgetFractions,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            agent_id: "optimizer".to_string(),
            skills: SkillIndexConfig::default(),
            budget: BudgetFractions::default(),
        }
    }
}

/// Optimized context produced for one task.
#[derive(Debug, Clone)]
pub struct OptimizedContext {
    pub allocation: BudgetAllocation,
    pub skills: Vec<SkillMatch>,
    pub total_budget: usize,
}

/// Context and resource optimization specialist.
pub struct OptimizerAgent {
    config: OptimizerConfig,
    coordinator: Coordinator,
    memory: Arc<dyn MemoryPort>,
    index: SkillIndex,
    last_allocation: RwLock<Option<BudgetAllocation>>,
    session_active: AtomicBool,
}

impl OptimizerAgent {
    pub async fn new(
        config: OptimizerConfig,
        coordinator: Coordinator,
        memory: Arc<dyn MemoryPort>,
    ) -> Arc<Self> {
        coordinator.register_agent(&config.agent_id).await;

        let index = SkillIndex::new(config.skills.clone());
        Arc::new(Self {
            config,
            coordinator,
            memory,
            index,
            last_allocation: RwLock::new(None),
            session_active: AtomicBool::new(false),
        })
    }

    /// Optimize context for a task: discover skills and allocate the budget.
    pub async fn optimize_context(
        &self,
        task_description: &str,
        available_tokens: usize,
    ) -> Result<OptimizedContext> {
        self.coordinator
            .update_agent_state(&self.config.agent_id, AgentState::Running)
            .await;

        let skills = self.index.discover(task_description);

        let local_count = skills.iter().filter(|s| s.is_local).count();
        self.coordinator
            .set_metric("skill_count", skills.len() as f64)
            .await;
        self.coordinator
            .set_metric("local_skill_count", local_count as f64)
            .await;

        let allocation = allocate(available_tokens, &self.config.budget)?;
        *self.last_allocation.write().await = Some(allocation);

        let record = MemoryRecord::new(
            format!(
                "Loaded {} skills ({} local, {} global) for task: {}",
                skills.len(),
                local_count,
                skills.len() - local_count,
                task_description.chars().take(100).collect::<String>()
            ),
            Namespace::ProjectAgent {
                agent_id: self.config.agent_id.clone(),
            },
            7,
        )
        .with_tags(vec!["skill-discovery".to_string(), "optimization".to_string()]);
        if let Err(e) = self.memory.store(record).await {
            warn!("[Optimizer] Failed to store discovery memory: {}", e);
        }

        self.coordinator
            .update_agent_state(&self.config.agent_id, AgentState::Complete)
            .await;

        Ok(OptimizedContext {
            allocation,
            skills,
            total_budget: allocation.total(),
        })
    }

    /// Consolidate review feedback and guidance into one retry-context
    /// memory, returning its handle for the re-queued work item.
    pub async fn consolidate_review_context(
        &self,
        item: &WorkItem,
        guidance: &str,
    ) -> Result<MemoryId> {
        let feedback_section = if item.review_feedback.is_empty() {
            String::new()
        } else {
            format!(
                "\n\nPrior feedback:\n{}",
                item.review_feedback
                    .iter()
                    .map(|f| format!("- {}", f))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };

        let record = MemoryRecord::new(
            format!(
                "Consolidated retry context for {} (attempt {}):\n{}{}",
                item.id,
                item.review_attempt + 1,
                guidance,
                feedback_section
            ),
            Namespace::ProjectAgent {
                agent_id: self.config.agent_id.clone(),
            },
            9,
        )
        .with_summary(format!("Retry context for {}", item.id))
        .with_tags(vec!["review-retry".to_string(), "consolidation".to_string()]);

        let id = self.memory.store(record).await?;
        info!(
            "[Optimizer] Consolidated review context for {} -> {}",
            item.id, id
        );
        Ok(id)
    }

    /// The most recent budget allocation, if any.
    pub async fn last_allocation(&self) -> Option<BudgetAllocation> {
        *self.last_allocation.read().await
    }
}

#[async_trait]
impl Agent for OptimizerAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Optimizer
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
        let available = TOTAL_CONTEXT_TOKENS as usize;

        match self.optimize_context(&item.description, available).await {
            Ok(context) => {
                let data = json!({
                    "allocation": {
                        "critical": context.allocation.critical,
                        "skills": context.allocation.skills,
                        "project": context.allocation.project,
                        "general": context.allocation.general,
                    },
                    "skills": context
                        .skills
                        .iter()
                        .map(|s| json!({
                            "path": s.path.display().to_string(),
                            "relevance": s.relevance_score,
                            "categories": s.categories,
                            "is_local": s.is_local,
                        }))
                        .collect::<Vec<_>>(),
                    "loaded_skill_count": context.skills.len(),
                    "total_budget": context.total_budget,
                });
                WorkResult::success_with(data.to_string())
            }
            Err(e) => WorkResult::failure(format!("Optimizer error: {}", e)),
        }
    }
}
