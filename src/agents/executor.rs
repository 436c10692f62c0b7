//! Executor agent: primary work agent and sub-agent manager
//!
//! Executes work plans by driving a tool-use loop against the LLM:
//! the model is offered `read_file`, `create_file`, `edit_file`, and
//! `run_command`, and the loop alternates assistant tool-use messages with
//! user tool-result messages until the model ends its turn or the iteration
//! ceiling is reached. Every LLM call is guarded by the circuit breaker.

use crate::agents::error_context::ErrorContext;
use crate::agents::metrics::MetricsCollector;
use crate::agents::validation::{validate_work_item, validate_work_plan};
use crate::agents::{Agent, AgentRole};
use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::coordinator::{AgentState, Coordinator};
use crate::error::{OrchestrationError, Result};
use crate::ports::{
    ChatMessage, ContentBlock, FsPort, LlmPort, MemoryPort, MemoryRecord, StopReason, TokenUsage,
    ToolSpec,
};
use crate::types::{MemoryId, Namespace, WorkItem, WorkPlan, WorkResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const EXECUTOR_SYSTEM_PROMPT: &str = "\
You are the Executor Agent in a multi-agent orchestration system.

Your role:
- Execute work following the Work Plan Protocol (Phases 1-4)
- Challenge vague requirements and ask clarifying questions
- Use tools to read files, write code, run tests
- Maintain high code quality standards
- Create checkpoints at key milestones

Work Plan Protocol:
Phase 1: Prompt -> Spec (clarify requirements, resolve ambiguities)
Phase 2: Spec -> Full Spec (decompose components, define test plan)
Phase 3: Full Spec -> Plan (create execution plan with dependencies)
Phase 4: Plan -> Artifacts (implement code, tests, documentation)

You have access to tools for file operations, code execution, and version control.
Always follow best practices and validate your work before marking it complete.";

/// Utilization above which sub-agent spawning is refused.
const SUBAGENT_UTILIZATION_LIMIT: f64 = 0.75;

/// Executor workflow phases, reported to the coordinator for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorPhase {
    Idle,
    Analyzing,
    Planning,
    Executing,
    Completed,
}

/// Configuration for the Executor agent.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub agent_id: String,

    /// Maximum simultaneously active sub-agents (default 4)
    pub max_subagents: usize,

    /// Hard ceiling on LLM round-trips per work plan (default 10)
    pub max_tool_iterations: u32,

    /// Tech stack assumed when a work item carries none
    pub default_tech_stack: String,

    /// Success criterion assumed when a work item carries none
    pub default_success_criteria: String,

    /// LLM credential; resolved from the environment when absent
    pub api_key: Option<String>,

    pub breaker: CircuitBreakerConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            agent_id: "executor".to_string(),
            max_subagents: 4,
            max_tool_iterations: 10,
            default_tech_stack: "Rust".to_string(),
            default_success_criteria: "Code builds and tests pass".to_string(),
            api_key: None,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// How one work plan execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,

    /// Requirements were too vague; see the question list
    Challenged,

    /// The circuit breaker rejected the request
    CircuitOpen,

    /// The iteration ceiling was reached before the model finished
    Degraded,
}

/// Outcome of one work plan execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub response_text: String,
    pub issues: Vec<String>,
    pub questions: Vec<String>,
    pub retry_after_secs: Option<f64>,
    pub iterations: u32,
    pub usage: TokenUsage,

    /// (tool name, input) pairs in invocation order
    pub tool_invocations: Vec<(String, Value)>,
    pub memory_ids: Vec<MemoryId>,
}

impl ExecutionOutcome {
    fn challenged(issues: Vec<String>, questions: Vec<String>) -> Self {
        Self {
            status: ExecutionStatus::Challenged,
            response_text: String::new(),
            issues,
            questions,
            retry_after_secs: None,
            iterations: 0,
            usage: TokenUsage::default(),
            tool_invocations: Vec::new(),
            memory_ids: Vec::new(),
        }
    }
}

/// Primary work agent.
pub struct ExecutorAgent {
    config: ExecutorConfig,
    coordinator: Coordinator,
    llm: Arc<dyn LlmPort>,
    memory: Arc<dyn MemoryPort>,
    fs: Arc<dyn FsPort>,
    breaker: Mutex<CircuitBreaker>,
    metrics: MetricsCollector,
    phase: RwLock<ExecutorPhase>,
    active_subagents: RwLock<Vec<String>>,
    subagent_counter: RwLock<usize>,
    session_active: AtomicBool,
}

impl ExecutorAgent {
    pub async fn new(
        config: ExecutorConfig,
        coordinator: Coordinator,
        llm: Arc<dyn LlmPort>,
        memory: Arc<dyn MemoryPort>,
        fs: Arc<dyn FsPort>,
    ) -> Arc<Self> {
        coordinator.register_agent(&config.agent_id).await;

        let breaker = CircuitBreaker::new(config.breaker.clone());
        Arc::new(Self {
            config,
            coordinator,
            llm,
            memory,
            fs,
            breaker: Mutex::new(breaker),
            metrics: MetricsCollector::new(),
            phase: RwLock::new(ExecutorPhase::Idle),
            active_subagents: RwLock::new(Vec::new()),
            subagent_counter: RwLock::new(0),
            session_active: AtomicBool::new(false),
        })
    }

    fn resolved_api_key(&self) -> Option<String> {
        self.config
            .api_key
            .clone()
            .or_else(crate::config::resolve_api_key)
    }

    /// Tool definitions exposed to the LLM, in the wire schema it expects.
    pub fn tool_specs() -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "read_file".to_string(),
                description:
                    "Read the contents of a file. Use this to examine existing code or configuration."
                        .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "Absolute path to the file to read"
                        }
                    },
                    "required": ["file_path"]
                }),
            },
            ToolSpec {
                name: "create_file".to_string(),
                description:
                    "Create a new file with the specified content. Use this to write code, tests, or documentation."
                        .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "Absolute path where the file should be created"
                        },
                        "content": {
                            "type": "string",
                            "description": "Content to write to the file"
                        }
                    },
                    "required": ["file_path", "content"]
                }),
            },
            ToolSpec {
                name: "edit_file".to_string(),
                description:
                    "Edit an existing file by replacing old_text with new_text. Use this to modify code."
                        .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "Absolute path to the file to edit"
                        },
                        "old_text": {
                            "type": "string",
                            "description": "Exact text to find and replace"
                        },
                        "new_text": {
                            "type": "string",
                            "description": "New text to insert"
                        }
                    },
                    "required": ["file_path", "old_text", "new_text"]
                }),
            },
            ToolSpec {
                name: "run_command".to_string(),
                description:
                    "Execute a shell command. Use this to run tests, build code, or perform other operations."
                        .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": "Shell command to execute"
                        },
                        "working_dir": {
                            "type": "string",
                            "description": "Working directory for command execution (optional)"
                        }
                    },
                    "required": ["command"]
                }),
            },
        ]
    }

    /// Execute a work plan through the LLM tool-use loop.
    pub async fn execute_work_plan(&self, plan: &WorkPlan) -> Result<ExecutionOutcome> {
        info!(
            "[Executor] Executing work (phase={}): {}",
            plan.phase,
            plan.description.chars().take(100).collect::<String>()
        );

        self.coordinator
            .update_agent_state(&self.config.agent_id, AgentState::Running)
            .await;
        self.set_phase(ExecutorPhase::Analyzing).await;

        // Plan validation: challenge vague requirements instead of executing
        let validation = validate_work_plan(plan);
        for warning in &validation.warnings {
            warn!("[Executor] Work plan warning: {}", warning);
        }
        if !validation.valid() {
            info!(
                "[Executor] Requirements challenged: {} issues",
                validation.errors.len()
            );
            self.set_phase(ExecutorPhase::Idle).await;
            self.coordinator
                .update_agent_state(&self.config.agent_id, AgentState::Blocked)
                .await;
            return Ok(ExecutionOutcome::challenged(
                validation.errors,
                validation.questions,
            ));
        }

        self.set_phase(ExecutorPhase::Planning).await;
        let execution_prompt = self.build_execution_prompt(plan);

        self.set_phase(ExecutorPhase::Executing).await;

        // Circuit breaker gate before touching the LLM
        {
            let mut breaker = self.breaker.lock().await;
            if !breaker.can_attempt() {
                let status = breaker.status();
                drop(breaker);
                warn!(
                    "[Executor] Circuit breaker is {:?}, rejecting request ({}s cooldown remaining)",
                    status.state, status.cooldown_remaining_secs
                );
                self.coordinator
                    .update_agent_state(&self.config.agent_id, AgentState::Degraded)
                    .await;
                self.set_phase(ExecutorPhase::Idle).await;
                return Ok(ExecutionOutcome {
                    status: ExecutionStatus::CircuitOpen,
                    response_text: format!(
                        "LLM API is temporarily unavailable (circuit breaker open). \
                         Retry in {:.0} seconds. This work item will be re-queued automatically.",
                        status.cooldown_remaining_secs
                    ),
                    issues: Vec::new(),
                    questions: Vec::new(),
                    retry_after_secs: Some(status.cooldown_remaining_secs),
                    iterations: 0,
                    usage: TokenUsage::default(),
                    tool_invocations: Vec::new(),
                    memory_ids: Vec::new(),
                });
            }
        }

        let outcome = self.tool_use_loop(plan, execution_prompt).await;

        match &outcome {
            Ok(outcome) if outcome.status == ExecutionStatus::Success => {
                self.set_phase(ExecutorPhase::Completed).await;
                self.coordinator
                    .update_agent_state(&self.config.agent_id, AgentState::Complete)
                    .await;
                info!(
                    "[Executor] Work completed: {} ({} in / {} out tokens, {} iterations)",
                    plan.id, outcome.usage.input_tokens, outcome.usage.output_tokens,
                    outcome.iterations
                );
            }
            Ok(_) => {
                self.set_phase(ExecutorPhase::Idle).await;
                self.coordinator
                    .update_agent_state(&self.config.agent_id, AgentState::Degraded)
                    .await;
            }
            Err(e) => {
                warn!("[Executor] Execution failed: {}", e);
                self.set_phase(ExecutorPhase::Idle).await;
                self.coordinator
                    .update_agent_state(&self.config.agent_id, AgentState::Failed)
                    .await;
            }
        }

        outcome
    }

    /// The tool-use loop proper: alternate tool_use / tool_result until
    /// `end_turn` or the iteration ceiling.
    async fn tool_use_loop(
        &self,
        plan: &WorkPlan,
        execution_prompt: String,
    ) -> Result<ExecutionOutcome> {
        let tools = Self::tool_specs();
        let mut messages = vec![ChatMessage::user_text(execution_prompt)];
        let mut usage = TokenUsage::default();
        let mut tool_invocations: Vec<(String, Value)> = Vec::new();

        info!(
            "[Executor] Starting tool execution loop (max {} iterations)",
            self.config.max_tool_iterations
        );

        for iteration in 1..=self.config.max_tool_iterations {
            debug!("[Executor] API call iteration {}", iteration);

            let response = {
                let call = self
                    .llm
                    .chat(
                        Some(EXECUTOR_SYSTEM_PROMPT.to_string()),
                        messages.clone(),
                        tools.clone(),
                    )
                    .await;

                let mut breaker = self.breaker.lock().await;
                match call {
                    Ok(response) => {
                        breaker.record_success();
                        response
                    }
                    Err(e) => {
                        if e.is_llm_failure() {
                            breaker.record_failure();
                        }
                        warn!(
                            "[Executor] API call failed (iteration {}): {}",
                            iteration, e
                        );
                        return Err(e);
                    }
                }
            };

            usage.input_tokens += response.usage.input_tokens;
            usage.output_tokens += response.usage.output_tokens;
            debug!("[Executor] Response stop_reason: {:?}", response.stop_reason);

            if response.stop_reason == StopReason::ToolUse {
                let mut tool_results = Vec::new();

                for (id, name, input) in response.tool_uses() {
                    info!("[Executor] Tool requested: {}", name);
                    tool_invocations.push((name.to_string(), input.clone()));

                    let result = self.execute_tool(name, input).await;
                    tool_results.push(ContentBlock::tool_result(id, result.to_string()));
                }

                let executed = tool_results.len();
                messages.push(ChatMessage::assistant(response.content));
                messages.push(ChatMessage::user(tool_results));
                debug!(
                    "[Executor] Executed {} tools, continuing conversation",
                    executed
                );
                continue;
            }

            // Final response: concatenate text blocks and finish
            let response_text = response.text();
            info!(
                "[Executor] Final response received ({} chars)",
                response_text.len()
            );

            let memory_ids = self.store_response(plan, &response_text).await;

            return Ok(ExecutionOutcome {
                status: ExecutionStatus::Success,
                response_text,
                issues: Vec::new(),
                questions: Vec::new(),
                retry_after_secs: None,
                iterations: iteration,
                usage,
                tool_invocations,
                memory_ids,
            });
        }

        warn!(
            "[Executor] Max iterations ({}) reached",
            self.config.max_tool_iterations
        );
        Ok(ExecutionOutcome {
            status: ExecutionStatus::Degraded,
            response_text: "Max tool execution iterations reached. Work incomplete.".to_string(),
            issues: vec!["Max tool execution iterations reached".to_string()],
            questions: Vec::new(),
            retry_after_secs: None,
            iterations: self.config.max_tool_iterations,
            usage,
            tool_invocations,
            memory_ids: Vec::new(),
        })
    }

    /// Execute one requested tool via the filesystem port.
    ///
    /// Tool errors are returned inside the result payload so the model can
    /// see them and recover within the same loop.
    async fn execute_tool(&self, name: &str, input: &Value) -> Value {
        debug!("[Executor] Executing tool: {} {:?}", name, input);

        let result = match name {
            "read_file" => match input.get("file_path").and_then(Value::as_str) {
                Some(path) => self
                    .fs
                    .read_file(&PathBuf::from(path))
                    .await
                    .map(|out| json!({"success": true, "content": out.content, "size": out.size})),
                None => Err(OrchestrationError::Tool(
                    "read_file requires 'file_path'".to_string(),
                )),
            },
            "create_file" => {
                let path = input.get("file_path").and_then(Value::as_str);
                let content = input.get("content").and_then(Value::as_str);
                match (path, content) {
                    (Some(path), Some(content)) => self
                        .fs
                        .create_file(&PathBuf::from(path), content)
                        .await
                        .map(|out| {
                            json!({"success": true, "message": out.message, "size": out.size})
                        }),
                    _ => Err(OrchestrationError::Tool(
                        "create_file requires 'file_path' and 'content'".to_string(),
                    )),
                }
            }
            "edit_file" => {
                let path = input.get("file_path").and_then(Value::as_str);
                let old_text = input.get("old_text").and_then(Value::as_str);
                let new_text = input.get("new_text").and_then(Value::as_str);
                match (path, old_text, new_text) {
                    (Some(path), Some(old_text), Some(new_text)) => self
                        .fs
                        .edit_file(&PathBuf::from(path), old_text, new_text)
                        .await
                        .map(|out| {
                            json!({
                                "success": true,
                                "message": out.message,
                                "replaced_length": out.replaced_length,
                                "new_length": out.new_length
                            })
                        }),
                    _ => Err(OrchestrationError::Tool(
                        "edit_file requires 'file_path', 'old_text' and 'new_text'".to_string(),
                    )),
                }
            }
            "run_command" => match input.get("command").and_then(Value::as_str) {
                Some(command) => {
                    let working_dir = input
                        .get("working_dir")
                        .and_then(Value::as_str)
                        .map(PathBuf::from);
                    self.fs
                        .run_command(command, working_dir, crate::ports::fs::COMMAND_TIMEOUT)
                        .await
                        .map(|out| {
                            json!({
                                "success": out.success(),
                                "exit_code": out.exit_code,
                                "stdout": out.stdout,
                                "stderr": out.stderr
                            })
                        })
                }
                None => Err(OrchestrationError::Tool(
                    "run_command requires 'command'".to_string(),
                )),
            },
            _ => Err(OrchestrationError::Tool(format!("Unknown tool: {}", name))),
        };

        match result {
            Ok(value) => value,
            Err(e) => {
                warn!("[Executor] Tool execution failed: {}", e);
                json!({"success": false, "error": e.to_string()})
            }
        }
    }

    fn build_execution_prompt(&self, plan: &WorkPlan) -> String {
        let mut parts = vec![
            "# Work Plan Execution Request\n".to_string(),
            format!("**Prompt**: {}\n", plan.description),
        ];

        if let Some(ref tech_stack) = plan.tech_stack {
            parts.push(format!("**Tech Stack**: {}\n", tech_stack));
        }
        if let Some(ref criteria) = plan.success_criteria {
            parts.push(format!("**Success Criteria**: {}\n", criteria));
        }
        if !plan.constraints.is_empty() {
            parts.push(format!("**Constraints**: {}\n", plan.constraints.join(", ")));
        }
        if !plan.review_feedback.is_empty() {
            parts.push(format!(
                "\n## Review Feedback From Previous Attempts\n{}\n",
                plan.review_feedback
                    .iter()
                    .map(|f| format!("- {}", f))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        parts.push("\n## Instructions\n".to_string());
        parts.push("Follow the Work Plan Protocol:\n".to_string());
        parts.push("1. Phase 1: Analyze and clarify requirements\n".to_string());
        parts.push("2. Phase 2: Decompose into components with test plan\n".to_string());
        parts.push("3. Phase 3: Create execution plan\n".to_string());
        parts.push("4. Phase 4: Implement code, tests, and documentation\n".to_string());
        parts.push("\nUse tools to read files, write code, and run tests.\n".to_string());
        parts.push("Commit your changes when logical units are complete.\n".to_string());

        parts.concat()
    }

    /// Store a substantial final response as an execution memory.
    async fn store_response(&self, plan: &WorkPlan, response_text: &str) -> Vec<MemoryId> {
        if response_text.len() <= 100 {
            return Vec::new();
        }

        let record = MemoryRecord::new(
            response_text.chars().take(500).collect::<String>(),
            Namespace::ProjectAgent {
                agent_id: self.config.agent_id.clone(),
            },
            7,
        )
        .with_tags(vec!["execution".to_string(), plan.phase.as_str().to_string()]);

        match self.memory.store(record).await {
            Ok(id) => vec![id],
            Err(e) => {
                warn!("[Executor] Failed to store execution memory: {}", e);
                Vec::new()
            }
        }
    }

    /// Spawn a sub-agent for independent parallel work.
    ///
    /// Fails fast when the sub-agent limit is reached or context headroom is
    /// insufficient. Sub-agent ids derive from the parent id.
    pub async fn spawn_subagent(&self) -> Result<String> {
        {
            let active = self.active_subagents.read().await;
            if active.len() >= self.config.max_subagents {
                return Err(OrchestrationError::State(format!(
                    "Max subagents ({}) already active",
                    self.config.max_subagents
                )));
            }
        }

        let utilization = self.coordinator.get_context_utilization().await;
        if utilization > SUBAGENT_UTILIZATION_LIMIT {
            return Err(OrchestrationError::State(
                "Insufficient context budget for sub-agent".to_string(),
            ));
        }

        let subagent_id = {
            let mut counter = self.subagent_counter.write().await;
            *counter += 1;
            format!("{}_sub_{}", self.config.agent_id, *counter)
        };

        self.coordinator.register_agent(&subagent_id).await;
        self.coordinator
            .update_agent_state(&subagent_id, AgentState::Running)
            .await;
        self.active_subagents.write().await.push(subagent_id.clone());

        info!("[Executor] Spawned sub-agent {}", subagent_id);
        Ok(subagent_id)
    }

    /// Terminate a sub-agent, marking it complete.
    pub async fn terminate_subagent(&self, subagent_id: &str) {
        let mut active = self.active_subagents.write().await;
        if let Some(index) = active.iter().position(|id| id == subagent_id) {
            active.remove(index);
            self.coordinator
                .update_agent_state(subagent_id, AgentState::Complete)
                .await;
        }
    }

    pub async fn active_subagents(&self) -> Vec<String> {
        self.active_subagents.read().await.clone()
    }

    pub async fn current_phase(&self) -> ExecutorPhase {
        *self.phase.read().await
    }

    /// Breaker status for reporting.
    pub async fn breaker_status(&self) -> crate::breaker::CircuitBreakerStatus {
        self.breaker.lock().await.status()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    async fn set_phase(&self, phase: ExecutorPhase) {
        *self.phase.write().await = phase;
    }
}

#[async_trait]
impl Agent for ExecutorAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Executor
    }

    async fn start_session(&self) -> Result<()> {
        if self.session_active.load(Ordering::SeqCst) {
            return Ok(());
        }

        info!("Starting session for agent {}", self.config.agent_id);
        if self.resolved_api_key().is_none() {
            return Err(OrchestrationError::State(format!(
                "{} not set. Cannot start session without API access.",
                crate::config::API_KEY_VAR
            )));
        }

        self.session_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_session(&self) -> Result<()> {
        if self.session_active.swap(false, Ordering::SeqCst) {
            info!("Session stopped for {}", self.config.agent_id);
        }
        Ok(())
    }

    async fn execute(&self, item: &WorkItem) -> WorkResult {
        info!(
            "[Executor] Received work item {} (phase: {}, attempt: {})",
            item.id, item.phase, item.review_attempt
        );

        self.metrics
            .start_work_item(&item.id, &self.config.agent_id, item.phase)
            .await;

        let validation = validate_work_item(item);
        for warning in &validation.warnings {
            warn!("[Executor] Work item warning: {}", warning);
        }
        if !validation.valid() {
            self.metrics
                .finish_work_item(&item.id, false, Some("ValidationError".to_string()))
                .await;
            return WorkResult::failure(format!(
                "Invalid work item:\n{}",
                validation
                    .errors
                    .iter()
                    .map(|e| format!("  - {}", e))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        // Auto-start the session rather than failing on inactive state
        if !self.session_active.load(Ordering::SeqCst) {
            if let Err(e) = self.start_session().await {
                self.metrics
                    .finish_work_item(&item.id, false, Some("StateError".to_string()))
                    .await;
                return WorkResult::failure(e.to_string());
            }
        }

        let mut plan = WorkPlan::from_work_item(item);
        plan.tech_stack = Some(self.config.default_tech_stack.clone());
        plan.success_criteria = Some(self.config.default_success_criteria.clone());

        match self.execute_work_plan(&plan).await {
            Ok(outcome) => {
                let success = outcome.status == ExecutionStatus::Success;
                self.metrics
                    .finish_work_item(
                        &item.id,
                        success,
                        (!success).then(|| format!("{:?}", outcome.status)),
                    )
                    .await;

                match outcome.status {
                    ExecutionStatus::CircuitOpen => {
                        WorkResult::circuit_open(outcome.retry_after_secs.unwrap_or(0.0))
                    }
                    ExecutionStatus::Challenged => {
                        let error = format!(
                            "Requirements challenged: {}",
                            outcome.issues.join("; ")
                        );
                        let payload = json!({
                            "status": "challenged",
                            "issues": outcome.issues,
                            "questions": outcome.questions,
                        });
                        WorkResult {
                            success: false,
                            data: Some(payload.to_string()),
                            memory_ids: Vec::new(),
                            error: Some(error),
                        }
                    }
                    ExecutionStatus::Degraded => WorkResult {
                        success: false,
                        data: Some(
                            json!({
                                "status": "degraded",
                                "iterations": outcome.iterations,
                                "response_text": outcome.response_text,
                            })
                            .to_string(),
                        ),
                        memory_ids: outcome.memory_ids,
                        error: Some("Max tool execution iterations reached".to_string()),
                    },
                    ExecutionStatus::Success => WorkResult {
                        success: true,
                        data: Some(
                            json!({
                                "status": "success",
                                "response_text": outcome.response_text,
                                "iterations": outcome.iterations,
                                "tool_uses": outcome.tool_invocations.len(),
                                "tokens": {
                                    "input": outcome.usage.input_tokens,
                                    "output": outcome.usage.output_tokens,
                                },
                            })
                            .to_string(),
                        ),
                        memory_ids: outcome.memory_ids,
                        error: None,
                    },
                }
            }
            Err(e) => {
                let error_kind = match &e {
                    OrchestrationError::RateLimit(_) => "RateLimit",
                    OrchestrationError::Timeout(_) => "Timeout",
                    OrchestrationError::Authentication(_) => "Authentication",
                    OrchestrationError::Network(_) => "Network",
                    OrchestrationError::Validation(_) => "ValidationError",
                    OrchestrationError::State(_) => "StateError",
                    _ => "ExecutionError",
                };
                self.metrics
                    .finish_work_item(&item.id, false, Some(error_kind.to_string()))
                    .await;

                let context = ErrorContext::for_work_item(
                    &item.id,
                    item.phase,
                    &item.description,
                    &self.config.agent_id,
                    &format!("{:?}", self.current_phase().await),
                    self.session_active.load(Ordering::SeqCst),
                    error_kind,
                    &e.to_string(),
                );
                debug!("Error context:\n{}", context.format_full());

                WorkResult::failure(context.format_compressed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::llm::MockLlmPort;
    use crate::ports::{ChatResponse, InMemoryStore, LocalFs};
    use crate::types::WorkPhase;

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            content: vec![ContentBlock::text(text)],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        }
    }

    async fn executor_with_llm(llm: MockLlmPort) -> Arc<ExecutorAgent> {
        let config = ExecutorConfig {
            api_key: Some("sk-ant-test-key".to_string()),
            ..Default::default()
        };
        ExecutorAgent::new(
            config,
            Coordinator::new(),
            Arc::new(llm),
            Arc::new(InMemoryStore::new()),
            Arc::new(LocalFs::new()),
        )
        .await
    }

    fn clear_plan() -> WorkPlan {
        let mut plan = WorkPlan::new(
            "wp-1",
            "Build a REST login endpoint using axum because we need session auth; \
             must include only the password flow and all error cases",
            WorkPhase::Implementation,
        );
        plan.tech_stack = Some("Rust".to_string());
        plan.success_criteria = Some("Tests pass".to_string());
        plan
    }

    #[tokio::test]
    async fn test_end_turn_completes_in_one_iteration() {
        let mut llm = MockLlmPort::new();
        llm.expect_chat()
            .times(1)
            .returning(|_, _, _| Ok(text_response("All done.")));

        let executor = executor_with_llm(llm).await;
        let outcome = executor.execute_work_plan(&clear_plan()).await.unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.response_text, "All done.");
    }

    #[tokio::test]
    async fn test_tool_use_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let file_path = temp.path().join("hello.txt");
        std::fs::write(&file_path, "hello world").unwrap();
        let file_path_str = file_path.to_str().unwrap().to_string();

        let mut llm = MockLlmPort::new();
        let mut call = 0;
        llm.expect_chat().times(2).returning(move |_, messages, _| {
            call += 1;
            if call == 1 {
                Ok(ChatResponse {
                    content: vec![ContentBlock::ToolUse {
                        id: "toolu_1".to_string(),
                        name: "read_file".to_string(),
                        input: json!({"file_path": file_path_str}),
                    }],
                    stop_reason: StopReason::ToolUse,
                    usage: TokenUsage::default(),
                })
            } else {
                // Second call must carry the tool result back
                let last = messages.last().unwrap();
                assert!(matches!(last.role, crate::ports::Role::User));
                assert!(matches!(
                    last.content[0],
                    ContentBlock::ToolResult { .. }
                ));
                Ok(text_response("Read it."))
            }
        });

        let executor = executor_with_llm(llm).await;
        let outcome = executor.execute_work_plan(&clear_plan()).await.unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.tool_invocations.len(), 1);
        assert_eq!(outcome.tool_invocations[0].0, "read_file");
    }

    #[tokio::test]
    async fn test_iteration_ceiling_degrades() {
        let mut llm = MockLlmPort::new();
        llm.expect_chat().returning(|_, _, _| {
            Ok(ChatResponse {
                content: vec![ContentBlock::ToolUse {
                    id: "toolu_x".to_string(),
                    name: "run_command".to_string(),
                    input: json!({"command": "true"}),
                }],
                stop_reason: StopReason::ToolUse,
                usage: TokenUsage::default(),
            })
        });

        let executor = executor_with_llm(llm).await;
        let outcome = executor.execute_work_plan(&clear_plan()).await.unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Degraded);
        assert_eq!(outcome.iterations, 10);
        assert!(outcome.response_text.contains("Max tool execution iterations"));
    }

    #[tokio::test]
    async fn test_vague_plan_is_challenged() {
        let llm = MockLlmPort::new();
        let executor = executor_with_llm(llm).await;

        let mut plan = WorkPlan::new("wp-2", "fix stuff somehow", WorkPhase::Implementation);
        plan.tech_stack = Some("Rust".to_string());
        plan.success_criteria = Some("works".to_string());

        let outcome = executor.execute_work_plan(&plan).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Challenged);
        assert!(!outcome.questions.is_empty());
    }

    #[tokio::test]
    async fn test_breaker_opens_after_failures_then_rejects() {
        let mut llm = MockLlmPort::new();
        llm.expect_chat()
            .returning(|_, _, _| Err(OrchestrationError::RateLimit("429".to_string())));

        let config = ExecutorConfig {
            api_key: Some("sk-ant-test-key".to_string()),
            breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                cooldown: std::time::Duration::from_secs(60),
                half_open_attempts: 1,
            },
            ..Default::default()
        };
        let executor = ExecutorAgent::new(
            config,
            Coordinator::new(),
            Arc::new(llm),
            Arc::new(InMemoryStore::new()),
            Arc::new(LocalFs::new()),
        )
        .await;

        // Three failing calls trip the breaker
        for _ in 0..3 {
            let err = executor.execute_work_plan(&clear_plan()).await.unwrap_err();
            assert!(err.is_llm_failure());
        }

        // Fourth request is rejected without touching the LLM
        let outcome = executor.execute_work_plan(&clear_plan()).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::CircuitOpen);
        assert!(outcome.retry_after_secs.unwrap() > 0.0);

        // Executor reports degraded to the coordinator
        assert_eq!(
            executor
                .coordinator
                .get_agent_state(&executor.config.agent_id)
                .await,
            Some(AgentState::Degraded)
        );
    }

    #[tokio::test]
    async fn test_subagent_limit() {
        let llm = MockLlmPort::new();
        let executor = executor_with_llm(llm).await;

        for _ in 0..4 {
            executor.spawn_subagent().await.unwrap();
        }
        let err = executor.spawn_subagent().await.unwrap_err();
        assert!(matches!(err, OrchestrationError::State(_)));

        // Terminating frees a slot
        let active = executor.active_subagents().await;
        executor.terminate_subagent(&active[0]).await;
        executor.spawn_subagent().await.unwrap();
    }

    #[tokio::test]
    async fn test_subagent_blocked_on_high_utilization() {
        let llm = MockLlmPort::new();
        let executor = executor_with_llm(llm).await;
        executor
            .coordinator
            .update_context_utilization(0.9)
            .await;

        let err = executor.spawn_subagent().await.unwrap_err();
        assert!(err.to_string().contains("context budget"));
    }

    #[tokio::test]
    async fn test_stop_session_idempotent() {
        let llm = MockLlmPort::new();
        let executor = executor_with_llm(llm).await;

        executor.start_session().await.unwrap();
        executor.stop_session().await.unwrap();
        executor.stop_session().await.unwrap();
        assert!(!executor.session_active.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_execute_invalid_item_fails_validation() {
        let llm = MockLlmPort::new();
        let executor = executor_with_llm(llm).await;

        let item = WorkItem::new("", "Implement the login endpoint with axum because auth is required; must include all flows", WorkPhase::Implementation);
        let result = executor.execute(&item).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Invalid work item"));
    }

    #[tokio::test]
    async fn test_unknown_tool_reports_error_in_result() {
        let llm = MockLlmPort::new();
        let executor = executor_with_llm(llm).await;

        let result = executor.execute_tool("delete_everything", &json!({})).await;
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("Unknown tool"));
    }
}
