//! Reviewer agent: quality assurance and validation specialist
//!
//! Evaluates work artifacts against eight quality gates (five standard plus
//! the three pillars: completeness, correctness, principled implementation),
//! backs each judgment with an LLM review, and produces actionable
//! improvement guidance when gates fail. Work is blocked until the required
//! gates pass.

use crate::agents::{Agent, AgentRole};
use crate::coordinator::{AgentState, Coordinator};
use crate::error::{OrchestrationError, Result};
use crate::ports::{ChatMessage, LlmPort, MemoryPort, MemoryRecord};
use crate::types::{MemoryId, Namespace, WorkItem, WorkPhase, WorkResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const REVIEWER_SYSTEM_PROMPT: &str = "\
You are the Reviewer Agent in a multi-agent orchestration system.

Your role:
- Quality assurance and validation specialist with three-pillar validation
- Validate completeness, correctness, and principled implementation
- Check intent satisfaction, documentation, test coverage
- Fact-check claims, references, external dependencies
- Check for anti-patterns and technical debt
- Suggest missing tests
- Block work until quality standards met
- Mark COMPLETE only when all 8 quality gates pass

Be thorough but constructive. Identify real issues, not nitpicks.";

/// The eight quality gates. The first five are the standard set; the last
/// three are the pillars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGate {
    IntentSatisfied,
    TestsPassing,
    DocumentationComplete,
    NoAntipatterns,
    ConstraintsMaintained,
    Completeness,
    Correctness,
    PrincipledImplementation,
}

impl QualityGate {
    pub fn all() -> [QualityGate; 8] {
        [
            QualityGate::IntentSatisfied,
            QualityGate::TestsPassing,
            QualityGate::DocumentationComplete,
            QualityGate::NoAntipatterns,
            QualityGate::ConstraintsMaintained,
            QualityGate::Completeness,
            QualityGate::Correctness,
            QualityGate::PrincipledImplementation,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityGate::IntentSatisfied => "intent_satisfied",
            QualityGate::TestsPassing => "tests_passing",
            QualityGate::DocumentationComplete => "documentation_complete",
            QualityGate::NoAntipatterns => "no_antipatterns",
            QualityGate::ConstraintsMaintained => "constraints_maintained",
            QualityGate::Completeness => "completeness",
            QualityGate::Correctness => "correctness",
            QualityGate::PrincipledImplementation => "principled_implementation",
        }
    }

    /// Human-readable form used when parsing review responses.
    fn display_name(&self) -> String {
        self.as_str().replace('_', " ")
    }
}

/// Test execution summary attached to an artifact.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TestResults {
    pub passed: u32,
    pub failed: u32,
}

/// A work artifact submitted for review.
#[derive(Debug, Clone, Default)]
pub struct ReviewArtifact {
    pub id: String,
    pub description: String,
    pub phase: Option<WorkPhase>,

    /// The produced content: code, documentation, plan text
    pub content: String,
    pub test_results: Option<TestResults>,

    /// Memory handles from the execution that produced the artifact
    pub execution_memory_ids: Vec<MemoryId>,
    pub review_attempt: u32,
}

/// Result of a quality review.
#[derive(Debug, Clone)]
pub struct ReviewResult {
    pub passed: bool,
    pub gate_results: HashMap<QualityGate, bool>,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub suggested_tests: Vec<String>,
    pub execution_context: Vec<MemoryId>,

    /// Fraction of gates that passed, in [0, 1]
    pub confidence: f64,
}

impl ReviewResult {
    /// Names of gates that failed.
    pub fn failed_gates(&self) -> Vec<&'static str> {
        let mut failed: Vec<&'static str> = self
            .gate_results
            .iter()
            .filter(|(_, passed)| !**passed)
            .map(|(gate, _)| gate.as_str())
            .collect();
        failed.sort();
        failed
    }
}

/// Configuration for the Reviewer agent.
#[derive(Debug, Clone)]
pub struct ReviewerConfig {
    pub agent_id: String,

    /// In strict mode every required gate must pass; otherwise passing means
    /// no issues were found
    pub strict_mode: bool,

    pub required_gates: HashSet<QualityGate>,

    /// Minimum acceptable test coverage fraction
    pub min_test_coverage: f64,

    /// Markers whose presence fails the anti-pattern gate
    pub antipattern_patterns: Vec<String>,

    pub api_key: Option<String>,
}

impl Default for ReviewerConfig {
    fn default() -> Self {
        Self {
            agent_id: "reviewer".to_string(),
            strict_mode: true,
            required_gates: QualityGate::all().into_iter().collect(),
            min_test_coverage: 0.70,
            antipattern_patterns: vec![
                "TODO".to_string(),
                "FIXME".to_string(),
                "HACK".to_string(),
                "XXX".to_string(),
                "mock_".to_string(),
                "stub_".to_string(),
                "__placeholder__".to_string(),
            ],
            api_key: None,
        }
    }
}

/// Quality assurance and validation specialist.
pub struct ReviewerAgent {
    config: ReviewerConfig,
    coordinator: Coordinator,
    llm: Arc<dyn LlmPort>,
    memory: Arc<dyn MemoryPort>,
    review_count: AtomicU64,
    pass_count: AtomicU64,
    fail_count: AtomicU64,
    session_active: AtomicBool,
}

impl ReviewerAgent {
    pub async fn new(
        config: ReviewerConfig,
        coordinator: Coordinator,
        llm: Arc<dyn LlmPort>,
        memory: Arc<dyn MemoryPort>,
    ) -> Arc<Self> {
        coordinator.register_agent(&config.agent_id).await;

        Arc::new(Self {
            config,
            coordinator,
            llm,
            memory,
            review_count: AtomicU64::new(0),
            pass_count: AtomicU64::new(0),
            fail_count: AtomicU64::new(0),
            session_active: AtomicBool::new(false),
        })
    }

    /// Ask the LLM a single review question, returning its text response.
    async fn call_llm(&self, prompt: String) -> Result<String> {
        let response = self
            .llm
            .chat(
                Some(REVIEWER_SYSTEM_PROMPT.to_string()),
                vec![ChatMessage::user_text(prompt)],
                vec![],
            )
            .await?;
        Ok(response.text())
    }

    /// Review a work artifact against the quality gates.
    pub async fn review(&self, artifact: &ReviewArtifact) -> Result<ReviewResult> {
        self.coordinator
            .update_agent_state(&self.config.agent_id, AgentState::Running)
            .await;
        self.review_count.fetch_add(1, Ordering::SeqCst);

        let prompt = self.build_review_prompt(artifact);
        let review_text = match self.call_llm(prompt).await {
            Ok(text) => text,
            Err(e) => {
                self.coordinator
                    .update_agent_state(&self.config.agent_id, AgentState::Failed)
                    .await;
                return Err(e);
            }
        };

        let (gate_results, mut issues, recommendations) =
            self.parse_review_results(&review_text, artifact);

        let suggested_tests = self.suggest_missing_tests(artifact, &issues);

        let required_gates_passed = self
            .config
            .required_gates
            .iter()
            .all(|gate| gate_results.get(gate).copied().unwrap_or(false));

        let passed = if self.config.strict_mode {
            required_gates_passed
        } else {
            issues.is_empty()
        };

        if passed {
            self.pass_count.fetch_add(1, Ordering::SeqCst);
        } else {
            self.fail_count.fetch_add(1, Ordering::SeqCst);
            if issues.is_empty() {
                issues.push("One or more required quality gates failed".to_string());
            }
        }

        let confidence = if gate_results.is_empty() {
            0.0
        } else {
            gate_results.values().filter(|passed| **passed).count() as f64
                / gate_results.len() as f64
        };

        info!(
            "[Reviewer] Review {} for '{}': {}/{} gates passed",
            if passed { "PASSED" } else { "FAILED" },
            artifact.id,
            gate_results.values().filter(|p| **p).count(),
            gate_results.len()
        );

        let record = MemoryRecord::new(
            format!(
                "Review {}: {} issues found",
                if passed { "PASSED" } else { "FAILED" },
                issues.len()
            ),
            Namespace::ProjectAgent {
                agent_id: self.config.agent_id.clone(),
            },
            if passed { 7 } else { 9 },
        )
        .with_tags(vec![
            "review".to_string(),
            "quality-gate".to_string(),
            if passed { "passed" } else { "failed" }.to_string(),
        ]);
        if let Err(e) = self.memory.store(record).await {
            warn!("[Reviewer] Failed to store review memory: {}", e);
        }

        self.coordinator
            .update_agent_state(
                &self.config.agent_id,
                if passed {
                    AgentState::Complete
                } else {
                    AgentState::Blocked
                },
            )
            .await;

        Ok(ReviewResult {
            passed,
            gate_results,
            issues,
            recommendations,
            suggested_tests,
            execution_context: artifact.execution_memory_ids.clone(),
            confidence,
        })
    }

    fn build_review_prompt(&self, artifact: &ReviewArtifact) -> String {
        let mut parts = vec![
            "# Quality Review Request\n\n".to_string(),
            "Review this work artifact against all 8 quality gates (5 standard + 3 pillars):\n\n"
                .to_string(),
            format!("**Artifact ID**: {}\n", artifact.id),
            format!("**Description**: {}\n", artifact.description),
            format!("**Content**:\n{}\n\n", artifact.content),
        ];

        if let Some(results) = artifact.test_results {
            parts.push(format!(
                "**Test Results**: {} passed, {} failed\n\n",
                results.passed, results.failed
            ));
        }

        parts.push("## Quality Gates to Evaluate:\n".to_string());
        for (index, gate) in QualityGate::all()
            .iter()
            .filter(|g| self.config.required_gates.contains(*g))
            .enumerate()
        {
            parts.push(format!("{}. {}\n", index + 1, gate.display_name()));
        }

        parts.push(format!(
            "\n## Instructions:\nFor each gate respond with '<gate name>: PASS' or '<gate name>: FAIL'.\n\
             Coverage must be at least {:.0}%.\n\
             If FAIL, list specific issues. Suggest actionable improvements.\n",
            self.config.min_test_coverage * 100.0
        ));

        parts.concat()
    }

    /// Parse the LLM's review into per-gate verdicts, with heuristic
    /// fallbacks when a gate is not mentioned unambiguously.
    fn parse_review_results(
        &self,
        review_text: &str,
        artifact: &ReviewArtifact,
    ) -> (HashMap<QualityGate, bool>, Vec<String>, Vec<String>) {
        let review_lower = review_text.to_lowercase();
        let mut gate_results = HashMap::new();
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        for gate in QualityGate::all() {
            if !self.config.required_gates.contains(&gate) {
                continue;
            }
            let name = gate.display_name();

            let passed = if review_lower.contains(&format!("{} pass", name))
                || review_lower.contains(&format!("{}: pass", name))
            {
                true
            } else if review_lower.contains(&format!("{} fail", name))
                || review_lower.contains(&format!("{}: fail", name))
            {
                issues.push(format!("Gate '{}' failed review", name));
                false
            } else {
                let (passed, gate_issues) = self.fallback_gate_check(gate, artifact);
                issues.extend(gate_issues);
                passed
            };

            gate_results.insert(gate, passed);
        }

        if review_lower.contains("recommend") {
            recommendations.push("See reviewer's detailed recommendations".to_string());
        }

        (gate_results, issues, recommendations)
    }

    /// Heuristic check used when the LLM response is ambiguous for a gate.
    fn fallback_gate_check(
        &self,
        gate: QualityGate,
        artifact: &ReviewArtifact,
    ) -> (bool, Vec<String>) {
        let mut issues = Vec::new();

        match gate {
            QualityGate::TestsPassing => {
                let Some(results) = artifact.test_results else {
                    issues.push("No test results found".to_string());
                    return (false, issues);
                };
                if results.failed > 0 {
                    issues.push(format!("{} test(s) failed", results.failed));
                    return (false, issues);
                }
                (true, issues)
            }
            QualityGate::NoAntipatterns => {
                for pattern in &self.config.antipattern_patterns {
                    if artifact.content.contains(pattern.as_str()) {
                        issues.push(format!("Anti-pattern found: {}", pattern));
                    }
                }
                (issues.is_empty(), issues)
            }
            // Remaining gates default to pass when unmentioned
            _ => (true, issues),
        }
    }

    /// Suggest missing tests from artifact content and detected issues.
    fn suggest_missing_tests(&self, artifact: &ReviewArtifact, issues: &[String]) -> Vec<String> {
        let content = artifact.content.to_lowercase();
        let mut suggestions = Vec::new();

        if content.contains("error") {
            suggestions.push("Add tests for error handling and edge cases".to_string());
        }
        if content.contains("async") {
            suggestions.push("Add tests for async behavior and concurrency scenarios".to_string());
        }
        if content.contains("boundary") {
            suggestions.push("Add boundary condition tests".to_string());
        }
        if issues
            .iter()
            .any(|i| i.to_lowercase().contains("completeness") || i.to_lowercase().contains("incomplete"))
        {
            suggestions.push("Add tests to verify all required features are implemented".to_string());
        }
        if issues
            .iter()
            .any(|i| i.to_lowercase().contains("correctness") || i.to_lowercase().contains("logic"))
        {
            suggestions.push("Add tests to validate core logic and invariants".to_string());
        }

        suggestions
    }

    /// Extract specific, testable requirements from a statement of intent.
    pub async fn extract_requirements_from_intent(
        &self,
        intent: &str,
        context: Option<&str>,
    ) -> Result<Vec<String>> {
        let context_section = context
            .map(|c| format!("# Additional Context\n{}\n\n", c))
            .unwrap_or_default();

        let prompt = format!(
            "Analyze the following user intent and extract explicit, testable requirements.\n\n\
             # User Intent\n{}\n\n{}\
             # Task\n\
             Extract concrete, actionable requirements. Each requirement should be specific, \
             testable, atomic, and implementation-oriented.\n\n\
             Return ONLY a JSON array of requirement strings, with no additional commentary.\n\
             Example format: [\"Requirement 1\", \"Requirement 2\"]",
            intent, context_section
        );

        let response = self.call_llm(prompt).await?;
        Ok(parse_json_string_array(&response))
    }

    /// Deep comparison of an implementation against the original intent.
    pub async fn semantic_intent_check(
        &self,
        intent: &str,
        implementation: &str,
        memories: &[String],
    ) -> Result<(bool, Vec<String>)> {
        let prompt = format!(
            "# Semantic Intent Validation\n\n\
             **Original Intent/Requirements:**\n{}\n\n\
             **Implementation Summary:**\n{}\n\n\
             **Execution Context (Recent Memories):**\n{}\n\n\
             ## Task\n\
             Determine if the implementation FULLY satisfies the original intent.\n\n\
             ## Output Format\n\
             VERDICT: PASS / FAIL\n\n\
             ISSUES (if FAIL):\n- [issue]\n\n\
             Be strict: FAIL if ANY requirement is MISSING or PARTIAL.",
            intent,
            truncate(implementation, 2000),
            memories_summary(memories)
        );

        let response = self.call_llm(prompt).await?;
        Ok((parse_verdict(&response), extract_issue_lines(&response, "ISSUES")))
    }

    /// Validate that every requirement is fully implemented, not stubbed.
    pub async fn semantic_completeness_check(
        &self,
        requirements: &[String],
        implementation: &str,
        memories: &[String],
    ) -> Result<(bool, Vec<String>)> {
        let requirement_list = requirements
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {}", i + 1, r))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "# Semantic Completeness Validation\n\n\
             **Requirements to Validate:**\n{}\n\n\
             **Implementation:**\n{}\n\n\
             **Execution Context:**\n{}\n\n\
             ## Task\n\
             Determine if EVERY requirement is FULLY implemented with substantive content.\n\
             TODO markers, stubs, placeholders, and partial implementations do not count.\n\n\
             ## Output Format\n\
             VERDICT: PASS / FAIL\n\n\
             MISSING/PARTIAL REQUIREMENTS:\n- [requirement]: [what's missing]\n\n\
             Be strict: FAIL if ANY requirement is not COMPLETE.",
            requirement_list,
            truncate(implementation, 2000),
            memories_summary(memories)
        );

        let response = self.call_llm(prompt).await?;
        Ok((
            parse_verdict(&response),
            extract_issue_lines(&response, "MISSING/PARTIAL REQUIREMENTS"),
        ))
    }

    /// Analyze logic correctness, edge case handling, and error handling.
    pub async fn semantic_correctness_check(
        &self,
        implementation: &str,
        test_results: Option<TestResults>,
        memories: &[String],
    ) -> Result<(bool, Vec<String>)> {
        let test_summary = match test_results {
            Some(results) => format!("Tests: {} passed, {} failed", results.passed, results.failed),
            None => "No test results available".to_string(),
        };

        let prompt = format!(
            "# Semantic Correctness Validation\n\n\
             **Implementation:**\n{}\n\n\
             **Test Results:**\n{}\n\n\
             **Execution Context:**\n{}\n\n\
             ## Task\n\
             Analyze logic correctness, edge case handling, error handling, and\n\
             potential concurrency or resource problems.\n\n\
             ## Output Format\n\
             VERDICT: PASS / FAIL\n\n\
             ISSUES (if FAIL):\n- [issue]\n\n\
             Be thorough: FAIL on logic issues, unhandled edges, or missing error handling.",
            truncate(implementation, 2000),
            test_summary,
            memories_summary(memories)
        );

        let response = self.call_llm(prompt).await?;
        Ok((parse_verdict(&response), extract_issue_lines(&response, "ISSUES")))
    }

    /// Generate a consolidated improvement plan after a failed review.
    pub async fn generate_improvement_guidance(
        &self,
        failed_gates: &[String],
        issues: &[String],
        intent: &str,
        memories: &[String],
    ) -> Result<String> {
        let issue_list = issues
            .iter()
            .map(|i| format!("- {}", i))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "# Generate Improvement Guidance for Review Failure\n\n\
             **Original Intent:**\n{}\n\n\
             **Failed Quality Gates:**\n{}\n\n\
             **Issues Identified:**\n{}\n\n\
             **Previous Attempt Context:**\n{}\n\n\
             ## Task\n\
             Generate a detailed, actionable improvement plan to fix ALL issues and pass\n\
             review on the next attempt: root cause, specific fixes with validation\n\
             criteria, ordered implementation steps, testing checklist.\n\
             Be specific and actionable. Focus on WHAT to fix and HOW to fix it.",
            intent,
            failed_gates.join(", "),
            issue_list,
            memories_summary(memories)
        );

        self.call_llm(prompt).await
    }

    /// Review statistics: (total, passed, failed).
    pub fn statistics(&self) -> (u64, u64, u64) {
        (
            self.review_count.load(Ordering::SeqCst),
            self.pass_count.load(Ordering::SeqCst),
            self.fail_count.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl Agent for ReviewerAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Reviewer
    }

    async fn start_session(&self) -> Result<()> {
        if self.session_active.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self
            .config
            .api_key
            .clone()
            .or_else(crate::config::resolve_api_key)
            .is_none()
        {
            return Err(OrchestrationError::State(format!(
                "{} not set. Cannot start session without API access.",
                crate::config::API_KEY_VAR
            )));
        }
        self.session_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_session(&self) -> Result<()> {
        self.session_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, item: &WorkItem) -> WorkResult {
        info!(
            "[Reviewer] Review request for {} (attempt {})",
            item.id, item.review_attempt
        );

        let artifact = ReviewArtifact {
            id: item.id.clone(),
            description: item.description.clone(),
            phase: Some(item.phase),
            content: item.description.clone(),
            test_results: None,
            execution_memory_ids: Vec::new(),
            review_attempt: item.review_attempt,
        };

        match self.review(&artifact).await {
            Ok(result) => {
                let error = if result.passed {
                    None
                } else {
                    let failed = result.failed_gates();
                    Some(format!(
                        "Review failed {} quality gate(s): {}\nIssues:\n{}",
                        failed.len(),
                        failed.join(", "),
                        result
                            .issues
                            .iter()
                            .take(5)
                            .map(|i| format!("  - {}", i))
                            .collect::<Vec<_>>()
                            .join("\n")
                    ))
                };

                let data = json!({
                    "gate_results": result
                        .gate_results
                        .iter()
                        .map(|(gate, passed)| (gate.as_str().to_string(), *passed))
                        .collect::<HashMap<String, bool>>(),
                    "issues": result.issues,
                    "recommendations": result.recommendations,
                    "suggested_tests": result.suggested_tests,
                    "confidence": result.confidence,
                });

                WorkResult {
                    success: result.passed,
                    data: Some(data.to_string()),
                    memory_ids: result.execution_context,
                    error,
                }
            }
            Err(e) => {
                debug!("[Reviewer] Review error: {}", e);
                WorkResult::failure(format!("Review failed: {}", e))
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn memories_summary(memories: &[String]) -> String {
    if memories.is_empty() {
        return "(none)".to_string();
    }
    memories
        .iter()
        .take(10)
        .map(|m| format!("- {}", truncate(m, 100)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// True iff the response contains an explicit `VERDICT: PASS`.
fn parse_verdict(response: &str) -> bool {
    response.contains("VERDICT: PASS")
}

/// Extract `- item` lines from the section following `header`.
fn extract_issue_lines(response: &str, header: &str) -> Vec<String> {
    let Some(section_start) = response.find(header) else {
        return Vec::new();
    };
    let section = &response[section_start..];
    let section = section.split("\n\n").next().unwrap_or(section);

    section
        .lines()
        .filter_map(|line| line.trim().strip_prefix("- "))
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}


/// Extract the first JSON string array embedded in free-form text.
fn parse_json_string_array(text: &str) -> Vec<String> {
    let Some(start) = text.find('[') else {
        return Vec::new();
    };
    let Some(end) = text.rfind(']') else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }

    serde_json::from_str::<Vec<String>>(&text[start..=end]).unwrap_or_default()
}
