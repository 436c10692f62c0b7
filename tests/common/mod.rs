//! Shared test helpers: scripted LLM fake and plan builders

use async_trait::async_trait;
use mnemosyne_engine::error::{OrchestrationError, Result};
use mnemosyne_engine::ports::{
    ChatMessage, ChatResponse, ContentBlock, LlmPort, StopReason, TokenUsage, ToolSpec,
};
use mnemosyne_engine::types::{WorkPhase, WorkPlan};
use mnemosyne_engine::QualityGate;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// One scripted LLM turn.
pub enum ScriptedReply {
    /// Respond with a plain end-turn text message
    Text(String),

    /// Fail with a rate-limit error (counts as a breaker failure)
    RateLimited(String),
}

/// An LLM fake that replays a fixed script of replies in FIFO order.
///
/// Exhausting the script is an error so tests notice unexpected calls.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<ScriptedReply>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }

    pub async fn remaining(&self) -> usize {
        self.replies.lock().await.len()
    }
}

#[async_trait]
impl LlmPort for ScriptedLlm {
    async fn chat(
        &self,
        _system: Option<String>,
        _messages: Vec<ChatMessage>,
        _tools: Vec<ToolSpec>,
    ) -> Result<ChatResponse> {
        match self.replies.lock().await.pop_front() {
            Some(ScriptedReply::Text(text)) => Ok(ChatResponse {
                content: vec![ContentBlock::text(text)],
                stop_reason: StopReason::EndTurn,
                usage: TokenUsage {
                    input_tokens: 100,
                    output_tokens: 50,
                },
            }),
            Some(ScriptedReply::RateLimited(message)) => {
                Err(OrchestrationError::RateLimit(message))
            }
            None => Err(OrchestrationError::LlmApi(
                "scripted LLM exhausted: unexpected call".to_string(),
            )),
        }
    }
}

/// A work plan detailed enough to pass executor validation.
pub fn clear_plan(id: &str) -> WorkPlan {
    let mut plan = WorkPlan::new(
        id,
        "Build a REST login endpoint using axum because we need session auth; \
         must include only the password flow and all error cases",
        WorkPhase::Implementation,
    );
    plan.tech_stack = Some("Rust".to_string());
    plan.success_criteria = Some("Tests pass".to_string());
    plan
}

/// A review response passing every gate.
pub fn all_pass_review() -> String {
    QualityGate::all()
        .iter()
        .map(|gate| format!("{}: PASS", gate.as_str().replace('_', " ")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A review response failing exactly the anti-pattern gate.
pub fn fail_antipatterns_review() -> String {
    all_pass_review().replace("no antipatterns: PASS", "no antipatterns: FAIL")
}
