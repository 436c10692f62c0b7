//! Error types for the orchestration engine
//!
//! This module provides comprehensive error handling using thiserror for
//! structured error definitions and anyhow for error propagation.
//!
//! Circuit-breaker rejections and review failures are deliberately *not*
//! errors: they are expressed as data in `WorkResult` and `ReviewResult`.

use thiserror::Error;

/// Main error type for orchestration operations
#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// Work item, work plan, or work graph failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Agent or session is in the wrong state for the requested operation
    #[error("State error: {0}")]
    State(String),

    /// LLM API rejected the request due to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// LLM or subprocess call exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid or missing API credential
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Network-level failure reaching an external service
    #[error("Network error: {0}")]
    Network(String),

    /// LLM API request failed for a non-transient reason
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// Tool execution failed (filesystem miss, non-zero exit, ...)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Scheduler cannot make progress on the work graph
    #[error("Deadlock detected: {} tasks blocked: {blocked:?}", blocked.len())]
    Deadlock { blocked: Vec<String> },

    /// One or more graph tasks failed; rollback was performed
    #[error("Execution failed: {failed} tasks failed")]
    ExecutionFailed { failed: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl OrchestrationError {
    /// Whether this error should count as a circuit-breaker failure.
    ///
    /// Transient LLM errors (rate limit, timeout, network) and outright API
    /// failures trip the breaker; validation and state errors do not.
    pub fn is_llm_failure(&self) -> bool {
        matches!(
            self,
            OrchestrationError::RateLimit(_)
                | OrchestrationError::Timeout(_)
                | OrchestrationError::Network(_)
                | OrchestrationError::Authentication(_)
                | OrchestrationError::LlmApi(_)
                | OrchestrationError::Http(_)
        )
    }
}

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Convert anyhow::Error to OrchestrationError
impl From<anyhow::Error> for OrchestrationError {
    fn from(err: anyhow::Error) -> Self {
        OrchestrationError::Other(err.to_string())
    }
}
