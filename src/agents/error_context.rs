//! Enriched error context for agent failures
//!
//! Wraps port errors with the work item, agent state, environment
//! diagnostics, and a curated list of troubleshooting hints and recovery
//! suggestions keyed off substring matches in the error text. The full
//! context is logged at debug; callers receive a compressed form with at
//! most three hints and two recoveries.

use crate::config::API_KEY_VAR;
use crate::types::WorkPhase;

/// Structured error context for production debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub error_kind: String,
    pub error_message: String,
    pub work_item_id: Option<String>,
    pub work_item_phase: Option<WorkPhase>,
    pub work_item_description: Option<String>,
    pub agent_id: Option<String>,
    pub agent_state: Option<String>,
    pub session_active: Option<bool>,
    pub troubleshooting_hints: Vec<String>,
    pub recovery_suggestions: Vec<String>,
    pub environment_info: Vec<(String, String)>,
}

impl ErrorContext {
    /// Build context for a work item execution failure.
    pub fn for_work_item(
        work_item_id: &str,
        phase: WorkPhase,
        description: &str,
        agent_id: &str,
        agent_state: &str,
        session_active: bool,
        error_kind: &str,
        error_message: &str,
    ) -> Self {
        let mut ctx = Self {
            error_kind: error_kind.to_string(),
            error_message: error_message.to_string(),
            work_item_id: Some(work_item_id.to_string()),
            work_item_phase: Some(phase),
            work_item_description: Some(description.chars().take(100).collect()),
            agent_id: Some(agent_id.to_string()),
            agent_state: Some(agent_state.to_string()),
            session_active: Some(session_active),
            troubleshooting_hints: Vec::new(),
            recovery_suggestions: Vec::new(),
            environment_info: environment_info(),
        };

        ctx.troubleshooting_hints.push(format!(
            "Work item failed during {} phase",
            phase.as_str()
        ));
        ctx.troubleshooting_hints.push(format!(
            "Agent state: {}, Session: {}",
            agent_state,
            if session_active { "active" } else { "inactive" }
        ));

        ctx.add_phase_hints(phase);
        ctx.add_error_hints();

        if !session_active {
            ctx.troubleshooting_hints
                .push("Agent session is not active".to_string());
            ctx.recovery_suggestions
                .push("Agent will attempt to restart the session automatically".to_string());
        }

        ctx
    }

    fn add_phase_hints(&mut self, phase: WorkPhase) {
        match phase {
            WorkPhase::Planning => {
                self.troubleshooting_hints
                    .push("Check if requirements are clear and complete".to_string());
                self.recovery_suggestions
                    .push("Review the work item description for ambiguities".to_string());
            }
            WorkPhase::Implementation => {
                self.troubleshooting_hints
                    .push("Implementation may have encountered code errors".to_string());
                self.recovery_suggestions
                    .push("Check logs for compilation or runtime errors".to_string());
            }
            WorkPhase::Review => {
                self.troubleshooting_hints
                    .push("Quality gates may not be satisfied".to_string());
                self.recovery_suggestions
                    .push("Address failing gates before retrying".to_string());
            }
            _ => {}
        }
    }

    /// Substring-keyed hints covering the common failure families.
    fn add_error_hints(&mut self) {
        let message = self.error_message.to_lowercase();

        if message.contains("api") || message.contains("key") {
            self.troubleshooting_hints
                .push("API key may be missing or invalid".to_string());
            self.recovery_suggestions.push(format!(
                "Set the credential: export {}='sk-ant-...'",
                API_KEY_VAR
            ));
        }

        if message.contains("module") || message.contains("import") {
            self.troubleshooting_hints
                .push("A required component may be missing from the installation".to_string());
            self.recovery_suggestions
                .push("Reinstall or rebuild the agent binary".to_string());
        }

        if message.contains("connection") || message.contains("network") {
            self.troubleshooting_hints
                .push("Network connectivity issue".to_string());
            self.recovery_suggestions
                .push("Verify network access: curl https://api.anthropic.com".to_string());
        }

        if message.contains("timeout") {
            self.troubleshooting_hints
                .push("Operation timed out (LLM API or network issue)".to_string());
            self.recovery_suggestions
                .push("Retry with a simpler or shorter work item".to_string());
        }

        if message.contains("rate limit") {
            self.troubleshooting_hints
                .push("API rate limit exceeded".to_string());
            self.recovery_suggestions
                .push("Wait 60 seconds before retrying".to_string());
        }
    }

    /// Full multi-line form for debug logging.
    pub fn format_full(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("{}: {}", self.error_kind, self.error_message));

        if let Some(ref id) = self.work_item_id {
            lines.push("Work Item:".to_string());
            lines.push(format!("  ID: {}", id));
            if let Some(phase) = self.work_item_phase {
                lines.push(format!("  Phase: {}", phase));
            }
            if let Some(ref desc) = self.work_item_description {
                lines.push(format!("  Description: {}", desc));
            }
        }

        if let Some(ref agent) = self.agent_id {
            lines.push("Agent:".to_string());
            lines.push(format!("  ID: {}", agent));
            if let Some(ref state) = self.agent_state {
                lines.push(format!("  State: {}", state));
            }
            if let Some(active) = self.session_active {
                lines.push(format!("  Session Active: {}", active));
            }
        }

        if !self.environment_info.is_empty() {
            lines.push("Environment:".to_string());
            for (key, value) in &self.environment_info {
                lines.push(format!("  {}: {}", key, value));
            }
        }

        if !self.troubleshooting_hints.is_empty() {
            lines.push("Troubleshooting:".to_string());
            for hint in &self.troubleshooting_hints {
                lines.push(format!("  - {}", hint));
            }
        }

        if !self.recovery_suggestions.is_empty() {
            lines.push("Recovery:".to_string());
            for suggestion in &self.recovery_suggestions {
                lines.push(format!("  -> {}", suggestion));
            }
        }

        lines.join("\n")
    }

    /// Compressed form for returning to callers: at most three hints and two
    /// recovery suggestions.
    pub fn format_compressed(&self) -> String {
        let mut lines = vec![format!("{}: {}", self.error_kind, self.error_message)];

        if let (Some(id), Some(phase)) = (&self.work_item_id, self.work_item_phase) {
            lines.push(format!("Work Item: {} ({})", id, phase));
        }
        if let Some(ref agent) = self.agent_id {
            lines.push(format!("Agent: {}", agent));
        }

        if !self.troubleshooting_hints.is_empty() {
            lines.push("Troubleshooting:".to_string());
            for hint in self.troubleshooting_hints.iter().take(3) {
                lines.push(format!("  - {}", hint));
            }
        }

        if !self.recovery_suggestions.is_empty() {
            lines.push("Recovery:".to_string());
            for suggestion in self.recovery_suggestions.iter().take(2) {
                lines.push(format!("  -> {}", suggestion));
            }
        }

        lines.join("\n")
    }
}

/// Environment diagnostics attached to error contexts.
fn environment_info() -> Vec<(String, String)> {
    let mut info = vec![(
        "Platform".to_string(),
        std::env::consts::OS.to_string(),
    )];

    match std::env::var(API_KEY_VAR) {
        Ok(key) if key.len() > 11 => {
            info.push((
                "API Key".to_string(),
                format!("Configured ({}...{})", &key[..7], &key[key.len() - 4..]),
            ));
        }
        Ok(_) => info.push(("API Key".to_string(), "Configured".to_string())),
        Err(_) => info.push(("API Key".to_string(), "NOT CONFIGURED".to_string())),
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_for(error_message: &str) -> ErrorContext {
        ErrorContext::for_work_item(
            "item-1",
            WorkPhase::Implementation,
            "Build the feature",
            "executor",
            "executing",
            true,
            "LlmApi",
            error_message,
        )
    }

    #[test]
    fn test_rate_limit_hints() {
        let ctx = context_for("API rate limit exceeded: too many requests");
        assert!(ctx
            .troubleshooting_hints
            .iter()
            .any(|h| h.contains("rate limit")));
        assert!(ctx
            .recovery_suggestions
            .iter()
            .any(|r| r.contains("Wait 60 seconds")));
    }

    #[test]
    fn test_timeout_hints() {
        let ctx = context_for("request timeout after 30s");
        assert!(ctx
            .troubleshooting_hints
            .iter()
            .any(|h| h.contains("timed out")));
    }

    #[test]
    fn test_compressed_form_limits() {
        let mut ctx = context_for("network connection refused by api key gateway timeout");
        for i in 0..10 {
            ctx.troubleshooting_hints.push(format!("extra hint {}", i));
            ctx.recovery_suggestions.push(format!("extra recovery {}", i));
        }

        let compressed = ctx.format_compressed();
        let hint_count = compressed.lines().filter(|l| l.starts_with("  - ")).count();
        let recovery_count = compressed.lines().filter(|l| l.starts_with("  -> ")).count();
        assert!(hint_count <= 3);
        assert!(recovery_count <= 2);
        assert!(compressed.contains("Work Item: item-1 (implementation)"));
    }

    #[test]
    fn test_full_form_has_sections() {
        let ctx = context_for("something failed");
        let full = ctx.format_full();
        assert!(full.contains("Work Item:"));
        assert!(full.contains("Agent:"));
        assert!(full.contains("Environment:"));
        assert!(full.contains("Troubleshooting:"));
    }

    #[test]
    fn test_inactive_session_adds_restart_hint() {
        let ctx = ErrorContext::for_work_item(
            "item-1",
            WorkPhase::Planning,
            "desc",
            "executor",
            "idle",
            false,
            "State",
            "session not active",
        );
        assert!(ctx
            .recovery_suggestions
            .iter()
            .any(|r| r.contains("restart the session")));
    }
}
