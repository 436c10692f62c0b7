//! LLM port: provider-agnostic chat + tool-use contract
//!
//! The wire contract follows the Anthropic messages shape: a request carries
//! `{model, max_tokens, system?, tools?, messages}` where message content is
//! a list of typed blocks, and a response carries content blocks, a stop
//! reason, and token usage. The engine's tool-use loop depends only on these
//! fields.

use crate::error::{OrchestrationError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A typed content block inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
        }
    }
}

/// One message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model requested tool execution; reply with matching tool results
    ToolUse,

    /// The model finished its turn
    EndTurn,

    /// Output was truncated at the token ceiling
    MaxTokens,

    /// Any other provider-specific reason
    #[serde(untagged)]
    Other(String),
}

/// Per-call token accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A tool declared to the model, with its typed input schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

impl ChatResponse {
    /// Concatenate all text blocks in the response.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool-use blocks in the response.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &Value)> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

/// Port to the external LLM service.
///
/// Implementations must fail with distinguishable errors for rate-limit,
/// timeout, auth, and transport problems so the circuit breaker and error
/// context can classify them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmPort: Send + Sync {
    async fn chat(
        &self,
        system: Option<String>,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolSpec>,
    ) -> Result<ChatResponse>;
}

/// Configuration for the Anthropic-backed client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Anthropic API key
    pub api_key: String,

    /// Model to use
    pub model: String,

    /// Max tokens for responses
    pub max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: crate::config::resolve_api_key().unwrap_or_default(),
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    stop_reason: StopReason,
    usage: TokenUsage,
}

/// HTTP client for the Anthropic messages API.
pub struct AnthropicClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl AnthropicClient {
    /// Create a new client with custom config.
    ///
    /// Empty API keys are allowed during construction to support startup;
    /// calls will fail until a valid key is provided.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self { config, client })
    }

    /// Create with default config (key from the environment).
    pub fn with_default() -> Result<Self> {
        Self::new(LlmConfig::default())
    }
}

#[async_trait]
impl LlmPort for AnthropicClient {
    async fn chat(
        &self,
        system: Option<String>,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolSpec>,
    ) -> Result<ChatResponse> {
        if self.config.api_key.is_empty() {
            return Err(OrchestrationError::Authentication(
                "ANTHROPIC_API_KEY not set".to_string(),
            ));
        }

        debug!("Calling Anthropic API ({} messages)", messages.len());

        let request = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system,
            tools,
            messages,
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OrchestrationError::Timeout(format!("LLM request timed out: {}", e))
                } else if e.is_connect() {
                    OrchestrationError::Network(format!("Network connection failed: {}", e))
                } else {
                    OrchestrationError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => OrchestrationError::Authentication(format!(
                    "Invalid or missing API key (status {}): {}",
                    status, error_text
                )),
                429 => OrchestrationError::RateLimit(format!(
                    "API rate limit exceeded: {}",
                    error_text
                )),
                500..=599 => OrchestrationError::Network(format!(
                    "LLM service unavailable (status {}): {}",
                    status, error_text
                )),
                _ => OrchestrationError::LlmApi(format!(
                    "API request failed with status {}: {}",
                    status, error_text
                )),
            });
        }

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| OrchestrationError::LlmApi(format!("Failed to parse response: {}", e)))?;

        Ok(ChatResponse {
            content: api_response.content,
            stop_reason: api_response.stop_reason,
            usage: api_response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_block_serialization() {
        let block = ContentBlock::ToolUse {
            id: "toolu_1".to_string(),
            name: "read_file".to_string(),
            input: serde_json::json!({"file_path": "/tmp/x"}),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["name"], "read_file");

        let result = ContentBlock::tool_result("toolu_1", "{\"success\":true}");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_stop_reason_parsing() {
        let reason: StopReason = serde_json::from_str("\"tool_use\"").unwrap();
        assert_eq!(reason, StopReason::ToolUse);

        let reason: StopReason = serde_json::from_str("\"end_turn\"").unwrap();
        assert_eq!(reason, StopReason::EndTurn);

        let reason: StopReason = serde_json::from_str("\"stop_sequence\"").unwrap();
        assert_eq!(reason, StopReason::Other("stop_sequence".to_string()));
    }

    #[test]
    fn test_response_text_concatenation() {
        let response = ChatResponse {
            content: vec![
                ContentBlock::text("Hello "),
                ContentBlock::ToolUse {
                    id: "t".into(),
                    name: "read_file".into(),
                    input: Value::Null,
                },
                ContentBlock::text("world"),
            ],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        };

        assert_eq!(response.text(), "Hello world");
        assert_eq!(response.tool_uses().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_key_fails_fast() {
        let client = AnthropicClient::new(LlmConfig {
            api_key: String::new(),
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 16,
        })
        .unwrap();

        let err = client
            .chat(None, vec![ChatMessage::user_text("hi")], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Authentication(_)));
    }
}
