//! Anthropic Messages API client.

use super::{
    ChatMessage, ChatRole, Completion, KeyRotator, LlmHttpConfig, LlmProvider, TokenUsage,
    ToolCallRequest, TransportState,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Anthropic chat client.
pub struct AnthropicProvider {
    keys: KeyRotator,
    endpoint: String,
    model: String,
    max_tokens: u32,
    transport: TransportState,
}

impl AnthropicProvider {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.anthropic.com/v1";

    /// Default output token cap.
    pub const DEFAULT_MAX_TOKENS: u32 = 2048;

    /// Creates a new client for the given model.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        let keys = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .map(|k| vec![k])
            .unwrap_or_default();
        Self {
            keys: KeyRotator::new(keys),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: model.into(),
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            transport: TransportState::new(LlmHttpConfig::default()),
        }
    }

    /// Sets the API keys used for rotation.
    #[must_use]
    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        if !keys.is_empty() {
            self.keys = KeyRotator::new(keys);
        }
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the output token cap.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets HTTP client timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.transport = TransportState::new(config);
        self
    }

    /// Checks that a key looks like an Anthropic key before sending it.
    ///
    /// Valid keys start with `sk-ant-`, are at least 40 characters, and
    /// contain only alphanumerics, hyphens, and underscores.
    fn is_valid_api_key_format(key: &str) -> bool {
        const MIN_KEY_LENGTH: usize = 40;
        const PREFIX: &str = "sk-ant-";

        if !key.starts_with(PREFIX) || key.len() < MIN_KEY_LENGTH {
            return false;
        }
        key.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    fn current_key(&self) -> Result<String> {
        let key = self
            .keys
            .acquire()
            .ok_or_else(|| Error::Unauthorized("ANTHROPIC_API_KEY not set".to_string()))?;
        if !Self::is_valid_api_key_format(key) {
            return Err(Error::Unauthorized(
                "invalid API key format: expected 'sk-ant-' prefix".to_string(),
            ));
        }
        Ok(key.to_string())
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        let api_key = self.current_key()?;

        tracing::info!(provider = "anthropic", model = %self.model, "Making LLM request");

        // The Messages API takes system text out of band.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<Message> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| Message {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            messages: turns,
        };

        let response = self
            .transport
            .client()
            .post(format!("{}/messages", self.endpoint))
            .header("x-api-key", &api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connect"
                } else if e.is_request() {
                    "request"
                } else {
                    "unknown"
                };
                let cause = format!("{error_kind} error: {e}");
                self.transport.observe_error(&cause);
                tracing::error!(
                    provider = "anthropic",
                    model = %self.model,
                    error = %e,
                    error_kind = error_kind,
                    "LLM request failed"
                );
                Error::OperationFailed {
                    operation: "anthropic_request".to_string(),
                    cause,
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                provider = "anthropic",
                model = %self.model,
                status = %status,
                body = %body,
                "LLM API returned error status"
            );
            return Err(match status.as_u16() {
                429 => {
                    self.keys.advance();
                    Error::RateLimited {
                        provider: "anthropic".to_string(),
                    }
                },
                401 | 403 => {
                    self.keys.advance();
                    Error::Unauthorized(format!("API returned status {status}"))
                },
                _ => Error::OperationFailed {
                    operation: "anthropic_request".to_string(),
                    cause: format!("API returned status {status}: {body}"),
                },
            });
        }

        let response: MessagesResponse = response.json().await.map_err(|e| {
            tracing::error!(
                provider = "anthropic",
                model = %self.model,
                error = %e,
                "Failed to parse LLM response"
            );
            Error::ParseFailed {
                context: "anthropic_response".to_string(),
                cause: e.to_string(),
            }
        })?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in response.content {
            match block {
                ContentBlock::Text { text: t } => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&t);
                },
                ContentBlock::ToolUse { name, input } => {
                    tool_calls.push(ToolCallRequest {
                        name,
                        arguments: input,
                    });
                },
                ContentBlock::Other => {},
            }
        }

        if text.is_empty() && tool_calls.is_empty() {
            return Err(Error::ParseFailed {
                context: "anthropic_response".to_string(),
                cause: "no text content in response".to_string(),
            });
        }

        Ok(Completion {
            text,
            tool_calls,
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        })
    }
}

/// Request to the Messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message<'a>>,
}

/// A message in the conversation.
#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Response from the Messages API.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = AnthropicProvider::new("claude-3-5-haiku-latest");
        assert_eq!(client.name(), "anthropic");
        assert_eq!(client.model, "claude-3-5-haiku-latest");
        assert_eq!(client.endpoint, AnthropicProvider::DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_client_configuration() {
        let client = AnthropicProvider::new("claude-3-5-haiku-latest")
            .with_keys(vec!["k1".to_string(), "k2".to_string()])
            .with_endpoint("https://custom.endpoint")
            .with_max_tokens(512);
        assert_eq!(client.keys.len(), 2);
        assert_eq!(client.endpoint, "https://custom.endpoint");
        assert_eq!(client.max_tokens, 512);
    }

    #[test]
    fn test_is_valid_api_key_format() {
        assert!(AnthropicProvider::is_valid_api_key_format(
            "sk-ant-REDACTED"
        ));
        assert!(!AnthropicProvider::is_valid_api_key_format(""));
        assert!(!AnthropicProvider::is_valid_api_key_format("sk-ant-"));
        assert!(!AnthropicProvider::is_valid_api_key_format("invalid"));
        assert!(!AnthropicProvider::is_valid_api_key_format(
            "sk-ant-REDACTED!@#$"
        ));
    }

    #[test]
    fn test_current_key_rejects_bad_format() {
        let client = AnthropicProvider::new("m").with_keys(vec!["not-a-key".to_string()]);
        assert!(matches!(
            client.current_key(),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_response_decodes_tool_use() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "checking"},
                {"type": "tool_use", "id": "t1", "name": "search", "input": {"q": "hack"}}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;
        let response: MessagesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.content.len(), 2);
        assert!(matches!(&response.content[1], ContentBlock::ToolUse { name, .. } if name == "search"));
    }

    #[test]
    fn test_response_tolerates_unknown_block() {
        let json = r#"{"content": [{"type": "thinking", "thinking": "hmm"}]}"#;
        let response: MessagesResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(response.content[0], ContentBlock::Other));
    }
}
