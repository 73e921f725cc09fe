//! OpenAI-compatible chat completions client.
//!
//! Also serves DeepSeek and other gateways that speak the same wire
//! contract; only the endpoint and provider tag differ.

use super::{
    ChatMessage, Completion, KeyRotator, LlmHttpConfig, LlmProvider, TokenUsage, ToolCallRequest,
    TransportState,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OpenAI-compatible chat client.
pub struct OpenAiProvider {
    name: &'static str,
    keys: KeyRotator,
    endpoint: String,
    model: String,
    transport: TransportState,
}

impl OpenAiProvider {
    /// Default `OpenAI` endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// Default `DeepSeek` endpoint.
    pub const DEEPSEEK_ENDPOINT: &'static str = "https://api.deepseek.com/v1";

    /// Creates a new client for the given provider tag and model.
    ///
    /// `name` must be a static tag ("openai", "deepseek") so it can label
    /// metrics without allocation.
    #[must_use]
    pub fn new(name: &'static str, model: impl Into<String>) -> Self {
        let keys = std::env::var("OPENAI_API_KEY")
            .ok()
            .map(|k| vec![k])
            .unwrap_or_default();
        Self {
            name,
            keys: KeyRotator::new(keys),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: model.into(),
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

    /// Sets HTTP client timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.transport = TransportState::new(config);
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        let api_key = self
            .keys
            .acquire()
            .ok_or_else(|| Error::Unauthorized("no API key configured".to_string()))?
            .to_string();

        tracing::info!(provider = self.name, model = %self.model, "Making LLM request");

        let request = ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| Message {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
        };

        let response = self
            .transport
            .client()
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connect"
                } else {
                    "request"
                };
                let cause = format!("{error_kind} error: {e}");
                self.transport.observe_error(&cause);
                tracing::error!(
                    provider = self.name,
                    model = %self.model,
                    error = %e,
                    error_kind = error_kind,
                    "LLM request failed"
                );
                Error::OperationFailed {
                    operation: "chat_completions_request".to_string(),
                    cause,
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                provider = self.name,
                model = %self.model,
                status = %status,
                body = %body,
                "LLM API returned error status"
            );
            return Err(match status.as_u16() {
                429 => {
                    self.keys.advance();
                    Error::RateLimited {
                        provider: self.name.to_string(),
                    }
                },
                401 | 403 => {
                    self.keys.advance();
                    Error::Unauthorized(format!("API returned status {status}"))
                },
                _ => Error::OperationFailed {
                    operation: "chat_completions_request".to_string(),
                    cause: format!("API returned status {status}: {body}"),
                },
            });
        }

        let response: ChatResponse = response.json().await.map_err(|e| Error::ParseFailed {
            context: "chat_completions_response".to_string(),
            cause: e.to_string(),
        })?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ParseFailed {
                context: "chat_completions_response".to_string(),
                cause: "no choices in response".to_string(),
            })?;

        let mut tool_calls = Vec::new();
        for call in choice.message.tool_calls {
            let arguments = serde_json::from_str::<Value>(&call.function.arguments)
                .unwrap_or(Value::Null);
            tool_calls.push(ToolCallRequest {
                name: call.function.name,
                arguments,
            });
        }

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OpenAiProvider::new("deepseek", "deepseek-chat")
            .with_endpoint(OpenAiProvider::DEEPSEEK_ENDPOINT);
        assert_eq!(client.name(), "deepseek");
        assert_eq!(client.endpoint, OpenAiProvider::DEEPSEEK_ENDPOINT);
    }

    #[test]
    fn test_response_decodes_content() {
        let json = r#"{
            "choices": [{"message": {"content": "hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some("hello")
        );
        assert_eq!(response.usage.unwrap().prompt_tokens, 12);
    }

    #[test]
    fn test_response_decodes_tool_calls() {
        let json = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": {"name": "price", "arguments": "{\"asset\": \"BTC\"}"}
                    }]
                }
            }]
        }"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        let call = &response.choices[0].message.tool_calls[0];
        assert_eq!(call.function.name, "price");
    }
}
