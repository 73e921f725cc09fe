//! LLM client abstraction.
//!
//! Provides a unified async interface over hosted chat APIs and local CLI
//! agent engines, with a resilience wrapper handling retries, API key
//! rotation, and transport degradation.

mod anthropic;
mod cli_agent;
mod openai;
mod resilience;

pub use anthropic::AnthropicProvider;
pub use cli_agent::{CliAgentConfig, CliAgentProvider};
pub use openai::OpenAiProvider;
pub use resilience::{KeyRotator, ResilientProvider, RetryConfig, TransportState};

use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    /// System instruction.
    System,
    /// User turn.
    User,
    /// Assistant turn.
    Assistant,
}

impl ChatRole {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a chat conversation.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Message role.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A tool call requested by the model in its response.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    /// Tool name.
    pub name: String,
    /// Tool arguments as JSON.
    pub arguments: Value,
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    /// Input tokens consumed.
    pub input_tokens: u64,
    /// Output tokens produced.
    pub output_tokens: u64,
}

/// A completion returned by an LLM provider.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// Concatenated text output.
    pub text: String,
    /// Native tool calls, when the provider returned any.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Token usage, when the provider reported it.
    pub usage: Option<TokenUsage>,
}

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given conversation.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion>;
}

/// Provider selector for the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Anthropic Messages API.
    Anthropic,
    /// `OpenAI` chat completions API.
    OpenAi,
    /// `DeepSeek` (OpenAI-compatible) chat completions API.
    DeepSeek,
    /// Local CLI agent subprocess.
    CliAgent,
}

impl ProviderKind {
    /// Parses a provider tag.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            "deepseek" => Some(Self::DeepSeek),
            "cli" | "cli_agent" | "agent" => Some(Self::CliAgent),
            _ => None,
        }
    }

    /// Canonical tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::CliAgent => "cli_agent",
        }
    }
}

/// Settings for one provider instance.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Which provider implementation to build.
    pub kind: ProviderKind,
    /// Model identifier.
    pub model: String,
    /// API keys, rotated on rate limit and auth errors.
    pub api_keys: Vec<String>,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Executable for the CLI agent engine.
    pub command: Option<String>,
    /// Extra arguments for the CLI agent engine.
    pub args: Vec<String>,
}

/// HTTP client configuration for LLM requests.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `MARKETSIFT_LLM_TIMEOUT_MS` | u64 | `30000` | Request timeout (0 to disable) |
/// | `MARKETSIFT_LLM_CONNECT_TIMEOUT_MS` | u64 | `3000` | Connect timeout (0 to disable) |
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Loads HTTP configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("MARKETSIFT_LLM_TIMEOUT_MS") {
            if let Ok(timeout_ms) = v.parse() {
                config.timeout_ms = timeout_ms;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_LLM_CONNECT_TIMEOUT_MS") {
            if let Ok(connect_timeout_ms) = v.parse() {
                config.connect_timeout_ms = connect_timeout_ms;
            }
        }
        config
    }
}

/// Builds an HTTP client for LLM requests with configured timeouts.
///
/// `http1_only` builds the fallback client used after an HTTP/2 transport
/// failure has been observed.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig, http1_only: bool) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }
    if http1_only {
        builder = builder.http1_only();
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build LLM HTTP client: {err}");
        reqwest::Client::new()
    })
}

/// Extracts JSON from an LLM response that may be fenced or surrounded by
/// prose.
#[must_use]
pub fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();

    // Handle ```json ... ``` blocks
    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Handle ``` ... ``` blocks (without json marker)
    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        let after_marker = &trimmed[content_start..];
        let json_start = after_marker
            .find('{')
            .map_or(content_start, |pos| content_start + pos);
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Handle raw JSON (find first { to last })
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            return &trimmed[start..=end];
        }
    }

    trimmed
}

/// Builds a provider from settings and wraps it with the retry layer.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an incomplete configuration, such as
/// a CLI agent with no command.
pub fn create_provider(
    settings: &ProviderSettings,
    http: LlmHttpConfig,
    retry: RetryConfig,
) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match settings.kind {
        ProviderKind::Anthropic => {
            let mut client = AnthropicProvider::new(&settings.model)
                .with_keys(settings.api_keys.clone())
                .with_http_config(http);
            if let Some(base) = &settings.base_url {
                client = client.with_endpoint(base.clone());
            }
            Arc::new(client)
        },
        ProviderKind::OpenAi | ProviderKind::DeepSeek => {
            let endpoint = settings.base_url.clone().unwrap_or_else(|| {
                if settings.kind == ProviderKind::DeepSeek {
                    OpenAiProvider::DEEPSEEK_ENDPOINT.to_string()
                } else {
                    OpenAiProvider::DEFAULT_ENDPOINT.to_string()
                }
            });
            Arc::new(
                OpenAiProvider::new(settings.kind.as_str(), &settings.model)
                    .with_keys(settings.api_keys.clone())
                    .with_endpoint(endpoint)
                    .with_http_config(http),
            )
        },
        ProviderKind::CliAgent => {
            let command = settings
                .command
                .clone()
                .ok_or_else(|| Error::InvalidInput("CLI agent requires a command".to_string()))?;
            let config = CliAgentConfig {
                command,
                args: settings.args.clone(),
                model: Some(settings.model.clone()),
                timeout: Duration::from_millis(http.timeout_ms.max(1)),
                ..CliAgentConfig::default()
            };
            Arc::new(CliAgentProvider::new(config))
        },
    };
    Ok(Arc::new(ResilientProvider::new(provider, retry)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(
            ProviderKind::parse("anthropic"),
            Some(ProviderKind::Anthropic)
        );
        assert_eq!(ProviderKind::parse("Claude"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::parse("deepseek"), Some(ProviderKind::DeepSeek));
        assert_eq!(
            ProviderKind::parse("cli_agent"),
            Some(ProviderKind::CliAgent)
        );
        assert_eq!(ProviderKind::parse("mystery"), None);
    }

    #[test]
    fn test_extract_json_fenced() {
        let response = "Here you go:\n```json\n{\"action\": \"buy\"}\n```\nDone.";
        assert_eq!(extract_json(response), r#"{"action": "buy"}"#);
    }

    #[test]
    fn test_extract_json_bare_fence() {
        let response = "```\n{\"action\": \"sell\"}\n```";
        assert_eq!(extract_json(response), r#"{"action": "sell"}"#);
    }

    #[test]
    fn test_extract_json_surrounded_by_prose() {
        let response = "The result is {\"confidence\": 0.8} as requested.";
        assert_eq!(extract_json(response), r#"{"confidence": 0.8}"#);
    }

    #[test]
    fn test_extract_json_plain() {
        let response = r#"{"status": "skip"}"#;
        assert_eq!(extract_json(response), response);
    }

    #[test]
    fn test_create_cli_agent_requires_command() {
        let settings = ProviderSettings {
            kind: ProviderKind::CliAgent,
            model: "sonnet".to_string(),
            api_keys: vec![],
            base_url: None,
            command: None,
            args: vec![],
        };
        let result = create_provider(&settings, LlmHttpConfig::default(), RetryConfig::default());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_chat_message_ctors() {
        assert_eq!(ChatMessage::system("a").role, ChatRole::System);
        assert_eq!(ChatMessage::user("b").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("c").role, ChatRole::Assistant);
    }
}
