//! LLM resilience: retries, key rotation, and transport degradation.

use super::{ChatMessage, Completion, LlmHttpConfig, LlmProvider, build_http_client};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Retry configuration for LLM calls.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `MARKETSIFT_LLM_MAX_RETRIES` | u32 | `2` | Retries after the first attempt |
/// | `MARKETSIFT_LLM_RETRY_BACKOFF_MS` | u64 | `500` | Initial backoff, doubled per retry |
/// | `MARKETSIFT_LLM_RETRY_MAX_BACKOFF_MS` | u64 | `8000` | Backoff ceiling |
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum retries after the first attempt.
    pub max_retries: u32,
    /// Initial backoff in milliseconds, doubled per retry.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryConfig {
    /// Loads retry configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("MARKETSIFT_LLM_MAX_RETRIES") {
            if let Ok(parsed) = v.parse() {
                config.max_retries = parsed;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_LLM_RETRY_BACKOFF_MS") {
            if let Ok(parsed) = v.parse() {
                config.initial_backoff_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_LLM_RETRY_MAX_BACKOFF_MS") {
            if let Ok(parsed) = v.parse() {
                config.max_backoff_ms = parsed;
            }
        }
        config
    }

    /// Backoff for the given zero-based retry index.
    #[must_use]
    pub fn backoff_for(&self, retry_index: u32) -> Duration {
        let factor = 1u64 << retry_index.min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Round-robin API key rotation.
///
/// Each acquisition takes the next key, so successive requests spread load
/// across every configured key. Providers additionally advance the cursor
/// when a key hits a rate limit or an auth failure.
#[derive(Debug)]
pub struct KeyRotator {
    keys: Vec<String>,
    cursor: Mutex<usize>,
}

impl KeyRotator {
    /// Creates a rotator over the given keys.
    #[must_use]
    pub const fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            cursor: Mutex::new(0),
        }
    }

    /// Returns true when no keys are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of configured keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Takes the key for the next request, advancing the round-robin
    /// cursor.
    #[must_use]
    pub fn acquire(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let mut cursor = self
            .cursor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let index = *cursor % self.keys.len();
        *cursor = (index + 1) % self.keys.len();
        Some(&self.keys[index])
    }

    /// Advances to the next key.
    pub fn advance(&self) {
        if self.keys.len() < 2 {
            return;
        }
        let mut cursor = self
            .cursor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *cursor = (*cursor + 1) % self.keys.len();
        tracing::info!(key_index = *cursor, "rotated to next API key");
        metrics::counter!("llm_key_rotations_total").increment(1);
    }
}

/// Transport degradation state shared by one provider's requests.
///
/// Some gateways intermittently break HTTP/2 streams mid-response. After
/// the first such failure this permanently routes the provider's traffic
/// through an HTTP/1.1-only client.
pub struct TransportState {
    degraded: AtomicBool,
    default_client: reqwest::Client,
    http1_client: reqwest::Client,
}

impl TransportState {
    /// Builds both clients from the HTTP configuration.
    #[must_use]
    pub fn new(config: LlmHttpConfig) -> Self {
        Self {
            degraded: AtomicBool::new(false),
            default_client: build_http_client(config, false),
            http1_client: build_http_client(config, true),
        }
    }

    /// The client to use for the next request.
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        if self.degraded.load(Ordering::Relaxed) {
            &self.http1_client
        } else {
            &self.default_client
        }
    }

    /// Whether the HTTP/1.1 fallback is active.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Inspects a transport error and downgrades when it matches a stream
    /// or handshake failure signature.
    pub fn observe_error(&self, cause: &str) {
        if self.degraded.load(Ordering::Relaxed) {
            return;
        }
        let lower = cause.to_lowercase();
        let handshake_failure = lower.contains("http2")
            || lower.contains("h2 protocol")
            || lower.contains("handshake")
            || lower.contains("stream closed")
            || lower.contains("connection reset")
            || lower.contains("broken pipe");
        if handshake_failure {
            self.degraded.store(true, Ordering::Relaxed);
            tracing::warn!(cause = %cause, "transport degraded, switching to HTTP/1.1");
            metrics::counter!("llm_transport_downgrades_total").increment(1);
        }
    }
}

/// Retry wrapper around an LLM provider.
///
/// Retries transient failures with exponential backoff. Exhaustion errors
/// (open circuit, spent quota) and permanent failures are returned
/// immediately.
pub struct ResilientProvider {
    inner: Arc<dyn LlmProvider>,
    config: RetryConfig,
}

impl ResilientProvider {
    /// Wraps a provider with the retry policy.
    #[must_use]
    pub fn new(inner: Arc<dyn LlmProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmProvider for ResilientProvider {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        let provider = self.inner.name();
        let max_attempts = self.config.max_retries + 1;
        let mut last_error = None;

        for attempt in 0..max_attempts {
            let started = Instant::now();
            match self.inner.complete(messages).await {
                Ok(completion) => {
                    metrics::counter!(
                        "llm_requests_total",
                        "provider" => provider,
                        "status" => "success"
                    )
                    .increment(1);
                    metrics::histogram!(
                        "llm_request_duration_ms",
                        "provider" => provider
                    )
                    .record(started.elapsed().as_secs_f64() * 1000.0);
                    return Ok(completion);
                },
                Err(err) => {
                    let status = if err.is_transient() { "transient" } else { "error" };
                    metrics::counter!(
                        "llm_requests_total",
                        "provider" => provider,
                        "status" => status
                    )
                    .increment(1);

                    if err.is_exhaustion() || !err.is_transient() {
                        return Err(err);
                    }
                    if attempt + 1 < max_attempts {
                        let backoff = self.config.backoff_for(attempt);
                        tracing::warn!(
                            provider = provider,
                            attempt = attempt + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %err,
                            "retrying LLM call"
                        );
                        metrics::counter!("llm_retries_total", "provider" => provider)
                            .increment(1);
                        tokio::time::sleep(backoff).await;
                    }
                    last_error = Some(err);
                },
            }
        }

        Err(last_error.unwrap_or_else(|| Error::OperationFailed {
            operation: "llm_complete".to_string(),
            cause: "exhausted retries".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FlakyProvider {
        calls: AtomicU32,
        fail_first: u32,
        error: fn() -> Error,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<Completion> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err((self.error)())
            } else {
                Ok(Completion {
                    text: "ok".to_string(),
                    ..Completion::default()
                })
            }
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let inner = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 2,
            error: || Error::Timeout {
                operation: "complete".to_string(),
                elapsed_ms: 100,
            },
        });
        let provider = ResilientProvider::new(inner.clone(), fast_retry());
        let completion = provider.complete(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(completion.text, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let inner = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 10,
            error: || Error::Unauthorized("bad key".to_string()),
        });
        let provider = ResilientProvider::new(inner.clone(), fast_retry());
        let result = provider.complete(&[ChatMessage::user("hi")]).await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_does_not_retry_open_circuit() {
        let inner = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 10,
            error: || Error::CircuitOpen {
                provider: "flaky".to_string(),
                retry_after_secs: 60,
            },
        });
        let provider = ResilientProvider::new(inner.clone(), fast_retry());
        let result = provider.complete(&[ChatMessage::user("hi")]).await;
        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_retries() {
        let inner = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 10,
            error: || Error::RateLimited {
                provider: "flaky".to_string(),
            },
        });
        let provider = ResilientProvider::new(inner.clone(), fast_retry());
        let result = provider.complete(&[ChatMessage::user("hi")]).await;
        assert!(matches!(result, Err(Error::RateLimited { .. })));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 1500,
        };
        assert_eq!(config.backoff_for(0), Duration::from_millis(500));
        assert_eq!(config.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(config.backoff_for(2), Duration::from_millis(1500));
        assert_eq!(config.backoff_for(3), Duration::from_millis(1500));
    }

    #[test]
    fn test_successive_acquisitions_round_robin() {
        let rotator = KeyRotator::new(vec!["key-a".to_string(), "key-b".to_string()]);
        assert_eq!(rotator.acquire(), Some("key-a"));
        assert_eq!(rotator.acquire(), Some("key-b"));
        assert_eq!(rotator.acquire(), Some("key-a"));
    }

    #[test]
    fn test_key_rotator_failure_advance_skips_key() {
        let rotator = KeyRotator::new(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(rotator.acquire(), Some("a"));
        // A rate-limited key pushes the cursor past the next in line.
        rotator.advance();
        assert_eq!(rotator.acquire(), Some("c"));
    }

    #[test]
    fn test_key_rotator_single_key_stays() {
        let rotator = KeyRotator::new(vec!["only".to_string()]);
        rotator.advance();
        assert_eq!(rotator.acquire(), Some("only"));
        assert_eq!(rotator.acquire(), Some("only"));
    }

    #[test]
    fn test_key_rotator_empty() {
        let rotator = KeyRotator::new(vec![]);
        assert!(rotator.acquire().is_none());
        rotator.advance();
    }

    #[test]
    fn test_transport_degrades_on_stream_failure() {
        let transport = TransportState::new(LlmHttpConfig::default());
        assert!(!transport.is_degraded());
        transport.observe_error("request error: connection error: stream closed by peer");
        assert!(transport.is_degraded());
        // Sticky once degraded.
        transport.observe_error("some ordinary error");
        assert!(transport.is_degraded());
    }

    #[test]
    fn test_transport_ignores_ordinary_errors() {
        let transport = TransportState::new(LlmHttpConfig::default());
        transport.observe_error("API returned status 500");
        assert!(!transport.is_degraded());
    }
}
