//! Fast-path signal analysis and deep analysis escalation.

use super::prompts::build_fast_messages;
use super::{AnalysisConfig, DeepAnalysis, validate};
use crate::llm::LlmProvider;
use crate::models::{EventType, MemoryContext, RawEvent, SignalResult, SignalStatus};
use std::sync::Arc;
use tracing::instrument;

/// Event types that always escalate to deep analysis.
const CRITICAL_EVENT_TYPES: [EventType; 4] = [
    EventType::Hack,
    EventType::Regulation,
    EventType::Listing,
    EventType::Delisting,
];

/// Orchestrates the fast analysis call and optional deep escalation.
pub struct SignalOrchestrator {
    fast: Arc<dyn LlmProvider>,
    deep: Option<Arc<DeepAnalysis>>,
    config: AnalysisConfig,
}

impl SignalOrchestrator {
    /// Creates an orchestrator with only the fast path.
    #[must_use]
    pub fn new(fast: Arc<dyn LlmProvider>, config: AnalysisConfig) -> Self {
        Self {
            fast,
            deep: None,
            config,
        }
    }

    /// Attaches the deep analysis escalation path.
    #[must_use]
    pub fn with_deep(mut self, deep: Arc<DeepAnalysis>) -> Self {
        self.deep = Some(deep);
        self
    }

    /// Analyzes one event. Never fails: provider errors produce
    /// `status=error`, parse failures a degraded skip, and deep analysis
    /// failures fall back to the fast-path result.
    #[instrument(skip_all, fields(source = %event.source_id))]
    pub async fn analyze(&self, event: &RawEvent, memory: &MemoryContext) -> SignalResult {
        let messages = build_fast_messages(event, memory);
        let completion = match self.fast.complete(&messages).await {
            Ok(completion) => completion,
            Err(err) => {
                tracing::error!(error = %err, "fast analysis call failed");
                metrics::counter!("fast_analysis_total", "status" => "error").increment(1);
                let mut signal =
                    SignalResult::degraded(truncate(&event.text, 120), err.to_string());
                signal.status = SignalStatus::Error;
                return signal;
            },
        };

        let signal = match validate::parse_signal(&completion.text, &self.config) {
            Ok(signal) => {
                metrics::counter!("fast_analysis_total", "status" => "success").increment(1);
                signal
            },
            Err(err) => {
                tracing::warn!(error = %err, "fast analysis response unparseable, degrading");
                metrics::counter!("fast_analysis_total", "status" => "parse_failed").increment(1);
                return SignalResult::degraded(truncate(&event.text, 120), err.to_string());
            },
        };

        if !self.should_escalate(&signal, &event.text) {
            return signal;
        }
        let Some(deep) = &self.deep else {
            return signal;
        };

        tracing::info!(
            asset = %signal.asset,
            event_type = signal.event_type.as_str(),
            confidence = signal.confidence,
            "escalating to deep analysis"
        );
        match deep.run(event, &signal).await {
            Ok(refined) => {
                metrics::counter!("deep_escalations_total", "status" => "refined").increment(1);
                refined
            },
            Err(err) => {
                tracing::warn!(error = %err, "deep analysis failed, using fast-path result");
                metrics::counter!("deep_escalations_total", "status" => "fallback").increment(1);
                signal
            },
        }
    }

    /// Escalation rule: high confidence, critical event type, or critical
    /// keyword in the raw text.
    fn should_escalate(&self, signal: &SignalResult, raw_text: &str) -> bool {
        if signal.confidence >= self.config.high_value_threshold {
            return true;
        }
        if CRITICAL_EVENT_TYPES.contains(&signal.event_type) {
            return true;
        }
        let lower = raw_text.to_lowercase();
        self.config
            .critical_keywords
            .iter()
            .any(|k| lower.contains(k.as_str()))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, Completion};
    use crate::models::Action;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixedProvider {
        response: Option<String>,
    }

    #[async_trait]
    impl LlmProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<Completion> {
            match &self.response {
                Some(text) => Ok(Completion {
                    text: text.clone(),
                    ..Completion::default()
                }),
                None => Err(Error::Timeout {
                    operation: "complete".to_string(),
                    elapsed_ms: 30_000,
                }),
            }
        }
    }

    fn event(text: &str) -> RawEvent {
        RawEvent::new("tg", "news", text, Utc::now())
    }

    fn orchestrator(response: Option<&str>) -> SignalOrchestrator {
        SignalOrchestrator::new(
            Arc::new(FixedProvider {
                response: response.map(String::from),
            }),
            AnalysisConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_valid_response_produces_signal() {
        let orchestrator = orchestrator(Some(
            r#"{"summary": "Exchange lists ABC", "event_type": "partnership", "asset": "ABC",
                "action": "buy", "direction": "up", "confidence": 0.6, "strength": "medium"}"#,
        ));
        let signal = orchestrator
            .analyze(&event("ABC partners with payments firm"), &MemoryContext::empty())
            .await;
        assert_eq!(signal.status, SignalStatus::Success);
        assert_eq!(signal.asset, "ABC");
    }

    #[tokio::test]
    async fn test_provider_failure_is_error_status() {
        let orchestrator = orchestrator(None);
        let signal = orchestrator
            .analyze(&event("whatever"), &MemoryContext::empty())
            .await;
        assert_eq!(signal.status, SignalStatus::Error);
    }

    #[tokio::test]
    async fn test_unparseable_response_degrades_to_skip() {
        let orchestrator = orchestrator(Some("I am not JSON, sorry"));
        let signal = orchestrator
            .analyze(&event("whatever"), &MemoryContext::empty())
            .await;
        assert_eq!(signal.status, SignalStatus::Skip);
        assert_eq!(signal.action, Action::Observe);
        assert!(signal.confidence <= 0.1);
    }

    #[test]
    fn test_escalates_on_high_confidence() {
        let orchestrator = orchestrator(Some(""));
        let signal = SignalResult {
            confidence: 0.8,
            ..SignalResult::default()
        };
        assert!(orchestrator.should_escalate(&signal, "ordinary news"));
    }

    #[test]
    fn test_escalates_on_critical_event_type() {
        let orchestrator = orchestrator(Some(""));
        let signal = SignalResult {
            event_type: EventType::Hack,
            confidence: 0.2,
            ..SignalResult::default()
        };
        assert!(orchestrator.should_escalate(&signal, "ordinary news"));
    }

    #[test]
    fn test_escalates_on_critical_keyword() {
        let orchestrator = orchestrator(Some(""));
        let signal = SignalResult {
            confidence: 0.2,
            ..SignalResult::default()
        };
        assert!(orchestrator.should_escalate(&signal, "Protocol was HACKED overnight"));
    }

    #[test]
    fn test_no_escalation_for_mundane_event() {
        let orchestrator = orchestrator(Some(""));
        let signal = SignalResult {
            confidence: 0.3,
            ..SignalResult::default()
        };
        assert!(!orchestrator.should_escalate(&signal, "minor UI update shipped"));
    }
}
