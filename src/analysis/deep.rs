//! Deep analysis state machine.
//!
//! `ContextGather -> Planner -> Executor -> {Planner | Synthesis} -> Done`.
//! The planner chooses tools, the executor fans them out concurrently, and
//! synthesis produces the final signal. `max_tool_calls` is a hard cap:
//! once reached, synthesis is forced no matter what the planner asks for.

use super::prompts::{self, PlannerResponse};
use super::{AnalysisConfig, validate};
use crate::llm::{ChatMessage, LlmProvider, extract_json};
use crate::memory::{MemoryQuery, MemoryService};
use crate::models::{MemoryContext, RawEvent, SignalResult};
use crate::tools::{ToolKind, ToolOutcome, ToolRegistry, ToolRequest};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Per-invocation tool call accounting and evidence.
#[derive(Debug, Default)]
pub struct ToolCallState {
    /// Tool invocations performed so far.
    pub tool_call_count: u32,
    /// Hard cap for this invocation.
    pub max_tool_calls: u32,
    /// Everything the executor has gathered, failures included.
    pub evidence: Vec<ToolOutcome>,
}

impl ToolCallState {
    /// Remaining tool call budget.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.max_tool_calls.saturating_sub(self.tool_call_count)
    }
}

/// The deep analysis escalation path.
pub struct DeepAnalysis {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    memory: Arc<MemoryService>,
    config: AnalysisConfig,
}

impl DeepAnalysis {
    /// Creates the state machine with its collaborators.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        memory: Arc<MemoryService>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            memory,
            config,
        }
    }

    /// Runs the full state machine for one escalated event.
    ///
    /// # Errors
    ///
    /// Fails when planner or synthesis calls exhaust their retry budget;
    /// the orchestrator falls back to the preliminary signal.
    #[instrument(skip_all, fields(asset = %preliminary.asset))]
    pub async fn run(
        &self,
        event: &RawEvent,
        preliminary: &SignalResult,
    ) -> Result<SignalResult> {
        // ContextGather keys retrieval off the curated fast-path fields,
        // not raw keywords.
        let memory = self.gather_context(preliminary).await;

        let mut state = ToolCallState {
            max_tool_calls: self.config.max_tool_calls,
            ..ToolCallState::default()
        };

        while state.remaining() > 0 {
            let requests = self.plan(preliminary, &memory, &state).await?;
            if requests.is_empty() {
                break;
            }
            self.execute(requests, &mut state).await;
        }

        let signal = self.synthesize(event, preliminary, &memory, &state).await?;
        metrics::counter!("deep_analysis_total", "status" => "completed").increment(1);
        metrics::histogram!("deep_analysis_tool_calls").record(f64::from(state.tool_call_count));
        Ok(signal)
    }

    async fn gather_context(&self, preliminary: &SignalResult) -> MemoryContext {
        let assets = preliminary.asset_codes();
        let mut keywords = assets.clone();
        keywords.push(preliminary.event_type.as_str().to_string());
        let query = MemoryQuery {
            embedding: None,
            keywords,
            assets: if assets.is_empty() { None } else { Some(assets) },
        };
        self.memory.fetch(&query).await
    }

    /// One planner turn, mapped to concrete tool requests and truncated to
    /// the remaining budget.
    async fn plan(
        &self,
        preliminary: &SignalResult,
        memory: &MemoryContext,
        state: &ToolCallState,
    ) -> Result<Vec<ToolRequest>> {
        let available = self.tools.available_kinds();
        if available.is_empty() {
            return Ok(Vec::new());
        }

        let messages = prompts::build_planner_messages(
            preliminary,
            memory,
            &state.evidence,
            &available,
            state.remaining(),
        );
        let plan: PlannerResponse = self
            .call_with_retry("planner", &messages, |text| {
                serde_json::from_str(extract_json(text)).map_err(|e| Error::ParseFailed {
                    context: "planner_response".to_string(),
                    cause: e.to_string(),
                })
            })
            .await?;

        let asset = preliminary
            .asset_codes()
            .into_iter()
            .next()
            .unwrap_or_else(|| preliminary.asset.clone());
        let mut requests: Vec<ToolRequest> = plan
            .tools
            .iter()
            .filter_map(|tag| ToolKind::parse(tag))
            .filter(|kind| available.contains(kind))
            .map(|kind| ToolRequest {
                kind,
                asset: asset.clone(),
                keywords: if kind == ToolKind::Search {
                    plan.keywords.clone()
                } else {
                    Vec::new()
                },
            })
            .collect();
        // One invocation per kind per turn, wherever in the list the
        // planner repeated itself.
        let mut seen = std::collections::HashSet::new();
        requests.retain(|request| seen.insert(request.kind));

        let budget = state.remaining() as usize;
        if requests.len() > budget {
            tracing::debug!(
                requested = requests.len(),
                budget,
                "planner over budget, truncating"
            );
            requests.truncate(budget);
        }
        Ok(requests)
    }

    /// Fans out one planner turn's tool calls and joins them.
    async fn execute(&self, requests: Vec<ToolRequest>, state: &mut ToolCallState) {
        state.tool_call_count += u32::try_from(requests.len()).unwrap_or(u32::MAX);
        let outcomes =
            futures::future::join_all(requests.iter().map(|req| self.tools.invoke(req))).await;
        state.evidence.extend(outcomes);
    }

    async fn synthesize(
        &self,
        event: &RawEvent,
        preliminary: &SignalResult,
        memory: &MemoryContext,
        state: &ToolCallState,
    ) -> Result<SignalResult> {
        let messages =
            prompts::build_synthesis_messages(event, preliminary, memory, &state.evidence);
        self.call_with_retry("synthesis", &messages, |text| {
            validate::parse_signal(text, &self.config)
        })
        .await
    }

    /// Calls the reasoning provider and parses the response, retrying both
    /// call failures and unparseable responses with doubling backoff up to
    /// the deep retry budget.
    async fn call_with_retry<T>(
        &self,
        stage: &str,
        messages: &[ChatMessage],
        parse: impl Fn(&str) -> Result<T>,
    ) -> Result<T> {
        let max_attempts = self.config.deep_retry_attempts + 1;
        let mut last_error = None;
        for attempt in 0..max_attempts {
            let result = match self.provider.complete(messages).await {
                Ok(completion) => parse(&completion.text),
                Err(err) => Err(err),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if err.is_exhaustion() {
                        return Err(err);
                    }
                    tracing::warn!(
                        stage,
                        attempt = attempt + 1,
                        error = %err,
                        "deep analysis call failed"
                    );
                    if attempt + 1 < max_attempts {
                        let backoff = Duration::from_millis(
                            self.config.deep_retry_backoff_ms << attempt.min(8),
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last_error = Some(err);
                },
            }
        }
        Err(last_error.unwrap_or_else(|| Error::OperationFailed {
            operation: format!("deep_{stage}"),
            cause: "exhausted retries".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use crate::memory::MemoryConfig;
    use crate::tools::{MarketTool, ToolsConfig};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider scripted per call: planner responses then a synthesis
    /// response.
    struct ScriptedProvider {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).rev().collect()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<Completion> {
            let mut responses = self.responses.lock().unwrap();
            let text = responses.pop().unwrap_or_else(|| {
                // Keep requesting tools forever once the script runs out.
                r#"{"tools": ["search"], "keywords": ["more"]}"#.to_string()
            });
            Ok(Completion {
                text,
                ..Completion::default()
            })
        }
    }

    struct CountingTool {
        kind: ToolKind,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl MarketTool for CountingTool {
        fn kind(&self) -> ToolKind {
            self.kind
        }

        async fn call(&self, _request: &ToolRequest) -> Result<ToolOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutcome {
                kind: self.kind,
                success: true,
                triggered: false,
                confidence: 0.5,
                data: serde_json::json!({}),
                error: None,
            })
        }
    }

    const SYNTHESIS: &str = r#"{"summary": "verified", "event_type": "hack", "asset": "BAL",
        "action": "observe", "direction": "down", "confidence": 0.7, "strength": "medium",
        "notes": "search evidence confirmed the drain, raising confidence from 0.6"}"#;

    fn preliminary() -> SignalResult {
        SignalResult {
            asset: "BAL".to_string(),
            confidence: 0.6,
            ..SignalResult::default()
        }
    }

    fn event() -> RawEvent {
        RawEvent::new("tg", "alerts", "Balancer exploit reported", Utc::now())
    }

    fn deep(provider: ScriptedProvider, registry: ToolRegistry, max_calls: u32) -> DeepAnalysis {
        DeepAnalysis::new(
            Arc::new(provider),
            Arc::new(registry),
            Arc::new(MemoryService::new(MemoryConfig::default())),
            AnalysisConfig::default().with_max_tool_calls(max_calls),
        )
    }

    #[tokio::test]
    async fn test_planner_empty_goes_straight_to_synthesis() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ToolRegistry::new(&ToolsConfig::default()).with_tool(Arc::new(
            CountingTool {
                kind: ToolKind::Search,
                calls: calls.clone(),
            },
        ));
        let provider = ScriptedProvider::new(vec![r#"{"tools": []}"#, SYNTHESIS]);
        let analysis = deep(provider, registry, 3);
        let signal = analysis.run(&event(), &preliminary()).await.unwrap();
        assert_eq!(signal.asset, "BAL");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_greedy_planner_capped_at_max_tool_calls() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ToolRegistry::new(&ToolsConfig::default()).with_tool(Arc::new(
            CountingTool {
                kind: ToolKind::Search,
                calls: calls.clone(),
            },
        ));
        // The planner asks for a tool on every turn; only the cap forces
        // the transition to synthesis.
        let provider = ScriptedProvider::new(vec![
            r#"{"tools": ["search"], "keywords": ["a"]}"#,
            r#"{"tools": ["search"], "keywords": ["b"]}"#,
            SYNTHESIS,
        ]);
        let analysis = deep(provider, registry, 2);
        let signal = analysis.run(&event(), &preliminary()).await.unwrap();
        assert_eq!(signal.summary, "verified");
        assert!(calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_multi_tool_turn_truncated_to_budget() {
        let search_calls = Arc::new(AtomicU32::new(0));
        let price_calls = Arc::new(AtomicU32::new(0));
        let registry = ToolRegistry::new(&ToolsConfig::default())
            .with_tool(Arc::new(CountingTool {
                kind: ToolKind::Search,
                calls: search_calls.clone(),
            }))
            .with_tool(Arc::new(CountingTool {
                kind: ToolKind::Price,
                calls: price_calls.clone(),
            }));
        let provider = ScriptedProvider::new(vec![
            r#"{"tools": ["search", "price"], "keywords": ["x"]}"#,
            SYNTHESIS,
        ]);
        let analysis = deep(provider, registry, 1);
        analysis.run(&event(), &preliminary()).await.unwrap();
        let total = search_calls.load(Ordering::SeqCst) + price_calls.load(Ordering::SeqCst);
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_repeated_tool_in_one_turn_runs_once() {
        let search_calls = Arc::new(AtomicU32::new(0));
        let price_calls = Arc::new(AtomicU32::new(0));
        let registry = ToolRegistry::new(&ToolsConfig::default())
            .with_tool(Arc::new(CountingTool {
                kind: ToolKind::Search,
                calls: search_calls.clone(),
            }))
            .with_tool(Arc::new(CountingTool {
                kind: ToolKind::Price,
                calls: price_calls.clone(),
            }));
        // The planner repeats search non-adjacently within one turn.
        let provider = ScriptedProvider::new(vec![
            r#"{"tools": ["search", "price", "search"], "keywords": ["x"]}"#,
            r#"{"tools": []}"#,
            SYNTHESIS,
        ]);
        let analysis = deep(provider, registry, 3);
        analysis.run(&event(), &preliminary()).await.unwrap();
        assert_eq!(search_calls.load(Ordering::SeqCst), 1);
        assert_eq!(price_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_garbled_planner_response_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ToolRegistry::new(&ToolsConfig::default()).with_tool(Arc::new(
            CountingTool {
                kind: ToolKind::Search,
                calls: calls.clone(),
            },
        ));
        // First planner response is prose, not JSON; the retry gets a
        // usable plan.
        let provider = ScriptedProvider::new(vec![
            "let me think about which tools to use",
            r#"{"tools": ["search"], "keywords": ["verify"]}"#,
            r#"{"tools": []}"#,
            SYNTHESIS,
        ]);
        let analysis = DeepAnalysis::new(
            Arc::new(provider),
            Arc::new(registry),
            Arc::new(MemoryService::new(MemoryConfig::default())),
            AnalysisConfig {
                deep_retry_attempts: 1,
                deep_retry_backoff_ms: 1,
                ..AnalysisConfig::default()
            },
        );
        let signal = analysis.run(&event(), &preliminary()).await.unwrap();
        assert_eq!(signal.summary, "verified");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_tags_ignored() {
        let registry = ToolRegistry::new(&ToolsConfig::default()).with_tool(Arc::new(
            CountingTool {
                kind: ToolKind::Price,
                calls: Arc::new(AtomicU32::new(0)),
            },
        ));
        let provider = ScriptedProvider::new(vec![
            r#"{"tools": ["crystal_ball", "price"]}"#,
            r#"{"tools": []}"#,
            SYNTHESIS,
        ]);
        let analysis = deep(provider, registry, 3);
        let signal = analysis.run(&event(), &preliminary()).await.unwrap();
        assert_eq!(signal.summary, "verified");
    }

    #[tokio::test]
    async fn test_synthesis_applies_corrections() {
        let registry = ToolRegistry::new(&ToolsConfig::default());
        let synthesis_no_asset = r#"{"summary": "nothing tradable", "event_type": "macro",
            "asset": "NONE", "action": "buy", "confidence": 0.9}"#;
        let provider = ScriptedProvider::new(vec![synthesis_no_asset]);
        let analysis = deep(provider, registry, 3);
        let signal = analysis.run(&event(), &preliminary()).await.unwrap();
        assert_eq!(signal.action, crate::models::Action::Observe);
        assert!(signal.confidence <= 0.40);
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<Completion> {
            Err(Error::OperationFailed {
                operation: "complete".to_string(),
                cause: "down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_all_retries_failing_raises() {
        let analysis = DeepAnalysis::new(
            Arc::new(FailingProvider),
            Arc::new(ToolRegistry::new(&ToolsConfig::default())),
            Arc::new(MemoryService::new(MemoryConfig::default())),
            AnalysisConfig {
                deep_retry_attempts: 1,
                deep_retry_backoff_ms: 1,
                ..AnalysisConfig::default()
            },
        );
        assert!(analysis.run(&event(), &preliminary()).await.is_err());
    }
}
