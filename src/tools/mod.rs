//! Market data tools for deep analysis.
//!
//! Tools are black boxes behind the [`MarketTool`] trait. The registry
//! fronts them with a TTL result cache and a per-kind daily quota, and
//! converts every failure into a non-success outcome so tool trouble never
//! aborts an analysis.

use crate::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use lru::LruCache;
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The tool families available to the deep analysis planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Web and news search.
    Search,
    /// Spot price and volume lookup.
    Price,
    /// Macro calendar and indicators.
    Macro,
    /// On-chain flows and holder movements.
    OnChain,
    /// Protocol TVL and health metrics.
    Protocol,
}

impl ToolKind {
    /// All tool kinds, in planner-prompt order.
    pub const ALL: [Self; 5] = [
        Self::Search,
        Self::Price,
        Self::Macro,
        Self::OnChain,
        Self::Protocol,
    ];

    /// Canonical tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Price => "price",
            Self::Macro => "macro",
            Self::OnChain => "onchain",
            Self::Protocol => "protocol",
        }
    }

    /// Parses a tag as produced by the planner.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "search" | "web_search" | "news" => Some(Self::Search),
            "price" | "market" => Some(Self::Price),
            "macro" | "macro_calendar" => Some(Self::Macro),
            "onchain" | "on_chain" | "chain" => Some(Self::OnChain),
            "protocol" | "defi" | "tvl" => Some(Self::Protocol),
            _ => None,
        }
    }
}

/// One tool invocation request from the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    /// Which tool to run.
    pub kind: ToolKind,
    /// Primary asset code under analysis.
    pub asset: String,
    /// Free-form query keywords.
    pub keywords: Vec<String>,
}

/// Result of one tool invocation.
///
/// Failures and quota skips are outcomes, not errors; the synthesis prompt
/// sees everything the executor attempted.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Which tool produced this.
    pub kind: ToolKind,
    /// Whether the tool ran and returned data.
    pub success: bool,
    /// Whether the tool flagged its finding as signal-relevant.
    pub triggered: bool,
    /// Tool-reported confidence in its finding.
    pub confidence: f32,
    /// Structured payload for the synthesis prompt.
    pub data: Value,
    /// Failure or skip description.
    pub error: Option<String>,
}

impl ToolOutcome {
    /// A failed or skipped outcome.
    #[must_use]
    pub fn failed(kind: ToolKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            success: false,
            triggered: false,
            confidence: 0.0,
            data: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Trait for market data tools.
#[async_trait]
pub trait MarketTool: Send + Sync {
    /// Which tool family this implements.
    fn kind(&self) -> ToolKind;

    /// Runs the tool.
    async fn call(&self, request: &ToolRequest) -> Result<ToolOutcome>;
}

/// Configuration for the tool registry.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `MARKETSIFT_TOOLS_DAILY_LIMIT` | u32 | `200` | Calls per tool kind per UTC day |
/// | `MARKETSIFT_TOOLS_CACHE_TTL_SECS` | u64 | `300` | Result cache TTL |
/// | `MARKETSIFT_TOOLS_CACHE_CAPACITY` | usize | `256` | Result cache entries |
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Calls allowed per tool kind per UTC day.
    pub daily_limit: u32,
    /// How long cached results stay fresh.
    pub cache_ttl: Duration,
    /// Result cache capacity.
    pub cache_capacity: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            daily_limit: 200,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 256,
        }
    }
}

impl ToolsConfig {
    /// Loads configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("MARKETSIFT_TOOLS_DAILY_LIMIT") {
            if let Ok(limit) = v.parse() {
                config.daily_limit = limit;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_TOOLS_CACHE_TTL_SECS") {
            if let Ok(secs) = v.parse() {
                config.cache_ttl = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_TOOLS_CACHE_CAPACITY") {
            if let Ok(capacity) = v.parse() {
                config.cache_capacity = capacity;
            }
        }
        config
    }
}

/// Per-kind daily call counter, reset at UTC midnight.
#[derive(Debug)]
struct DailyQuota {
    limit: u32,
    state: Mutex<QuotaState>,
}

#[derive(Debug)]
struct QuotaState {
    date: NaiveDate,
    counts: HashMap<ToolKind, u32>,
}

impl DailyQuota {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            state: Mutex::new(QuotaState {
                date: Utc::now().date_naive(),
                counts: HashMap::new(),
            }),
        }
    }

    /// Consumes one call for the kind. Returns false when the day's budget
    /// is already spent.
    fn try_consume(&self, kind: ToolKind) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let today = Utc::now().date_naive();
        if state.date != today {
            state.date = today;
            state.counts.clear();
        }
        let count = state.counts.entry(kind).or_insert(0);
        if *count >= self.limit {
            return false;
        }
        *count += 1;
        true
    }
}

struct CachedOutcome {
    outcome: ToolOutcome,
    stored_at: Instant,
}

/// TTL cache over recent tool results.
struct ToolCache {
    entries: Mutex<LruCache<String, CachedOutcome>>,
    ttl: Duration,
}

impl ToolCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn key(request: &ToolRequest) -> String {
        format!(
            "{}|{}|{}",
            request.kind.as_str(),
            request.asset,
            request.keywords.join(",")
        )
    }

    fn get(&self, request: &ToolRequest) -> Option<ToolOutcome> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = Self::key(request);
        match entries.get(&key) {
            Some(cached) if cached.stored_at.elapsed() < self.ttl => Some(cached.outcome.clone()),
            Some(_) => {
                entries.pop(&key);
                None
            },
            None => None,
        }
    }

    fn put(&self, request: &ToolRequest, outcome: &ToolOutcome) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.put(
            Self::key(request),
            CachedOutcome {
                outcome: outcome.clone(),
                stored_at: Instant::now(),
            },
        );
    }
}

/// Registry of available tools, fronted by cache and quota.
pub struct ToolRegistry {
    tools: HashMap<ToolKind, Arc<dyn MarketTool>>,
    quota: DailyQuota,
    cache: ToolCache,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            tools: HashMap::new(),
            quota: DailyQuota::new(config.daily_limit),
            cache: ToolCache::new(config.cache_capacity, config.cache_ttl),
        }
    }

    /// Registers a tool implementation.
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn MarketTool>) -> Self {
        self.tools.insert(tool.kind(), tool);
        self
    }

    /// Tool kinds currently registered, in planner-prompt order.
    #[must_use]
    pub fn available_kinds(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|k| self.tools.contains_key(k))
            .collect()
    }

    /// Invokes one tool. Never fails; trouble becomes a non-success
    /// outcome. Quota skips do not consume budget for later calls and are
    /// never retried.
    pub async fn invoke(&self, request: &ToolRequest) -> ToolOutcome {
        let kind = request.kind;
        let Some(tool) = self.tools.get(&kind) else {
            return ToolOutcome::failed(kind, "tool not configured");
        };

        if let Some(cached) = self.cache.get(request) {
            metrics::counter!("tool_calls_total", "tool" => kind.as_str(), "status" => "cached")
                .increment(1);
            return cached;
        }

        if !self.quota.try_consume(kind) {
            tracing::warn!(tool = kind.as_str(), "daily tool quota exhausted, skipping");
            metrics::counter!("tool_calls_total", "tool" => kind.as_str(), "status" => "quota")
                .increment(1);
            return ToolOutcome::failed(kind, "daily quota exhausted");
        }

        let started = Instant::now();
        match tool.call(request).await {
            Ok(outcome) => {
                metrics::counter!(
                    "tool_calls_total",
                    "tool" => kind.as_str(),
                    "status" => "success"
                )
                .increment(1);
                metrics::histogram!("tool_call_duration_ms", "tool" => kind.as_str())
                    .record(started.elapsed().as_secs_f64() * 1000.0);
                self.cache.put(request, &outcome);
                outcome
            },
            Err(err) => {
                tracing::warn!(tool = kind.as_str(), error = %err, "tool call failed");
                metrics::counter!(
                    "tool_calls_total",
                    "tool" => kind.as_str(),
                    "status" => "error"
                )
                .increment(1);
                ToolOutcome::failed(kind, err.to_string())
            },
        }
    }
}

/// HTTP tool hitting a configured JSON endpoint.
///
/// The endpoint receives `{"asset": ..., "keywords": [...]}` and answers
/// `{"triggered": bool, "confidence": f32, "data": {...}}`.
pub struct HttpJsonTool {
    kind: ToolKind,
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpJsonTool {
    /// Creates a tool for the given kind and endpoint.
    #[must_use]
    pub fn new(kind: ToolKind, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            kind,
            url: url.into(),
            api_key: None,
            client,
        }
    }

    /// Sets the API key sent as a bearer token.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[derive(serde::Serialize)]
struct ToolWireRequest<'a> {
    asset: &'a str,
    keywords: &'a [String],
}

#[derive(serde::Deserialize)]
struct ToolWireResponse {
    #[serde(default)]
    triggered: bool,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    data: Value,
}

#[async_trait]
impl MarketTool for HttpJsonTool {
    fn kind(&self) -> ToolKind {
        self.kind
    }

    async fn call(&self, request: &ToolRequest) -> Result<ToolOutcome> {
        let mut http = self.client.post(&self.url).json(&ToolWireRequest {
            asset: &request.asset,
            keywords: &request.keywords,
        });
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|e| crate::Error::OperationFailed {
            operation: format!("tool_{}", self.kind.as_str()),
            cause: format!("request error: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(crate::Error::OperationFailed {
                operation: format!("tool_{}", self.kind.as_str()),
                cause: format!("API returned status {status}"),
            });
        }

        let body: ToolWireResponse =
            response.json().await.map_err(|e| crate::Error::ParseFailed {
                context: format!("tool_{}", self.kind.as_str()),
                cause: e.to_string(),
            })?;

        Ok(ToolOutcome {
            kind: self.kind,
            success: true,
            triggered: body.triggered,
            confidence: body.confidence.clamp(0.0, 1.0),
            data: body.data,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTool {
        kind: ToolKind,
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingTool {
        fn new(kind: ToolKind) -> Self {
            Self {
                kind,
                calls: AtomicU32::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl MarketTool for CountingTool {
        fn kind(&self) -> ToolKind {
            self.kind
        }

        async fn call(&self, request: &ToolRequest) -> Result<ToolOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(crate::Error::OperationFailed {
                    operation: "tool".to_string(),
                    cause: "boom".to_string(),
                });
            }
            Ok(ToolOutcome {
                kind: self.kind,
                success: true,
                triggered: true,
                confidence: 0.8,
                data: serde_json::json!({"asset": request.asset}),
                error: None,
            })
        }
    }

    fn request(asset: &str) -> ToolRequest {
        ToolRequest {
            kind: ToolKind::Price,
            asset: asset.to_string(),
            keywords: vec!["spot".to_string()],
        }
    }

    #[test]
    fn test_tool_kind_parse() {
        assert_eq!(ToolKind::parse("search"), Some(ToolKind::Search));
        assert_eq!(ToolKind::parse("on_chain"), Some(ToolKind::OnChain));
        assert_eq!(ToolKind::parse("TVL"), Some(ToolKind::Protocol));
        assert_eq!(ToolKind::parse("astrology"), None);
    }

    #[tokio::test]
    async fn test_unregistered_tool_is_failed_outcome() {
        let registry = ToolRegistry::new(&ToolsConfig::default());
        let outcome = registry.invoke(&request("BTC")).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("tool not configured"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_second_call() {
        let tool = Arc::new(CountingTool::new(ToolKind::Price));
        let registry = ToolRegistry::new(&ToolsConfig::default()).with_tool(tool.clone());
        let first = registry.invoke(&request("BTC")).await;
        let second = registry.invoke(&request("BTC")).await;
        assert!(first.success && second.success);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_requests_not_cached_together() {
        let tool = Arc::new(CountingTool::new(ToolKind::Price));
        let registry = ToolRegistry::new(&ToolsConfig::default()).with_tool(tool.clone());
        registry.invoke(&request("BTC")).await;
        registry.invoke(&request("ETH")).await;
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_skips() {
        let config = ToolsConfig {
            daily_limit: 1,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 16,
        };
        let tool = Arc::new(CountingTool::new(ToolKind::Price));
        let registry = ToolRegistry::new(&config).with_tool(tool.clone());
        let first = registry.invoke(&request("BTC")).await;
        assert!(first.success);
        // Different asset avoids the cache, hits the spent quota.
        let second = registry.invoke(&request("ETH")).await;
        assert!(!second.success);
        assert_eq!(second.error.as_deref(), Some("daily quota exhausted"));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tool_error_becomes_failed_outcome() {
        let tool = Arc::new(CountingTool {
            kind: ToolKind::Search,
            calls: AtomicU32::new(0),
            fail: true,
        });
        let registry = ToolRegistry::new(&ToolsConfig::default()).with_tool(tool);
        let outcome = registry
            .invoke(&ToolRequest {
                kind: ToolKind::Search,
                asset: "BTC".to_string(),
                keywords: vec![],
            })
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().is_some_and(|e| e.contains("boom")));
    }

    #[tokio::test]
    async fn test_failed_outcomes_not_cached() {
        let tool = Arc::new(CountingTool {
            kind: ToolKind::Search,
            calls: AtomicU32::new(0),
            fail: true,
        });
        let registry = ToolRegistry::new(&ToolsConfig::default()).with_tool(tool.clone());
        let req = ToolRequest {
            kind: ToolKind::Search,
            asset: "BTC".to_string(),
            keywords: vec![],
        };
        registry.invoke(&req).await;
        registry.invoke(&req).await;
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_available_kinds_ordered() {
        let registry = ToolRegistry::new(&ToolsConfig::default())
            .with_tool(Arc::new(CountingTool::new(ToolKind::Protocol)))
            .with_tool(Arc::new(CountingTool::new(ToolKind::Search)));
        assert_eq!(
            registry.available_kinds(),
            vec![ToolKind::Search, ToolKind::Protocol]
        );
    }

    #[test]
    fn test_quota_resets_on_new_day() {
        let quota = DailyQuota::new(1);
        assert!(quota.try_consume(ToolKind::Price));
        assert!(!quota.try_consume(ToolKind::Price));
        // Other kinds budget independently.
        assert!(quota.try_consume(ToolKind::Search));
        // Force yesterday; the next consume resets.
        {
            let mut state = quota.state.lock().unwrap();
            state.date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        }
        assert!(quota.try_consume(ToolKind::Price));
    }
}
