//! Signal analysis: fast path, escalation, and deep analysis.

mod deep;
mod orchestrator;
mod prompts;
mod validate;

pub use deep::{DeepAnalysis, ToolCallState};
pub use orchestrator::SignalOrchestrator;
pub use prompts::{PlannerResponse, RawSignalResponse};
pub use validate::{apply_corrections, parse_signal, reconcile_assets};

/// Configuration for signal analysis.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `MARKETSIFT_ANALYSIS_SUCCESS_THRESHOLD` | f32 | `0.45` | Minimum confidence for `status=success` |
/// | `MARKETSIFT_ANALYSIS_HIGH_VALUE_THRESHOLD` | f32 | `0.75` | Confidence triggering deep analysis |
/// | `MARKETSIFT_ANALYSIS_MAX_TOOL_CALLS` | u32 | `3` | Hard cap on tool calls per deep analysis |
/// | `MARKETSIFT_ANALYSIS_DEEP_RETRIES` | u32 | `2` | Planner/synthesis retries |
/// | `MARKETSIFT_ANALYSIS_CAUTION_CAP` | f32 | `0.40` | Confidence cap for stale or asset-less signals |
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Minimum confidence for `status=success`.
    pub success_threshold: f32,
    /// Confidence at or above which deep analysis is triggered.
    pub high_value_threshold: f32,
    /// Keywords in the raw text that force escalation.
    pub critical_keywords: Vec<String>,
    /// Hard cap on tool calls per deep analysis invocation.
    pub max_tool_calls: u32,
    /// Retries for a failed planner or synthesis call.
    pub deep_retry_attempts: u32,
    /// Initial backoff for deep retries in milliseconds, doubled per retry.
    pub deep_retry_backoff_ms: u64,
    /// Confidence cap applied to stale, unissued, or asset-less signals.
    pub caution_cap: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            success_threshold: 0.45,
            high_value_threshold: 0.75,
            critical_keywords: [
                "hack",
                "hacked",
                "exploit",
                "drained",
                "rug pull",
                "sec ",
                "lawsuit",
                "etf",
                "listing",
                "delist",
                "bankrupt",
                "halted",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            max_tool_calls: 3,
            deep_retry_attempts: 2,
            deep_retry_backoff_ms: 500,
            caution_cap: 0.40,
        }
    }
}

impl AnalysisConfig {
    /// Loads configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("MARKETSIFT_ANALYSIS_SUCCESS_THRESHOLD") {
            if let Ok(t) = v.parse() {
                config.success_threshold = t;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_ANALYSIS_HIGH_VALUE_THRESHOLD") {
            if let Ok(t) = v.parse() {
                config.high_value_threshold = t;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_ANALYSIS_MAX_TOOL_CALLS") {
            if let Ok(n) = v.parse() {
                config.max_tool_calls = n;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_ANALYSIS_DEEP_RETRIES") {
            if let Ok(n) = v.parse() {
                config.deep_retry_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_ANALYSIS_CAUTION_CAP") {
            if let Ok(cap) = v.parse() {
                config.caution_cap = cap;
            }
        }
        config
    }

    /// Builder method to set the tool call cap.
    #[must_use]
    pub const fn with_max_tool_calls(mut self, max_tool_calls: u32) -> Self {
        self.max_tool_calls = max_tool_calls;
        self
    }

    /// Builder method to set the escalation threshold.
    #[must_use]
    pub const fn with_high_value_threshold(mut self, threshold: f32) -> Self {
        self.high_value_threshold = threshold;
        self
    }
}
