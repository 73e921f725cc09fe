//! Configuration management.
//!
//! Layering, lowest priority first: built-in defaults, optional TOML file,
//! environment variables. API keys come from the environment only, never
//! from the file.

use crate::analysis::AnalysisConfig;
use crate::dedup::{DedupConfig, SignalDedupConfig};
use crate::llm::{LlmHttpConfig, ProviderKind, ProviderSettings, RetryConfig};
use crate::memory::MemoryConfig;
use crate::pipeline::PipelineConfig;
use crate::tools::ToolsConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration for marketsift.
#[derive(Debug, Clone)]
pub struct MarketsiftConfig {
    /// Dedup engine settings.
    pub dedup: DedupConfig,
    /// Signal-level dedup settings.
    pub signal_dedup: SignalDedupConfig,
    /// Memory retrieval settings.
    pub memory: MemoryConfig,
    /// Analysis thresholds and budgets.
    pub analysis: AnalysisConfig,
    /// Tool registry settings.
    pub tools: ToolsConfig,
    /// LLM provider settings.
    pub llm: LlmSettings,
    /// Pipeline controller settings.
    pub pipeline: PipelineConfig,
    /// Path of the local memory fallback database.
    pub local_memory_path: Option<PathBuf>,
}

impl Default for MarketsiftConfig {
    fn default() -> Self {
        Self {
            dedup: DedupConfig::default(),
            signal_dedup: SignalDedupConfig::default(),
            memory: MemoryConfig::default(),
            analysis: AnalysisConfig::default(),
            tools: ToolsConfig::default(),
            llm: LlmSettings::default(),
            pipeline: PipelineConfig::default(),
            local_memory_path: None,
        }
    }
}

/// LLM provider configuration for both analysis paths.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Fast-path provider.
    pub fast: ProviderSettings,
    /// Deep-analysis provider.
    pub deep: ProviderSettings,
    /// HTTP timeouts shared by both.
    pub http: LlmHttpConfig,
    /// Retry policy shared by both.
    pub retry: RetryConfig,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            fast: ProviderSettings {
                kind: ProviderKind::DeepSeek,
                model: "deepseek-chat".to_string(),
                api_keys: Vec::new(),
                base_url: None,
                command: None,
                args: Vec::new(),
            },
            deep: ProviderSettings {
                kind: ProviderKind::Anthropic,
                model: "claude-sonnet-4-5".to_string(),
                api_keys: Vec::new(),
                base_url: None,
                command: None,
                args: Vec::new(),
            },
            http: LlmHttpConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Dedup section.
    pub dedup: Option<ConfigFileDedup>,
    /// Signal dedup section.
    pub signal_dedup: Option<ConfigFileSignalDedup>,
    /// Memory section.
    pub memory: Option<ConfigFileMemory>,
    /// Analysis section.
    pub analysis: Option<ConfigFileAnalysis>,
    /// Tools section.
    pub tools: Option<ConfigFileTools>,
    /// LLM section.
    pub llm: Option<ConfigFileLlm>,
    /// Pipeline section.
    pub pipeline: Option<ConfigFilePipeline>,
    /// Local memory database path.
    pub local_memory_path: Option<String>,
}

/// Dedup section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileDedup {
    /// In-memory window in seconds.
    pub memory_window_secs: Option<u64>,
    /// In-memory cache capacity.
    pub cache_capacity: Option<usize>,
    /// Semantic similarity threshold.
    pub semantic_threshold: Option<f32>,
    /// Semantic window in hours.
    pub semantic_window_hours: Option<u32>,
}

/// Signal dedup section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileSignalDedup {
    /// Summary similarity threshold.
    pub similarity_threshold: Option<f32>,
    /// Minimum overlap characters.
    pub min_overlap_chars: Option<usize>,
    /// Window in minutes.
    pub window_minutes: Option<u64>,
}

/// Memory section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileMemory {
    /// Context cap.
    pub max_notes: Option<usize>,
    /// Primary similarity threshold.
    pub similarity_threshold: Option<f32>,
    /// Minimum confidence.
    pub min_confidence: Option<f32>,
    /// Recency window in hours.
    pub time_window_hours: Option<u32>,
    /// Secondary similarity threshold.
    pub secondary_threshold: Option<f32>,
}

/// Analysis section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileAnalysis {
    /// Success threshold.
    pub success_threshold: Option<f32>,
    /// Escalation threshold.
    pub high_value_threshold: Option<f32>,
    /// Escalation keywords.
    pub critical_keywords: Option<Vec<String>>,
    /// Tool call cap.
    pub max_tool_calls: Option<u32>,
    /// Deep retry attempts.
    pub deep_retry_attempts: Option<u32>,
    /// Caution confidence cap.
    pub caution_cap: Option<f32>,
}

/// Tools section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileTools {
    /// Daily call limit per tool kind.
    pub daily_limit: Option<u32>,
    /// Result cache TTL in seconds.
    pub cache_ttl_secs: Option<u64>,
    /// Result cache capacity.
    pub cache_capacity: Option<usize>,
}

/// One provider entry in the LLM section.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileProvider {
    /// Provider tag.
    pub provider: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// Base URL.
    pub base_url: Option<String>,
    /// CLI agent command.
    pub command: Option<String>,
    /// CLI agent arguments.
    pub args: Option<Vec<String>>,
}

/// LLM section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLlm {
    /// Fast-path provider.
    pub fast: Option<ConfigFileProvider>,
    /// Deep-analysis provider.
    pub deep: Option<ConfigFileProvider>,
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Retries for transient failures.
    pub max_retries: Option<u32>,
}

/// Pipeline section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFilePipeline {
    /// Maximum concurrent fast-path analyses.
    pub max_concurrent_analysis: Option<usize>,
    /// Minimum confidence to forward a signal.
    pub forward_threshold: Option<f32>,
}

impl MarketsiftConfig {
    /// Creates a configuration from environment variables only.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self {
            dedup: DedupConfig::from_env(),
            signal_dedup: SignalDedupConfig::from_env(),
            memory: MemoryConfig::from_env(),
            analysis: AnalysisConfig::from_env(),
            tools: ToolsConfig::from_env(),
            llm: LlmSettings {
                http: LlmHttpConfig::from_env(),
                retry: RetryConfig::from_env(),
                ..LlmSettings::default()
            },
            pipeline: PipelineConfig::from_env(),
            local_memory_path: std::env::var("MARKETSIFT_LOCAL_MEMORY_PATH")
                .ok()
                .map(PathBuf::from),
        };
        config.apply_env_providers();
        config
    }

    /// Loads configuration from a TOML file, then applies environment
    /// overrides on top.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;
        let file: ConfigFile =
            toml::from_str(&contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;
        let mut config = Self::from_env();
        config.apply_config_file(file);
        // Env keys win over file-selected providers too.
        config.apply_env_providers();
        Ok(config)
    }

    /// Reads provider selection and API keys from the environment.
    ///
    /// Keys are comma-separated in `MARKETSIFT_FAST_API_KEYS` /
    /// `MARKETSIFT_DEEP_API_KEYS`, falling back to the conventional
    /// provider variables (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`,
    /// `DEEPSEEK_API_KEY`).
    fn apply_env_providers(&mut self) {
        if let Ok(v) = std::env::var("MARKETSIFT_FAST_PROVIDER") {
            if let Some(kind) = ProviderKind::parse(&v) {
                self.llm.fast.kind = kind;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_FAST_MODEL") {
            self.llm.fast.model = v;
        }
        if let Ok(v) = std::env::var("MARKETSIFT_DEEP_PROVIDER") {
            if let Some(kind) = ProviderKind::parse(&v) {
                self.llm.deep.kind = kind;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_DEEP_MODEL") {
            self.llm.deep.model = v;
        }
        if let Ok(v) = std::env::var("MARKETSIFT_CLI_AGENT_COMMAND") {
            self.llm.deep.command = Some(v);
        }

        self.llm.fast.api_keys = env_keys("MARKETSIFT_FAST_API_KEYS", self.llm.fast.kind);
        self.llm.deep.api_keys = env_keys("MARKETSIFT_DEEP_API_KEYS", self.llm.deep.kind);
    }

    fn apply_config_file(&mut self, file: ConfigFile) {
        if let Some(dedup) = file.dedup {
            if let Some(secs) = dedup.memory_window_secs {
                self.dedup.memory_window = std::time::Duration::from_secs(secs);
            }
            if let Some(capacity) = dedup.cache_capacity {
                self.dedup.cache_capacity = capacity;
            }
            if let Some(threshold) = dedup.semantic_threshold {
                self.dedup.semantic_threshold = threshold;
            }
            if let Some(hours) = dedup.semantic_window_hours {
                self.dedup.semantic_window_hours = hours;
            }
        }
        if let Some(sd) = file.signal_dedup {
            if let Some(threshold) = sd.similarity_threshold {
                self.signal_dedup.similarity_threshold = threshold;
            }
            if let Some(chars) = sd.min_overlap_chars {
                self.signal_dedup.min_overlap_chars = chars;
            }
            if let Some(minutes) = sd.window_minutes {
                self.signal_dedup.window_minutes = minutes;
            }
        }
        if let Some(memory) = file.memory {
            if let Some(max_notes) = memory.max_notes {
                self.memory.max_notes = max_notes;
            }
            if let Some(threshold) = memory.similarity_threshold {
                self.memory.similarity_threshold = threshold;
            }
            if let Some(confidence) = memory.min_confidence {
                self.memory.min_confidence = confidence;
            }
            if let Some(hours) = memory.time_window_hours {
                self.memory.time_window_hours = hours;
            }
            if let Some(threshold) = memory.secondary_threshold {
                self.memory.secondary_threshold = threshold;
            }
        }
        if let Some(analysis) = file.analysis {
            if let Some(threshold) = analysis.success_threshold {
                self.analysis.success_threshold = threshold;
            }
            if let Some(threshold) = analysis.high_value_threshold {
                self.analysis.high_value_threshold = threshold;
            }
            if let Some(keywords) = analysis.critical_keywords {
                self.analysis.critical_keywords = keywords;
            }
            if let Some(cap) = analysis.max_tool_calls {
                self.analysis.max_tool_calls = cap;
            }
            if let Some(retries) = analysis.deep_retry_attempts {
                self.analysis.deep_retry_attempts = retries;
            }
            if let Some(cap) = analysis.caution_cap {
                self.analysis.caution_cap = cap;
            }
        }
        if let Some(tools) = file.tools {
            if let Some(limit) = tools.daily_limit {
                self.tools.daily_limit = limit;
            }
            if let Some(secs) = tools.cache_ttl_secs {
                self.tools.cache_ttl = std::time::Duration::from_secs(secs);
            }
            if let Some(capacity) = tools.cache_capacity {
                self.tools.cache_capacity = capacity;
            }
        }
        if let Some(llm) = file.llm {
            if let Some(fast) = llm.fast {
                apply_provider(&mut self.llm.fast, fast);
            }
            if let Some(deep) = llm.deep {
                apply_provider(&mut self.llm.deep, deep);
            }
            if let Some(timeout_ms) = llm.timeout_ms {
                self.llm.http.timeout_ms = timeout_ms;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.retry.max_retries = max_retries;
            }
        }
        if let Some(pipeline) = file.pipeline {
            if let Some(limit) = pipeline.max_concurrent_analysis {
                self.pipeline.max_concurrent_analysis = limit;
            }
            if let Some(threshold) = pipeline.forward_threshold {
                self.pipeline.forward_threshold = threshold;
            }
        }
        if let Some(path) = file.local_memory_path {
            self.local_memory_path = Some(PathBuf::from(path));
        }
    }
}

fn apply_provider(settings: &mut ProviderSettings, file: ConfigFileProvider) {
    if let Some(tag) = file.provider {
        if let Some(kind) = ProviderKind::parse(&tag) {
            settings.kind = kind;
        }
    }
    if let Some(model) = file.model {
        settings.model = model;
    }
    if let Some(base_url) = file.base_url {
        settings.base_url = Some(base_url);
    }
    if let Some(command) = file.command {
        settings.command = Some(command);
    }
    if let Some(args) = file.args {
        settings.args = args;
    }
}

fn env_keys(var: &str, kind: ProviderKind) -> Vec<String> {
    if let Ok(v) = std::env::var(var) {
        let keys: Vec<String> = v
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();
        if !keys.is_empty() {
            return keys;
        }
    }
    let fallback = match kind {
        ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        ProviderKind::OpenAi => "OPENAI_API_KEY",
        ProviderKind::DeepSeek => "DEEPSEEK_API_KEY",
        ProviderKind::CliAgent => return Vec::new(),
    };
    std::env::var(fallback).map(|k| vec![k]).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MarketsiftConfig::default();
        assert!((config.dedup.semantic_threshold - 0.92).abs() < f32::EPSILON);
        assert_eq!(config.analysis.max_tool_calls, 3);
        assert_eq!(config.memory.max_notes, 5);
    }

    #[test]
    fn test_load_toml_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
local_memory_path = "/tmp/marketsift.db"

[dedup]
semantic_threshold = 0.95
cache_capacity = 1024

[signal_dedup]
similarity_threshold = 0.7

[analysis]
max_tool_calls = 5
critical_keywords = ["hack", "halt"]

[llm]
timeout_ms = 10000

[llm.fast]
provider = "openai"
model = "gpt-4o-mini"

[llm.deep]
provider = "cli_agent"
command = "claude"
args = ["-p"]

[pipeline]
max_concurrent_analysis = 4
"#
        )
        .unwrap();

        let config = MarketsiftConfig::load(file.path()).unwrap();
        assert!((config.dedup.semantic_threshold - 0.95).abs() < f32::EPSILON);
        assert_eq!(config.dedup.cache_capacity, 1024);
        assert!((config.signal_dedup.similarity_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.analysis.max_tool_calls, 5);
        assert_eq!(config.analysis.critical_keywords, vec!["hack", "halt"]);
        assert_eq!(config.llm.http.timeout_ms, 10_000);
        assert_eq!(config.llm.fast.kind, ProviderKind::OpenAi);
        assert_eq!(config.llm.fast.model, "gpt-4o-mini");
        assert_eq!(config.llm.deep.kind, ProviderKind::CliAgent);
        assert_eq!(config.llm.deep.command.as_deref(), Some("claude"));
        assert_eq!(config.pipeline.max_concurrent_analysis, 4);
        assert_eq!(
            config.local_memory_path.as_deref(),
            Some(Path::new("/tmp/marketsift.db"))
        );
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(MarketsiftConfig::load(Path::new("/nonexistent/config.toml")).is_err());
    }

    #[test]
    fn test_load_malformed_toml_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is [[ not toml").unwrap();
        assert!(MarketsiftConfig::load(file.path()).is_err());
    }
}
