//! Deduplication configuration.

use std::time::Duration;

/// Configuration for the pre-analysis deduplication gates.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `MARKETSIFT_DEDUP_WINDOW_SECS` | u64 | `3600` | In-memory gate TTL |
/// | `MARKETSIFT_DEDUP_CACHE_CAPACITY` | usize | `4096` | In-memory gate capacity |
/// | `MARKETSIFT_DEDUP_SEMANTIC_THRESHOLD` | f32 | `0.92` | Cosine similarity threshold |
/// | `MARKETSIFT_DEDUP_SEMANTIC_WINDOW_HOURS` | u32 | `24` | Semantic gate time window |
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// TTL for the in-memory raw-hash gate.
    pub memory_window: Duration,
    /// Capacity of the in-memory gate's LRU cache.
    pub cache_capacity: usize,
    /// Cosine similarity threshold for the semantic gate.
    pub semantic_threshold: f32,
    /// Time window for the semantic nearest-neighbor query, in hours.
    pub semantic_window_hours: u32,
}

impl DedupConfig {
    /// Creates a configuration from environment variables, falling back to
    /// defaults for any unset variable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("MARKETSIFT_DEDUP_WINDOW_SECS") {
            if let Ok(secs) = v.parse() {
                config.memory_window = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_DEDUP_CACHE_CAPACITY") {
            if let Ok(capacity) = v.parse() {
                config.cache_capacity = capacity;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_DEDUP_SEMANTIC_THRESHOLD") {
            if let Ok(threshold) = v.parse() {
                config.semantic_threshold = threshold;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_DEDUP_SEMANTIC_WINDOW_HOURS") {
            if let Ok(hours) = v.parse() {
                config.semantic_window_hours = hours;
            }
        }
        config
    }

    /// Builder method to set the in-memory window.
    #[must_use]
    pub const fn with_memory_window(mut self, window: Duration) -> Self {
        self.memory_window = window;
        self
    }

    /// Builder method to set the semantic similarity threshold.
    #[must_use]
    pub const fn with_semantic_threshold(mut self, threshold: f32) -> Self {
        self.semantic_threshold = threshold;
        self
    }

    /// Builder method to set the semantic time window in hours.
    #[must_use]
    pub const fn with_semantic_window_hours(mut self, hours: u32) -> Self {
        self.semantic_window_hours = hours;
        self
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            memory_window: Duration::from_secs(3600),
            cache_capacity: 4096,
            semantic_threshold: 0.92,
            semantic_window_hours: 24,
        }
    }
}
