//! Hybrid memory retrieval.
//!
//! The coordinator issues one hybrid query against the primary backend, an
//! optional vector query against the secondary backend, merges and ranks
//! the results, and falls back to a local keyword store when both remote
//! backends come back empty or unavailable.
//!
//! The public contract never fails: every backend error is caught, logged,
//! and treated as an empty result from that backend. The orchestrator
//! always receives *a* context, possibly empty.

mod backend;
mod local;

pub use backend::{
    HttpSearchBackend, HybridSearchBackend, HybridSearchRequest, SearchHit, VectorSearchBackend,
};
pub use local::{LocalMemoryStore, NEUTRAL_SIMILARITY};

use crate::models::{MemoryContext, MemoryEntry, MemorySource};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Configuration for the memory retrieval coordinator.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `MARKETSIFT_MEMORY_MAX_NOTES` | usize | `5` | Context cap |
/// | `MARKETSIFT_MEMORY_SIMILARITY_THRESHOLD` | f32 | `0.55` | Primary vector threshold |
/// | `MARKETSIFT_MEMORY_MIN_CONFIDENCE` | f32 | `0.3` | Minimum recorded confidence |
/// | `MARKETSIFT_MEMORY_WINDOW_HOURS` | u32 | `72` | Recency window |
/// | `MARKETSIFT_MEMORY_SECONDARY_THRESHOLD` | f32 | `0.6` | Secondary vector threshold |
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum entries in a returned context.
    pub max_notes: usize,
    /// Vector similarity threshold for the primary hybrid query.
    pub similarity_threshold: f32,
    /// Minimum recorded confidence for returned cases.
    pub min_confidence: f32,
    /// Recency window in hours (primary and local).
    pub time_window_hours: u32,
    /// Vector similarity threshold for the secondary backend.
    pub secondary_threshold: f32,
    /// Result limit for the secondary backend.
    pub secondary_limit: usize,
}

impl MemoryConfig {
    /// Creates a configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("MARKETSIFT_MEMORY_MAX_NOTES") {
            if let Ok(n) = v.parse() {
                config.max_notes = n;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_MEMORY_SIMILARITY_THRESHOLD") {
            if let Ok(t) = v.parse() {
                config.similarity_threshold = t;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_MEMORY_MIN_CONFIDENCE") {
            if let Ok(c) = v.parse() {
                config.min_confidence = c;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_MEMORY_WINDOW_HOURS") {
            if let Ok(h) = v.parse() {
                config.time_window_hours = h;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_MEMORY_SECONDARY_THRESHOLD") {
            if let Ok(t) = v.parse() {
                config.secondary_threshold = t;
            }
        }
        config
    }

    /// Builder method to set the context cap.
    #[must_use]
    pub const fn with_max_notes(mut self, max_notes: usize) -> Self {
        self.max_notes = max_notes;
        self
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_notes: 5,
            similarity_threshold: 0.55,
            min_confidence: 0.3,
            time_window_hours: 72,
            secondary_threshold: 0.6,
            secondary_limit: 5,
        }
    }
}

/// Query input for one retrieval.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    /// Optional query embedding.
    pub embedding: Option<Vec<f32>>,
    /// Optional keyword list.
    pub keywords: Vec<String>,
    /// Optional asset-code filter.
    pub assets: Option<Vec<String>>,
}

/// Memory retrieval coordinator.
///
/// Degrades instead of failing: backends are optional, and each failure is
/// absorbed as an empty result from that backend.
pub struct MemoryService {
    primary: Option<Arc<dyn HybridSearchBackend>>,
    secondary: Option<Arc<dyn VectorSearchBackend>>,
    local: Option<Arc<LocalMemoryStore>>,
    config: MemoryConfig,
}

impl MemoryService {
    /// Creates a coordinator with no backends (always returns empty).
    #[must_use]
    pub const fn new(config: MemoryConfig) -> Self {
        Self {
            primary: None,
            secondary: None,
            local: None,
            config,
        }
    }

    /// Attaches the primary hybrid backend.
    #[must_use]
    pub fn with_primary(mut self, backend: Arc<dyn HybridSearchBackend>) -> Self {
        self.primary = Some(backend);
        self
    }

    /// Attaches the secondary vector backend.
    #[must_use]
    pub fn with_secondary(mut self, backend: Arc<dyn VectorSearchBackend>) -> Self {
        self.secondary = Some(backend);
        self
    }

    /// Attaches the local fallback store.
    #[must_use]
    pub fn with_local(mut self, store: Arc<LocalMemoryStore>) -> Self {
        self.local = Some(store);
        self
    }

    /// Fetches a memory context for the query. Never fails.
    #[instrument(skip_all, fields(
        has_embedding = query.embedding.is_some(),
        keyword_count = query.keywords.len()
    ))]
    pub async fn fetch(&self, query: &MemoryQuery) -> MemoryContext {
        let mut entries = Vec::new();

        if let Some(primary) = &self.primary {
            let request = HybridSearchRequest {
                embedding: query.embedding.clone().filter(|e| !e.is_empty()),
                keywords: query.keywords.clone(),
                similarity_threshold: self.config.similarity_threshold,
                min_confidence: self.config.min_confidence,
                time_window_hours: self.config.time_window_hours,
                match_count: self.config.max_notes,
                asset_filter: query.assets.clone(),
            };
            match primary.hybrid_search(&request).await {
                Ok(hits) => {
                    tracing::debug!(hits = hits.len(), "primary backend returned");
                    entries.extend(hits.into_iter().map(|h| to_entry(h, MemorySource::Primary)));
                },
                Err(e) => {
                    tracing::warn!(error = %e, "primary memory backend failed, continuing");
                    metrics::counter!("memory_backend_errors_total", "backend" => "primary")
                        .increment(1);
                },
            }
        }

        if let (Some(secondary), Some(embedding)) = (&self.secondary, &query.embedding) {
            if !embedding.is_empty() {
                match secondary
                    .vector_search(
                        embedding,
                        self.config.secondary_threshold,
                        self.config.secondary_limit,
                    )
                    .await
                {
                    Ok(hits) => {
                        tracing::debug!(hits = hits.len(), "secondary backend returned");
                        entries
                            .extend(hits.into_iter().map(|h| to_entry(h, MemorySource::Secondary)));
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "secondary memory backend failed, continuing");
                        metrics::counter!("memory_backend_errors_total", "backend" => "secondary")
                            .increment(1);
                    },
                }
            }
        }

        // Local fallback only when the remote backends yielded nothing.
        if entries.is_empty() && !query.keywords.is_empty() {
            if let Some(local) = &self.local {
                match local.search(
                    &query.keywords,
                    self.config.time_window_hours,
                    self.config.min_confidence,
                    self.config.max_notes,
                ) {
                    Ok(hits) => {
                        tracing::debug!(hits = hits.len(), "local fallback returned");
                        entries.extend(hits);
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "local memory store failed, returning empty");
                        metrics::counter!("memory_backend_errors_total", "backend" => "local")
                            .increment(1);
                    },
                }
            }
        }

        let context = merge_and_rank(entries, self.config.max_notes);
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("memory_context_entries").record(context.len() as f64);
        context
    }
}

fn to_entry(hit: SearchHit, source: MemorySource) -> MemoryEntry {
    let similarity = hit
        .similarity
        .unwrap_or(hit.combined_score)
        .clamp(0.0, 1.0);
    MemoryEntry {
        id: hit.event_id,
        created_at: hit.created_at,
        assets: hit.assets,
        action: hit.action,
        confidence: hit.confidence.clamp(0.0, 1.0),
        similarity,
        summary: hit.content,
        source,
        match_type: hit.match_type,
    }
}

/// Content hash used for cross-backend deduplication.
///
/// Hashes the whitespace-collapsed lowercase summary: the two backends may
/// describe the same underlying fact under different ids.
fn content_hash(summary: &str) -> String {
    let normalized = summary
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Merges entries from all backends: dedup by content hash (keep the
/// higher-similarity entry), sort by `(similarity desc, created_at desc,
/// primary-before-secondary-before-local)`, truncate to `max_notes`.
fn merge_and_rank(entries: Vec<MemoryEntry>, max_notes: usize) -> MemoryContext {
    let mut by_content: HashMap<String, MemoryEntry> = HashMap::with_capacity(entries.len());
    for entry in entries {
        let key = content_hash(&entry.summary);
        match by_content.get(&key) {
            Some(existing)
                if existing.similarity > entry.similarity
                    || (existing.similarity == entry.similarity
                        && existing.source.rank() <= entry.source.rank()) => {},
            _ => {
                by_content.insert(key, entry);
            },
        }
    }

    let mut merged: Vec<MemoryEntry> = by_content.into_values().collect();
    merged.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.source.rank().cmp(&b.source.rank()))
    });
    merged.truncate(max_notes);
    MemoryContext { entries: merged }
}
