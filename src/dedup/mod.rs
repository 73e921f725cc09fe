//! Multi-stage deduplication engine.
//!
//! Three independent, increasingly expensive gates evaluated in order, with
//! short-circuit on the first positive match:
//!
//! 1. **In-memory gate**: raw-text digest in a TTL'd LRU cache.
//! 2. **Exact persistent gate**: canonical hash lookup in durable storage.
//! 3. **Semantic persistent gate**: embedding nearest-neighbor within a
//!    time window, cosine similarity against a threshold.
//!
//! Any persistent-gate failure is fail-open: the pipeline never stalls or
//! drops a legitimate event because the dedup backend is unreachable.
//!
//! A second, independent deduplicator ([`SignalDeduplicator`]) runs after
//! analysis on generated summaries, collapsing differently-phrased reports
//! of the same real-world event.

mod config;
mod hasher;
mod recent;
mod service;
mod signal_dedup;
mod store;

pub use config::DedupConfig;
pub use hasher::ContentHasher;
pub use recent::RecentEventCache;
pub use service::DedupService;
pub use signal_dedup::{SignalDedupConfig, SignalDeduplicator, normalize_summary, similarity_ratio};
pub use store::{DedupStore, HttpDedupStore, NearestMatch, StoredEventRef};

use serde::{Deserialize, Serialize};

/// Result of a pre-analysis duplicate check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCheckResult {
    /// Whether the event is a duplicate.
    pub is_duplicate: bool,
    /// Which gate matched.
    pub reason: Option<DuplicateReason>,
    /// Cosine similarity for semantic matches.
    pub similarity: Option<f32>,
    /// Identifier of the matched stored event, when known.
    pub matched_event_id: Option<String>,
    /// Duration of the whole check in milliseconds.
    pub check_duration_ms: u64,
}

impl DuplicateCheckResult {
    /// Creates a result indicating no duplicate was found.
    #[must_use]
    pub const fn not_duplicate(duration_ms: u64) -> Self {
        Self {
            is_duplicate: false,
            reason: None,
            similarity: None,
            matched_event_id: None,
            check_duration_ms: duration_ms,
        }
    }

    /// Creates a result for an in-memory (recent event) match.
    #[must_use]
    pub const fn recent(duration_ms: u64) -> Self {
        Self {
            is_duplicate: true,
            reason: Some(DuplicateReason::RecentEvent),
            similarity: None,
            matched_event_id: None,
            check_duration_ms: duration_ms,
        }
    }

    /// Creates a result for an exact canonical-hash match.
    #[must_use]
    pub const fn exact(event_id: Option<String>, duration_ms: u64) -> Self {
        Self {
            is_duplicate: true,
            reason: Some(DuplicateReason::ExactMatch),
            similarity: None,
            matched_event_id: event_id,
            check_duration_ms: duration_ms,
        }
    }

    /// Creates a result for a semantic nearest-neighbor match.
    #[must_use]
    pub const fn semantic(event_id: Option<String>, similarity: f32, duration_ms: u64) -> Self {
        Self {
            is_duplicate: true,
            reason: Some(DuplicateReason::SemanticSimilar),
            similarity: Some(similarity),
            matched_event_id: event_id,
            check_duration_ms: duration_ms,
        }
    }
}

/// Which dedup gate flagged the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    /// Raw-text digest seen within the in-memory TTL window.
    RecentEvent,
    /// Canonical hash found in durable storage.
    ExactMatch,
    /// Embedding similarity above threshold within the time window.
    SemanticSimilar,
}

impl std::fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecentEvent => write!(f, "recent_event"),
            Self::ExactMatch => write!(f, "exact_match"),
            Self::SemanticSimilar => write!(f, "semantic_similar"),
        }
    }
}
