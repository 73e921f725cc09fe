//! Retrieved-memory types: historically similar past cases.

use super::Action;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Which backend produced a memory entry.
///
/// Ordering matters for tie-breaks: primary hits win over secondary hits,
/// which win over local-fallback hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    /// Primary hybrid vector+keyword backend.
    Primary,
    /// Secondary vector-only backend.
    Secondary,
    /// Local keyword-indexed fallback store.
    Local,
}

impl MemorySource {
    /// Tie-break rank; lower sorts first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
            Self::Local => 2,
        }
    }

    /// Returns the source as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Local => "local",
        }
    }
}

/// How a hybrid backend matched an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Embedding nearest-neighbor match.
    Vector,
    /// Keyword / text match.
    Keyword,
}

/// One historically similar past case.
///
/// Produced by retrieval, read-only afterward; lives for one pipeline
/// invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Backend-assigned identifier.
    pub id: String,
    /// When the past case was recorded.
    pub created_at: DateTime<Utc>,
    /// Asset codes the past case concerned.
    pub assets: Vec<String>,
    /// Action taken (or recommended) in the past case, if recorded.
    pub action: Option<Action>,
    /// Confidence recorded for the past case, in `[0.0, 1.0]`.
    pub confidence: f32,
    /// Similarity to the current event, in `[0.0, 1.0]`.
    ///
    /// For local-fallback hits this is a neutral constant, not a computed
    /// value; callers must not treat it as a true similarity score.
    pub similarity: f32,
    /// Summary text of the past case.
    pub summary: String,
    /// Which backend produced this entry.
    pub source: MemorySource,
    /// How the backend matched it.
    pub match_type: MatchType,
}

/// Ordered collection of retrieved memory entries.
///
/// Capped at the coordinator's `max_notes`, sorted by similarity descending
/// with recency and source-rank tie-breaks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryContext {
    /// The retrieved entries, best first.
    pub entries: Vec<MemoryEntry>,
}

impl MemoryContext {
    /// Creates an empty context.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns true if no entries were retrieved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Renders the context as a numbered block for inclusion in a prompt.
    #[must_use]
    pub fn render_for_prompt(&self) -> String {
        if self.entries.is_empty() {
            return "No similar historical cases found.".to_string();
        }
        let mut out = String::new();
        for (i, entry) in self.entries.iter().enumerate() {
            let action = entry.action.map_or("unknown", |a| a.as_str());
            let _ = writeln!(
                out,
                "{}. [{}] assets={} action={} confidence={:.2} similarity={:.2}\n   {}",
                i + 1,
                entry.created_at.format("%Y-%m-%d"),
                if entry.assets.is_empty() {
                    "-".to_string()
                } else {
                    entry.assets.join(",")
                },
                action,
                entry.confidence,
                entry.similarity,
                entry.summary.trim()
            );
        }
        out
    }
}
