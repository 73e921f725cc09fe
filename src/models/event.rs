//! Inbound event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw text event received from the messaging source.
///
/// Immutable once ingested; every pipeline stage reads it, none mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Source-assigned message identifier.
    pub source_id: String,
    /// Channel the message was published on.
    pub channel: String,
    /// The untouched message text.
    pub text: String,
    /// Publish timestamp reported by the source.
    pub published_at: DateTime<Utc>,
}

impl RawEvent {
    /// Creates a new raw event.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        channel: impl Into<String>,
        text: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            channel: channel.into(),
            text: text.into(),
            published_at,
        }
    }
}

/// Stable digests of an event's text, computed once at ingestion.
///
/// `raw` digests the untouched text; `canonical` digests the text after
/// stripping URLs and all whitespace so link-wrapped reposts still match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHashes {
    /// SHA-256 of the untouched text.
    pub raw: String,
    /// SHA-256 of the canonicalized text.
    pub canonical: String,
}
