//! Durable dedup store backend.
//!
//! The persistent gates (exact canonical-hash lookup and semantic
//! nearest-neighbor) query an external store through the [`DedupStore`]
//! trait. The store is a black box; the HTTP implementation here speaks a
//! small JSON contract.

use crate::models::{EventHashes, RawEvent};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a previously stored event.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredEventRef {
    /// Store-assigned event identifier.
    pub event_id: String,
    /// When the stored event was recorded.
    pub created_at: DateTime<Utc>,
}

/// Best nearest-neighbor match for an embedding query.
#[derive(Debug, Clone, Deserialize)]
pub struct NearestMatch {
    /// Store-assigned event identifier.
    pub event_id: String,
    /// Cosine similarity to the query embedding, in `[0.0, 1.0]`.
    pub similarity: f32,
    /// When the matched event was recorded.
    pub created_at: DateTime<Utc>,
}

/// Durable storage consulted by the persistent dedup gates.
///
/// Implementations must be cheap to share (`Arc`) across concurrent
/// pipelines. All methods are best-effort from the caller's perspective:
/// [`super::DedupService`] treats every error as "no duplicate found".
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Looks up an event by canonical hash.
    async fn find_exact(&self, canonical_hash: &str) -> Result<Option<StoredEventRef>>;

    /// Finds the single best nearest-neighbor within the time window.
    ///
    /// Ties are irrelevant; only the best match is needed.
    async fn find_nearest(
        &self,
        embedding: &[f32],
        window_hours: u32,
    ) -> Result<Option<NearestMatch>>;

    /// Records an event that passed all gates, so later reposts match.
    async fn record(
        &self,
        event: &RawEvent,
        hashes: &EventHashes,
        embedding: Option<&[f32]>,
    ) -> Result<()>;
}

#[derive(Serialize)]
struct ExactRequest<'a> {
    canonical_hash: &'a str,
}

#[derive(Deserialize)]
struct ExactResponse {
    #[serde(rename = "match")]
    matched: Option<StoredEventRef>,
}

#[derive(Serialize)]
struct NearestRequest<'a> {
    embedding: &'a [f32],
    window_hours: u32,
}

#[derive(Deserialize)]
struct NearestResponse {
    #[serde(rename = "match")]
    matched: Option<NearestMatch>,
}

#[derive(Serialize)]
struct RecordRequest<'a> {
    source_id: &'a str,
    channel: &'a str,
    text: &'a str,
    published_at: DateTime<Utc>,
    raw_hash: &'a str,
    canonical_hash: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding: Option<&'a [f32]>,
}

/// HTTP-backed dedup store client.
pub struct HttpDedupStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpDedupStore {
    /// Creates a new client against the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
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

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        operation: &str,
        body: &B,
    ) -> Result<R> {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("request error: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::OperationFailed {
                operation: operation.to_string(),
                cause: format!("API returned status {status}"),
            });
        }

        response.json().await.map_err(|e| Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("decode error: {e}"),
        })
    }
}

#[async_trait]
impl DedupStore for HttpDedupStore {
    async fn find_exact(&self, canonical_hash: &str) -> Result<Option<StoredEventRef>> {
        let response: ExactResponse = self
            .post(
                "/dedup/exact",
                "dedup_find_exact",
                &ExactRequest { canonical_hash },
            )
            .await?;
        Ok(response.matched)
    }

    async fn find_nearest(
        &self,
        embedding: &[f32],
        window_hours: u32,
    ) -> Result<Option<NearestMatch>> {
        let response: NearestResponse = self
            .post(
                "/dedup/nearest",
                "dedup_find_nearest",
                &NearestRequest {
                    embedding,
                    window_hours,
                },
            )
            .await?;
        Ok(response.matched)
    }

    async fn record(
        &self,
        event: &RawEvent,
        hashes: &EventHashes,
        embedding: Option<&[f32]>,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .post(
                "/dedup/events",
                "dedup_record",
                &RecordRequest {
                    source_id: &event.source_id,
                    channel: &event.channel,
                    text: &event.text,
                    published_at: event.published_at,
                    raw_hash: &hashes.raw,
                    canonical_hash: &hashes.canonical,
                    embedding,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_response_decodes_match() {
        let json = r#"{"match": {"event_id": "e1", "created_at": "2026-08-01T00:00:00Z"}}"#;
        let response: ExactResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.matched.unwrap().event_id, "e1");
    }

    #[test]
    fn test_exact_response_decodes_no_match() {
        let response: ExactResponse = serde_json::from_str(r#"{"match": null}"#).unwrap();
        assert!(response.matched.is_none());
    }

    #[test]
    fn test_nearest_response_decodes() {
        let json =
            r#"{"match": {"event_id": "e2", "similarity": 0.94, "created_at": "2026-08-01T00:00:00Z"}}"#;
        let response: NearestResponse = serde_json::from_str(json).unwrap();
        let matched = response.matched.unwrap();
        assert!((matched.similarity - 0.94).abs() < f32::EPSILON);
    }

    #[test]
    fn test_record_request_skips_missing_embedding() {
        let request = RecordRequest {
            source_id: "1",
            channel: "c",
            text: "t",
            published_at: Utc::now(),
            raw_hash: "r",
            canonical_hash: "c",
            embedding: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("embedding"));
    }
}
