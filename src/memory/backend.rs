//! Search backend traits and HTTP implementations.
//!
//! The primary backend answers a single hybrid query (vector + keyword);
//! the secondary backend answers vector-only queries. Both are black boxes
//! behind traits so tests inject stubs and deployments mix providers.

use crate::models::{Action, MatchType};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A hybrid search request carried to the primary backend.
#[derive(Debug, Clone, Serialize, Default)]
pub struct HybridSearchRequest {
    /// Optional query embedding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Optional keyword list.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Minimum vector similarity for vector matches.
    pub similarity_threshold: f32,
    /// Minimum recorded confidence for returned cases.
    pub min_confidence: f32,
    /// Recency window in hours.
    pub time_window_hours: u32,
    /// Maximum hits to return.
    pub match_count: usize,
    /// Optional asset-code filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_filter: Option<Vec<String>>,
}

/// One tagged hit returned by a search backend.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    /// Backend-assigned identifier of the underlying past event.
    pub event_id: String,
    /// Whether the hit matched by vector or keyword.
    pub match_type: MatchType,
    /// Vector similarity, when `match_type == Vector`.
    #[serde(default)]
    pub similarity: Option<f32>,
    /// Keyword score, when `match_type == Keyword`.
    #[serde(default)]
    pub keyword_score: Option<f32>,
    /// Backend-combined score used for its own ordering.
    pub combined_score: f32,
    /// Summary text of the past case.
    pub content: String,
    /// When the past case was recorded.
    pub created_at: DateTime<Utc>,
    /// Asset codes of the past case.
    #[serde(default)]
    pub assets: Vec<String>,
    /// Action recorded for the past case.
    #[serde(default)]
    pub action: Option<Action>,
    /// Confidence recorded for the past case.
    #[serde(default)]
    pub confidence: f32,
}

/// Primary backend: one hybrid vector+keyword query.
#[async_trait]
pub trait HybridSearchBackend: Send + Sync {
    /// Issues the hybrid query and returns tagged hits.
    async fn hybrid_search(&self, request: &HybridSearchRequest) -> Result<Vec<SearchHit>>;
}

/// Secondary backend: vector-only queries.
#[async_trait]
pub trait VectorSearchBackend: Send + Sync {
    /// Returns nearest-neighbor hits above the threshold.
    async fn vector_search(
        &self,
        embedding: &[f32],
        similarity_threshold: f32,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Vec<SearchHit>,
}

#[derive(Serialize)]
struct VectorRequest<'a> {
    embedding: &'a [f32],
    similarity_threshold: f32,
    limit: usize,
}

/// HTTP client used for both backend roles.
///
/// Construct one per configured base URL; the same wire contract serves
/// `hybrid_search` (`/search/hybrid`) and `vector_search` (`/search/vector`).
pub struct HttpSearchBackend {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSearchBackend {
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

    async fn post<B: Serialize>(&self, path: &str, operation: &str, body: &B) -> Result<Vec<SearchHit>> {
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

        let body: SearchResponse = response.json().await.map_err(|e| Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("decode error: {e}"),
        })?;
        Ok(body.hits)
    }
}

#[async_trait]
impl HybridSearchBackend for HttpSearchBackend {
    async fn hybrid_search(&self, request: &HybridSearchRequest) -> Result<Vec<SearchHit>> {
        self.post("/search/hybrid", "hybrid_search", request).await
    }
}

#[async_trait]
impl VectorSearchBackend for HttpSearchBackend {
    async fn vector_search(
        &self,
        embedding: &[f32],
        similarity_threshold: f32,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.post(
            "/search/vector",
            "vector_search",
            &VectorRequest {
                embedding,
                similarity_threshold,
                limit,
            },
        )
        .await
    }
}
