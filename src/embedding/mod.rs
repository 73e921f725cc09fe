//! Embedding generation.
//!
//! The embedding provider is a black box behind the [`Embedder`] trait: an
//! HTTP implementation speaking the common `/embeddings` contract, and a
//! noop fallback that disables vector features (semantic dedup gate and
//! vector memory retrieval) without failing the pipeline.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Trait for embedding generators.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensionality (0 when embedding is disabled).
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// An empty vector means "no embedding available"; callers skip
    /// vector-dependent stages in that case.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-magnitude inputs.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Fallback embedder that returns empty vectors.
///
/// Used when no embedding provider is configured; the pipeline degrades to
/// keyword-only retrieval and skips the semantic dedup gate.
pub struct NoopEmbedder;

impl NoopEmbedder {
    /// Creates a new noop embedder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for NoopEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for NoopEmbedder {
    fn dimensions(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// HTTP embedder speaking the OpenAI-style `/embeddings` contract.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    /// Default embedding dimensionality.
    pub const DEFAULT_DIMENSIONS: usize = 1536;

    /// Creates a new HTTP embedder.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            dimensions: Self::DEFAULT_DIMENSIONS,
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the expected dimensionality.
    #[must_use]
    pub const fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| Error::OperationFailed {
            operation: "embed".to_string(),
            cause: format!("request error: {e}"),
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimited {
                provider: "embedder".to_string(),
            });
        }
        if !status.is_success() {
            return Err(Error::OperationFailed {
                operation: "embed".to_string(),
                cause: format!("API returned status {status}"),
            });
        }

        let body: EmbeddingResponse =
            response.json().await.map_err(|e| Error::OperationFailed {
                operation: "embed".to_string(),
                cause: format!("decode error: {e}"),
            })?;

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::OperationFailed {
                operation: "embed".to_string(),
                cause: "empty embedding response".to_string(),
            })
    }
}
