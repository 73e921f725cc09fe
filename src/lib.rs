//! # Marketsift
//!
//! Real-time crypto news signal pipeline.
//!
//! Marketsift ingests short text events from a messaging source, drops
//! near-duplicate and previously-seen events across three increasingly
//! expensive gates, enriches survivors with historically similar cases,
//! classifies them through pluggable AI reasoning backends, and forwards
//! qualifying signals downstream.
//!
//! ## Architecture
//!
//! ```text
//! normalize → in-memory dedup → persistent hash → persistent semantic
//!     → translate → keywords → memory fetch → fast analysis
//!     → confidence gate → (deep analysis) → signal dedup → forward
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use marketsift::pipeline::Pipeline;
//! use marketsift::models::RawEvent;
//!
//! let outcome = pipeline.process(RawEvent::new("1", "news-feed", "...", now)).await;
//! if outcome.forwarded {
//!     println!("signal: {:?}", outcome.signal);
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

// Module declarations
pub mod analysis;
pub mod config;
pub mod dedup;
pub mod embedding;
pub mod llm;
pub mod memory;
pub mod models;
pub mod pipeline;
pub mod tools;

// Re-exports for convenience
pub use config::MarketsiftConfig;
pub use embedding::Embedder;
pub use llm::LlmProvider;
pub use models::{
    Action, Direction, EventType, MemoryContext, MemoryEntry, RawEvent, RiskFlag, SignalResult,
    SignalStatus, Strength,
};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineStats};

/// Error type for marketsift operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Taxonomy
///
/// | Class | Variants | Handling |
/// |-------|----------|----------|
/// | Transient | `Timeout`, `RateLimited`, retryable `OperationFailed` | retried with backoff |
/// | Exhaustion | `QuotaExhausted`, `CircuitOpen` | skipped, never retried in-request |
/// | Data | `ParseFailed` | degraded low-confidence result |
/// | Permanent | `Unauthorized`, `InvalidInput` | fails fast |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when backend queries fail, HTTP requests error out, or a
    /// subprocess exits abnormally. Whether the failure is retryable is
    /// decided by [`Error::is_transient`] from the recorded cause.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// An outbound call exceeded its deadline.
    #[error("operation '{operation}' timed out after {elapsed_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// Elapsed time before the deadline fired.
        elapsed_ms: u64,
    },

    /// The provider returned a rate-limit response (HTTP 429).
    #[error("provider '{provider}' rate limited")]
    RateLimited {
        /// The provider that rejected the call.
        provider: String,
    },

    /// A model response could not be parsed into the expected schema.
    #[error("failed to parse {context}: {cause}")]
    ParseFailed {
        /// What was being parsed.
        context: String,
        /// The underlying cause.
        cause: String,
    },

    /// A daily tool quota is exhausted; the call was skipped.
    #[error("daily quota exhausted for tool '{tool}'")]
    QuotaExhausted {
        /// The tool whose quota ran out.
        tool: String,
    },

    /// A circuit breaker is in cooldown; the call was rejected immediately.
    #[error("provider '{provider}' in cooldown for {retry_after_secs}s")]
    CircuitOpen {
        /// The provider under cooldown.
        provider: String,
        /// Seconds until the cooldown window expires.
        retry_after_secs: u64,
    },

    /// Authentication failed or credentials are missing.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl Error {
    /// Returns true if the error is transient and worth retrying.
    ///
    /// Timeouts and rate limits are always transient. `OperationFailed`
    /// is inspected for transport-level failure signatures and 5xx status
    /// markers recorded by the HTTP clients.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::OperationFailed { cause, .. } => {
                let lower = cause.to_lowercase();
                lower.contains("timeout")
                    || lower.contains("timed out")
                    || lower.contains("connection")
                    || lower.contains("connect error")
                    || lower.contains("status 5")
                    || lower.contains("unavailable")
            },
            _ => false,
        }
    }

    /// Returns true for exhaustion errors that must not be retried
    /// within the same request.
    #[must_use]
    pub const fn is_exhaustion(&self) -> bool {
        matches!(self, Self::QuotaExhausted { .. } | Self::CircuitOpen { .. })
    }
}

/// Result type alias for marketsift operations.
pub type Result<T> = std::result::Result<T, Error>;
