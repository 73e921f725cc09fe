//! Pipeline controller: per-event stage sequencing and stats.
//!
//! One logical pipeline run per inbound event, many runs concurrent,
//! bounded by a semaphore around the fast-path AI call. Stage order:
//! dedup gates, translate, keyword extraction, memory fetch, fast
//! analysis, optional deep escalation, signal-level dedup, forward.

use crate::analysis::SignalOrchestrator;
use crate::dedup::{ContentHasher, DedupService, SignalDeduplicator};
use crate::embedding::{Embedder, NoopEmbedder};
use crate::memory::{MemoryQuery, MemoryService};
use crate::models::{RawEvent, SignalResult, SignalStatus};
use crate::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tracing::instrument;

/// Translation of one event text.
#[derive(Debug, Clone)]
pub struct Translation {
    /// Translated (or passed-through) text.
    pub text: String,
    /// Detected source language tag.
    pub language: String,
    /// Translator confidence.
    pub confidence: f32,
}

/// Trait for translators.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translates the text to English.
    async fn translate(&self, text: &str) -> Result<Translation>;
}

/// Pass-through translator for already-English feeds.
pub struct IdentityTranslator;

#[async_trait]
impl Translator for IdentityTranslator {
    async fn translate(&self, text: &str) -> Result<Translation> {
        Ok(Translation {
            text: text.to_string(),
            language: "en".to_string(),
            confidence: 1.0,
        })
    }
}

/// Trait for forwarding sinks.
#[async_trait]
pub trait SignalSink: Send + Sync {
    /// Delivers formatted signal text. Returns whether delivery happened.
    async fn deliver(&self, formatted: &str) -> Result<bool>;
}

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "with", "that", "this", "its", "has", "have", "had", "was", "are",
        "were", "been", "will", "would", "can", "could", "from", "into", "over", "under", "after",
        "before", "about", "just", "now", "new", "more", "than", "out", "all", "but", "not", "you",
        "they", "their", "his", "her", "who", "what", "when", "where", "why", "how", "also", "per",
        "via", "amid", "says", "said",
    ]
    .into_iter()
    .collect()
});

/// Extracts up to `max` query keywords from translated event text.
///
/// Keeps first occurrence order; drops stop words and short tokens.
#[must_use]
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() >= 3 && !STOP_WORDS.contains(w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .take(max)
        .collect()
}

/// Why an event produced no forwarded signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Caught by a dedup gate before analysis.
    DuplicateEvent,
    /// Post-analysis signal matched a recently forwarded one.
    DuplicateSignal,
    /// Analysis produced a legitimately low-value result.
    LowValue,
    /// Confidence below the forwarding threshold.
    BelowForwardThreshold,
}

impl SkipReason {
    /// Stable tag for logs and stats.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateEvent => "duplicate_event",
            Self::DuplicateSignal => "duplicate_signal",
            Self::LowValue => "low_value",
            Self::BelowForwardThreshold => "below_forward_threshold",
        }
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Final status.
    pub status: SignalStatus,
    /// Whether the signal was delivered to the sink.
    pub forwarded: bool,
    /// The signal, when analysis ran.
    pub signal: Option<SignalResult>,
    /// Why nothing was forwarded, when applicable.
    pub skip_reason: Option<SkipReason>,
}

impl PipelineOutcome {
    fn skipped(reason: SkipReason, signal: Option<SignalResult>) -> Self {
        Self {
            status: SignalStatus::Skip,
            forwarded: false,
            signal,
            skip_reason: Some(reason),
        }
    }
}

/// Monotonic event counters for the health surface.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    duplicates: AtomicU64,
    filtered: AtomicU64,
    forwarded: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Events received.
    pub received: u64,
    /// Events dropped by any dedup gate (event or signal level).
    pub duplicates: u64,
    /// Events analyzed but not forwarded (low value, below threshold).
    pub filtered: u64,
    /// Signals delivered to the sink.
    pub forwarded: u64,
    /// Events whose analysis failed with no usable fallback.
    pub errors: u64,
}

impl PipelineStats {
    /// Takes a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Configuration for the pipeline controller.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `MARKETSIFT_PIPELINE_MAX_CONCURRENT` | usize | `8` | Concurrent fast-path AI calls |
/// | `MARKETSIFT_PIPELINE_FORWARD_THRESHOLD` | f32 | `0.45` | Minimum confidence to forward |
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent fast-path AI calls allowed.
    pub max_concurrent_analysis: usize,
    /// Minimum confidence for forwarding a successful signal.
    pub forward_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_analysis: 8,
            forward_threshold: 0.45,
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("MARKETSIFT_PIPELINE_MAX_CONCURRENT") {
            if let Ok(n) = v.parse() {
                config.max_concurrent_analysis = n;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_PIPELINE_FORWARD_THRESHOLD") {
            if let Ok(t) = v.parse() {
                config.forward_threshold = t;
            }
        }
        config
    }
}

/// The per-event processing pipeline.
pub struct Pipeline {
    dedup: Arc<DedupService>,
    signal_dedup: Arc<SignalDeduplicator>,
    memory: Arc<MemoryService>,
    orchestrator: Arc<SignalOrchestrator>,
    embedder: Arc<dyn Embedder>,
    translator: Arc<dyn Translator>,
    sink: Option<Arc<dyn SignalSink>>,
    analysis_permits: Semaphore,
    stats: PipelineStats,
    config: PipelineConfig,
}

impl Pipeline {
    /// Creates a pipeline with pass-through translation, no embedding, and
    /// no sink.
    #[must_use]
    pub fn new(
        dedup: Arc<DedupService>,
        signal_dedup: Arc<SignalDeduplicator>,
        memory: Arc<MemoryService>,
        orchestrator: Arc<SignalOrchestrator>,
        config: PipelineConfig,
    ) -> Self {
        let permits = config.max_concurrent_analysis.max(1);
        Self {
            dedup,
            signal_dedup,
            memory,
            orchestrator,
            embedder: Arc::new(NoopEmbedder::new()),
            translator: Arc::new(IdentityTranslator),
            sink: None,
            analysis_permits: Semaphore::new(permits),
            stats: PipelineStats::default(),
            config,
        }
    }

    /// Attaches an embedder, enabling the semantic dedup gate and vector
    /// retrieval.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    /// Attaches a translator.
    #[must_use]
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    /// Attaches a forwarding sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn SignalSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Current counter values.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Processes one inbound event through every stage.
    ///
    /// Never fails: every outcome, including analysis errors, is a
    /// [`PipelineOutcome`] and is accounted for in stats.
    #[instrument(skip_all, fields(source = %event.source_id, channel = %event.channel))]
    pub async fn process(&self, event: &RawEvent) -> PipelineOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("pipeline_events_total", "stage" => "received").increment(1);

        let hashes = ContentHasher::hash_event(&event.text);
        let embedding = match self.embedder.embed(&event.text).await {
            Ok(vector) if !vector.is_empty() => Some(vector),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, "embedding failed, semantic stages disabled");
                None
            },
        };

        let check = self.dedup.check(&hashes, embedding.as_deref()).await;
        if check.is_duplicate {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                reason = %check.reason.map(|r| r.to_string()).unwrap_or_default(),
                matched = check.matched_event_id.as_deref().unwrap_or(""),
                "event dropped as duplicate"
            );
            metrics::counter!("pipeline_events_total", "stage" => "duplicate").increment(1);
            return PipelineOutcome::skipped(SkipReason::DuplicateEvent, None);
        }
        // Record immediately so concurrent near-identical events collide.
        self.dedup.record(event, &hashes, embedding.as_deref()).await;

        let translation = match self.translator.translate(&event.text).await {
            Ok(translation) => translation,
            Err(err) => {
                tracing::warn!(error = %err, "translation failed, using original text");
                Translation {
                    text: event.text.clone(),
                    language: "unknown".to_string(),
                    confidence: 0.0,
                }
            },
        };
        let analyzed_event = RawEvent {
            text: translation.text,
            ..event.clone()
        };

        let keywords = extract_keywords(&analyzed_event.text, 8);
        let memory = self
            .memory
            .fetch(&MemoryQuery {
                embedding: embedding.clone(),
                keywords,
                assets: None,
            })
            .await;

        let signal = {
            // Bound concurrent fast-path calls; fail open if the
            // semaphore is closed.
            let _permit = self.analysis_permits.acquire().await.ok();
            self.orchestrator.analyze(&analyzed_event, &memory).await
        };

        match signal.status {
            SignalStatus::Error => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("pipeline_events_total", "stage" => "error").increment(1);
                PipelineOutcome {
                    status: SignalStatus::Error,
                    forwarded: false,
                    signal: Some(signal),
                    skip_reason: None,
                }
            },
            SignalStatus::Skip => {
                self.stats.filtered.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("pipeline_events_total", "stage" => "filtered").increment(1);
                PipelineOutcome::skipped(SkipReason::LowValue, Some(signal))
            },
            SignalStatus::Success => self.finish_success(signal).await,
        }
    }

    async fn finish_success(&self, signal: SignalResult) -> PipelineOutcome {
        if self.signal_dedup.check_and_record(&signal) {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            tracing::info!(asset = %signal.asset, "signal dropped as duplicate");
            metrics::counter!("pipeline_events_total", "stage" => "duplicate_signal")
                .increment(1);
            return PipelineOutcome::skipped(SkipReason::DuplicateSignal, Some(signal));
        }

        if signal.confidence < self.config.forward_threshold {
            self.stats.filtered.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("pipeline_events_total", "stage" => "filtered").increment(1);
            return PipelineOutcome::skipped(SkipReason::BelowForwardThreshold, Some(signal));
        }

        let mut forwarded = false;
        if let Some(sink) = &self.sink {
            match sink.deliver(&format_signal(&signal)).await {
                Ok(delivered) => forwarded = delivered,
                Err(err) => {
                    tracing::error!(error = %err, "sink delivery failed");
                    metrics::counter!("pipeline_sink_errors_total").increment(1);
                },
            }
        }
        if forwarded {
            self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("pipeline_events_total", "stage" => "forwarded").increment(1);
        } else {
            self.stats.filtered.fetch_add(1, Ordering::Relaxed);
        }

        PipelineOutcome {
            status: SignalStatus::Success,
            forwarded,
            signal: Some(signal),
            skip_reason: None,
        }
    }
}

/// Renders a signal as forwarding text.
#[must_use]
pub fn format_signal(signal: &SignalResult) -> String {
    let mut out = format!(
        "[{}] {} | {} {} | confidence {:.2} ({})\n{}",
        signal.event_type.as_str().to_uppercase(),
        signal.asset,
        signal.action.as_str(),
        signal.direction.as_str(),
        signal.confidence,
        signal.strength.as_str(),
        signal.summary,
    );
    if !signal.risk_flags.is_empty() {
        let flags: Vec<&str> = signal.risk_flags.iter().map(|f| f.as_str()).collect();
        out.push_str(&format!("\nrisks: {}", flags.join(", ")));
    }
    if let Some(notes) = &signal.notes {
        out.push_str(&format!("\nnotes: {notes}"));
    }
    for link in &signal.links {
        out.push_str(&format!("\n{link}"));
    }
    out
}
