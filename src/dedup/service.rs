//! Deduplication gate orchestrator.
//!
//! Evaluates the three gates in order of cost, short-circuiting on the
//! first positive match. The embedding is computed once upstream by the
//! pipeline and passed in, so the semantic gate never embeds on its own.

use super::config::DedupConfig;
use super::recent::RecentEventCache;
use super::store::DedupStore;
use super::{DuplicateCheckResult, DuplicateReason};
use crate::models::{EventHashes, RawEvent};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Three-gate pre-analysis duplicate checker.
///
/// # Failure policy
///
/// Persistent-gate lookups are fail-open: a store error is logged and
/// treated as "no duplicate found". The pipeline must never stall or drop a
/// legitimate event because the dedup backend is unreachable.
pub struct DedupService {
    config: DedupConfig,
    recent: RecentEventCache,
    store: Option<Arc<dyn DedupStore>>,
}

impl DedupService {
    /// Creates a service with only the in-memory gate active.
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        let recent = RecentEventCache::new(config.cache_capacity, config.memory_window);
        Self {
            config,
            recent,
            store: None,
        }
    }

    /// Attaches the durable store, enabling the persistent gates.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DedupStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Checks all gates in order; returns on the first positive match.
    ///
    /// `embedding` enables the semantic gate; `None` (or an empty slice)
    /// skips it.
    #[instrument(skip_all, fields(raw_hash = %hashes.raw))]
    #[allow(clippy::cast_possible_truncation)]
    pub async fn check(
        &self,
        hashes: &EventHashes,
        embedding: Option<&[f32]>,
    ) -> DuplicateCheckResult {
        let start = Instant::now();

        // Gate 1: in-memory raw-hash window.
        if self.recent.seen(&hashes.raw) {
            let duration_ms = start.elapsed().as_millis() as u64;
            tracing::debug!(duration_ms, "duplicate: recent event");
            Self::count_duplicate(DuplicateReason::RecentEvent);
            return DuplicateCheckResult::recent(duration_ms);
        }

        let Some(store) = &self.store else {
            return DuplicateCheckResult::not_duplicate(start.elapsed().as_millis() as u64);
        };

        // Gate 2: exact canonical-hash lookup.
        match store.find_exact(&hashes.canonical).await {
            Ok(Some(stored)) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::info!(
                    event_id = %stored.event_id,
                    duration_ms,
                    "duplicate: exact canonical match"
                );
                Self::count_duplicate(DuplicateReason::ExactMatch);
                return DuplicateCheckResult::exact(Some(stored.event_id), duration_ms);
            },
            Ok(None) => {},
            Err(e) => {
                tracing::warn!(error = %e, "exact dedup lookup failed, continuing (fail-open)");
                metrics::counter!("dedup_store_errors_total", "gate" => "exact").increment(1);
            },
        }

        // Gate 3: semantic nearest-neighbor within the time window.
        let Some(embedding) = embedding.filter(|e| !e.is_empty()) else {
            return DuplicateCheckResult::not_duplicate(start.elapsed().as_millis() as u64);
        };

        match store
            .find_nearest(embedding, self.config.semantic_window_hours)
            .await
        {
            Ok(Some(nearest)) if nearest.similarity >= self.config.semantic_threshold => {
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::info!(
                    event_id = %nearest.event_id,
                    similarity = nearest.similarity,
                    threshold = self.config.semantic_threshold,
                    duration_ms,
                    "duplicate: semantic match"
                );
                Self::count_duplicate(DuplicateReason::SemanticSimilar);
                DuplicateCheckResult::semantic(
                    Some(nearest.event_id),
                    nearest.similarity,
                    duration_ms,
                )
            },
            Ok(_) => DuplicateCheckResult::not_duplicate(start.elapsed().as_millis() as u64),
            Err(e) => {
                tracing::warn!(error = %e, "semantic dedup lookup failed, continuing (fail-open)");
                metrics::counter!("dedup_store_errors_total", "gate" => "semantic").increment(1);
                DuplicateCheckResult::not_duplicate(start.elapsed().as_millis() as u64)
            },
        }
    }

    /// Records an event that passed all gates.
    ///
    /// Store failures are logged and swallowed; a missed record only means
    /// a later repost might not match.
    pub async fn record(&self, event: &RawEvent, hashes: &EventHashes, embedding: Option<&[f32]>) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.record(event, hashes, embedding).await {
            tracing::warn!(error = %e, "failed to record event in dedup store");
            metrics::counter!("dedup_store_errors_total", "gate" => "record").increment(1);
        }
    }

    fn count_duplicate(reason: DuplicateReason) {
        metrics::counter!(
            "dedup_duplicates_total",
            "reason" => reason.to_string()
        )
        .increment(1);
    }
}
