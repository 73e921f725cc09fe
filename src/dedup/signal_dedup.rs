//! Signal-level deduplication.
//!
//! Runs after analysis, on generated summaries rather than raw text:
//! differently-phrased reports of the same real-world event arriving from
//! different sources must still collapse to one forwarded signal.
//!
//! Two summaries are duplicates only when all three hold:
//! - normalized text similarity ratio ≥ threshold,
//! - overlap (longest common subsequence) ≥ a minimum character count, and
//! - core metadata matches: `action`, `direction`, and the set of asset
//!   codes.
//!
//! `event_type` is deliberately excluded (providers label the same event
//! inconsistently) and `asset_names` differences are ignored.

use crate::models::{Action, Direction, SignalResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // static pattern, validated by tests
    Regex::new(r"https?://\S+|www\.\S+").unwrap()
});

/// Price-like tokens: optional approximation/currency marker, a number,
/// and an optional magnitude suffix. Matched wholesale so `$98M` leaves no
/// residue behind.
static PRICE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // static pattern, validated by tests
    Regex::new(r"[~≈]?[$€£]?\d[\d.,]*\s*(?:million|billion|trillion|bn|mm|usd|[kmbt])?\b")
        .unwrap()
});

/// Configuration for the post-analysis signal deduplicator.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `MARKETSIFT_SIGNAL_DEDUP_THRESHOLD` | f32 | `0.68` | Similarity ratio threshold |
/// | `MARKETSIFT_SIGNAL_DEDUP_MIN_OVERLAP` | usize | `20` | Minimum overlap chars |
/// | `MARKETSIFT_SIGNAL_DEDUP_WINDOW_MINUTES` | u64 | `180` | Rolling window |
#[derive(Debug, Clone)]
pub struct SignalDedupConfig {
    /// Similarity ratio threshold in `[0.0, 1.0]`.
    pub similarity_threshold: f32,
    /// Minimum common-subsequence length; avoids false positives on short
    /// strings.
    pub min_overlap_chars: usize,
    /// Rolling window length in minutes.
    pub window_minutes: u64,
}

impl SignalDedupConfig {
    /// Creates a configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("MARKETSIFT_SIGNAL_DEDUP_THRESHOLD") {
            if let Ok(threshold) = v.parse() {
                config.similarity_threshold = threshold;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_SIGNAL_DEDUP_MIN_OVERLAP") {
            if let Ok(chars) = v.parse() {
                config.min_overlap_chars = chars;
            }
        }
        if let Ok(v) = std::env::var("MARKETSIFT_SIGNAL_DEDUP_WINDOW_MINUTES") {
            if let Ok(minutes) = v.parse() {
                config.window_minutes = minutes;
            }
        }
        config
    }

    /// Builder method to set the similarity threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Builder method to set the minimum overlap length.
    #[must_use]
    pub const fn with_min_overlap(mut self, chars: usize) -> Self {
        self.min_overlap_chars = chars;
        self
    }

    /// Builder method to set the rolling window.
    #[must_use]
    pub const fn with_window_minutes(mut self, minutes: u64) -> Self {
        self.window_minutes = minutes;
        self
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.window_minutes * 60)
    }
}

impl Default for SignalDedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.68,
            min_overlap_chars: 20,
            window_minutes: 180,
        }
    }
}

/// Normalizes a summary for comparison.
///
/// Strips URLs, price-like tokens (number plus magnitude suffix), leftover
/// digits, and punctuation; lowercases and collapses whitespace. Volatile
/// tokens like `$98M` vs `$116M` vanish entirely, suffix included, so two
/// phrasings of the same event converge.
#[must_use]
pub fn normalize_summary(text: &str) -> String {
    let without_urls = URL_PATTERN.replace_all(text, " ").to_lowercase();
    let without_prices = PRICE_PATTERN.replace_all(&without_urls, " ");
    let filtered: String = without_prices
        .chars()
        .map(|c| {
            if c.is_alphabetic() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Length of the longest common subsequence between two char sequences.
fn lcs_length(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    // Two-row DP keeps memory linear in the shorter string.
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut prev = vec![0usize; short.len() + 1];
    let mut curr = vec![0usize; short.len() + 1];
    for &lc in long {
        for (j, &sc) in short.iter().enumerate() {
            curr[j + 1] = if lc == sc {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[short.len()]
}

/// Similarity ratio between two normalized strings.
///
/// `2 * LCS / (len_a + len_b)`, the same shape as Python's
/// `SequenceMatcher.ratio()`. Returns `(ratio, overlap_len)`.
#[must_use]
pub fn similarity_ratio(a: &str, b: &str) -> (f32, usize) {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let total = a_chars.len() + b_chars.len();
    if total == 0 {
        return (1.0, 0);
    }
    let overlap = lcs_length(&a_chars, &b_chars);
    #[allow(clippy::cast_precision_loss)]
    let ratio = (2.0 * overlap as f32) / total as f32;
    (ratio, overlap)
}

struct SeenSignal {
    normalized: String,
    action: Action,
    direction: Direction,
    assets: BTreeSet<String>,
    seen_at: Instant,
}

/// Near-duplicate detector over post-analysis summaries.
///
/// Window entries older than `window_minutes` are purged lazily on each
/// check; the window is protected by a `Mutex` because signals from
/// concurrent pipelines arrive interleaved.
pub struct SignalDeduplicator {
    config: SignalDedupConfig,
    window: Mutex<VecDeque<SeenSignal>>,
}

impl SignalDeduplicator {
    /// Creates a new deduplicator.
    #[must_use]
    pub fn new(config: SignalDedupConfig) -> Self {
        Self {
            config,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Checks a signal against the rolling window and records it if new.
    ///
    /// Returns `true` if the signal duplicates one already in the window.
    pub fn check_and_record(&self, signal: &SignalResult) -> bool {
        let normalized = normalize_summary(&signal.summary);
        let assets: BTreeSet<String> = signal.asset_codes().into_iter().collect();
        let now = Instant::now();
        let window = self.config.window();

        let Ok(mut seen) = self.window.lock() else {
            return false;
        };

        while seen
            .front()
            .is_some_and(|s| now.duration_since(s.seen_at) > window)
        {
            seen.pop_front();
        }

        for prior in seen.iter() {
            if prior.action != signal.action
                || prior.direction != signal.direction
                || prior.assets != assets
            {
                continue;
            }
            let (ratio, overlap) = similarity_ratio(&prior.normalized, &normalized);
            if ratio >= self.config.similarity_threshold
                && overlap >= self.config.min_overlap_chars
            {
                tracing::info!(
                    ratio,
                    overlap,
                    assets = ?assets,
                    "signal-level duplicate detected"
                );
                metrics::counter!("signal_dedup_duplicates_total").increment(1);
                return true;
            }
        }

        seen.push_back(SeenSignal {
            normalized,
            action: signal.action,
            direction: signal.direction,
            assets,
            seen_at: now,
        });
        false
    }

    /// Number of signals currently held in the window.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.window.lock().map(|w| w.len()).unwrap_or(0)
    }
}
