//! Content hashing for deduplication.
//!
//! Produces two digests per event: a raw hash of the untouched text and a
//! canonical hash computed after stripping volatile substrings, so that
//! link-wrapped or re-spaced reposts of the same text still collide.

use crate::models::EventHashes;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // static pattern, validated by tests
    Regex::new(r"https?://\S+|www\.\S+").unwrap()
});

/// Content hasher for the deduplication gates.
///
/// # Canonicalization
///
/// - Remove URLs (`http://`, `https://`, `www.`)
/// - Lowercase
/// - Remove **all** whitespace
///
/// Unlike ordinary normalization, whitespace is removed entirely rather than
/// collapsed: reposts frequently re-wrap lines, and within the dedup window a
/// false positive is cheaper than a missed repost.
///
/// # Example
///
/// ```rust
/// use marketsift::dedup::ContentHasher;
///
/// let a = ContentHasher::canonical_hash("BTC ETF approved! https://t.co/abc123");
/// let b = ContentHasher::canonical_hash("BTC  ETF\napproved! https://example.com/xyz");
/// assert_eq!(a, b);
/// ```
pub struct ContentHasher;

impl ContentHasher {
    /// Computes the SHA-256 digest of the untouched text.
    #[must_use]
    pub fn raw_hash(text: &str) -> String {
        Self::digest(text)
    }

    /// Computes the SHA-256 digest of the canonicalized text.
    #[must_use]
    pub fn canonical_hash(text: &str) -> String {
        Self::digest(&Self::canonicalize(text))
    }

    /// Computes both digests at once.
    #[must_use]
    pub fn hash_event(text: &str) -> EventHashes {
        EventHashes {
            raw: Self::raw_hash(text),
            canonical: Self::canonical_hash(text),
        }
    }

    /// Canonicalizes text: strips URLs, lowercases, removes all whitespace.
    #[must_use]
    pub fn canonicalize(text: &str) -> String {
        let without_urls = URL_PATTERN.replace_all(text, "");
        without_urls
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect()
    }

    fn digest(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_hash_is_64_hex_chars() {
        let hash = ContentHasher::raw_hash("Balancer exploited for $98M");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_raw_hash_is_exact() {
        // Raw hash must distinguish even whitespace differences.
        let a = ContentHasher::raw_hash("BTC up");
        let b = ContentHasher::raw_hash("BTC  up");
        assert_ne!(a, b);
    }

    #[test]
    fn test_canonical_strips_urls() {
        let a = ContentHasher::canonical_hash("SEC approves ETF https://t.co/abcd");
        let b = ContentHasher::canonical_hash("SEC approves ETF https://news.example/xyz?q=1");
        let c = ContentHasher::canonical_hash("SEC approves ETF");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_canonical_strips_all_whitespace() {
        let a = ContentHasher::canonical_hash("BTC breaks\n100k today");
        let b = ContentHasher::canonical_hash("BTC breaks 100k   today");
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonical_case_insensitive() {
        let a = ContentHasher::canonical_hash("Binance Lists XYZ");
        let b = ContentHasher::canonical_hash("binance lists xyz");
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonical_www_urls() {
        let canonical = ContentHasher::canonicalize("read more www.example.com/a/b");
        assert_eq!(canonical, "readmore");
    }

    #[test]
    fn test_different_text_differs() {
        let a = ContentHasher::canonical_hash("BTC up");
        let b = ContentHasher::canonical_hash("ETH up");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_event_both_fields() {
        let hashes = ContentHasher::hash_event("some event https://x.com/1");
        assert_eq!(hashes.raw.len(), 64);
        assert_eq!(hashes.canonical.len(), 64);
        assert_ne!(hashes.raw, hashes.canonical);
    }

    #[test]
    fn test_unicode_preserved() {
        let canonical = ContentHasher::canonicalize("币安 上线 XYZ");
        assert!(canonical.contains("币安"));
        assert!(!canonical.contains(' '));
    }
}
