//! Signal types: the structured classification produced for one event.

use serde::{Deserialize, Serialize};

/// Pipeline-level status of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    /// Actionable: confidence above threshold and a concrete asset resolved.
    Success,
    /// Legitimately low value: duplicate, low confidence, or no asset.
    #[default]
    Skip,
    /// The analysis itself failed with no usable fallback.
    Error,
}

impl SignalStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skip => "skip",
            Self::Error => "error",
        }
    }
}

/// Closed set of event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Exploit or theft against a protocol or exchange.
    Hack,
    /// Regulatory or legal development.
    Regulation,
    /// Exchange listing announcement.
    Listing,
    /// Exchange delisting announcement.
    Delisting,
    /// Partnership or integration announcement.
    Partnership,
    /// Funding round or treasury move.
    Funding,
    /// Macroeconomic news affecting the market broadly.
    Macro,
    /// Large on-chain transfer or holder activity.
    Whale,
    /// Protocol upgrade or technical milestone.
    Technical,
    /// Anything that fits no other category.
    #[default]
    Other,
}

impl EventType {
    /// Returns the event type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hack => "hack",
            Self::Regulation => "regulation",
            Self::Listing => "listing",
            Self::Delisting => "delisting",
            Self::Partnership => "partnership",
            Self::Funding => "funding",
            Self::Macro => "macro",
            Self::Whale => "whale",
            Self::Technical => "technical",
            Self::Other => "other",
        }
    }

    /// Parses an event type string; unknown labels map to `Other`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "hack" | "exploit" => Self::Hack,
            "regulation" | "regulatory" | "legal" => Self::Regulation,
            "listing" => Self::Listing,
            "delisting" => Self::Delisting,
            "partnership" => Self::Partnership,
            "funding" => Self::Funding,
            "macro" => Self::Macro,
            "whale" => Self::Whale,
            "technical" | "upgrade" => Self::Technical,
            _ => Self::Other,
        }
    }
}

/// Suggested market action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Open or increase a position.
    Buy,
    /// Close or reduce a position.
    Sell,
    /// Watch without acting.
    #[default]
    Observe,
}

impl Action {
    /// Returns the action as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Observe => "observe",
        }
    }

    /// Parses an action string; unknown labels map to `Observe`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "buy" | "long" => Self::Buy,
            "sell" | "short" => Self::Sell,
            _ => Self::Observe,
        }
    }
}

/// Expected price direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Upward pressure expected.
    Up,
    /// Downward pressure expected.
    Down,
    /// No clear directional read.
    #[default]
    Neutral,
}

impl Direction {
    /// Returns the direction as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Neutral => "neutral",
        }
    }

    /// Parses a direction string; unknown labels map to `Neutral`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "up" | "bullish" | "long" => Self::Up,
            "down" | "bearish" | "short" => Self::Down,
            _ => Self::Neutral,
        }
    }
}

/// Signal strength bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    /// Weak signal.
    #[default]
    Low,
    /// Moderate signal.
    Medium,
    /// Strong signal.
    High,
}

impl Strength {
    /// Returns the strength as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parses a strength string; unknown labels map to `Low`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" | "strong" => Self::High,
            "medium" | "moderate" => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Closed set of risk flags a model may attach to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    /// The event describes something that already played out.
    StaleEvent,
    /// The source is unverified or frequently wrong.
    UnverifiedSource,
    /// The asset trades thinly; execution risk is high.
    LowLiquidity,
    /// The report is rumor-grade.
    Rumor,
    /// The asset has been announced but not issued yet.
    NotYetIssued,
}

impl RiskFlag {
    /// Returns the flag as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StaleEvent => "stale_event",
            Self::UnverifiedSource => "unverified_source",
            Self::LowLiquidity => "low_liquidity",
            Self::Rumor => "rumor",
            Self::NotYetIssued => "not_yet_issued",
        }
    }

    /// Parses a flag string; unknown flags are dropped by the caller.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "stale_event" | "stale" => Some(Self::StaleEvent),
            "unverified_source" | "unverified" => Some(Self::UnverifiedSource),
            "low_liquidity" => Some(Self::LowLiquidity),
            "rumor" => Some(Self::Rumor),
            "not_yet_issued" | "unissued" => Some(Self::NotYetIssued),
            _ => None,
        }
    }
}

/// Sentinel asset code meaning "no concrete asset resolved".
pub const ASSET_NONE: &str = "NONE";

/// The structured classification produced for one event.
///
/// # Invariants
///
/// - `confidence` is always clamped to `[0.0, 1.0]`.
/// - `asset == "NONE"` forces `action == Observe` (enforced by
///   `analysis::validate`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SignalResult {
    /// Pipeline-level status.
    pub status: SignalStatus,
    /// One-paragraph summary of the event.
    pub summary: String,
    /// Event category.
    pub event_type: EventType,
    /// Asset code, or comma-separated codes, or `"NONE"`.
    pub asset: String,
    /// Human-readable asset names (informational only).
    #[serde(default)]
    pub asset_names: Vec<String>,
    /// Suggested action.
    pub action: Action,
    /// Expected direction.
    pub direction: Direction,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f32,
    /// Strength bucket.
    pub strength: Strength,
    /// Attached risk flags.
    #[serde(default)]
    pub risk_flags: Vec<RiskFlag>,
    /// Free-text notes / justification.
    #[serde(default)]
    pub notes: Option<String>,
    /// Source links.
    #[serde(default)]
    pub links: Vec<String>,
}

impl SignalResult {
    /// Splits the `asset` field into individual uppercase codes.
    ///
    /// `"NONE"` yields an empty list.
    #[must_use]
    pub fn asset_codes(&self) -> Vec<String> {
        if self.asset.is_empty() || self.asset == ASSET_NONE {
            return Vec::new();
        }
        self.asset
            .split(',')
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty() && c != ASSET_NONE)
            .collect()
    }

    /// Returns true if no concrete asset was resolved.
    #[must_use]
    pub fn has_no_asset(&self) -> bool {
        self.asset_codes().is_empty()
    }

    /// Returns true if the given risk flag is attached.
    #[must_use]
    pub fn has_risk_flag(&self, flag: RiskFlag) -> bool {
        self.risk_flags.contains(&flag)
    }

    /// Sets the confidence, clamping to `[0.0, 1.0]`.
    pub fn set_confidence(&mut self, confidence: f32) {
        self.confidence = confidence.clamp(0.0, 1.0);
    }

    /// Builds a degraded low-confidence skip result.
    ///
    /// Used when a model response cannot be parsed: the event is still
    /// accounted for, but nothing actionable is claimed.
    #[must_use]
    pub fn degraded(summary: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            status: SignalStatus::Skip,
            summary: summary.into(),
            asset: ASSET_NONE.to_string(),
            confidence: 0.1,
            notes: Some(cause.into()),
            ..Self::default()
        }
    }
}
