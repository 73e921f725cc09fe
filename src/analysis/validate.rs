//! Response parsing and post-validation corrections.

use super::AnalysisConfig;
use super::prompts::RawSignalResponse;
use crate::llm::extract_json;
use crate::models::{
    ASSET_NONE, Action, Direction, EventType, RiskFlag, SignalResult, SignalStatus, Strength,
};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static ASSET_CODE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Z0-9]{2,10}$").unwrap()
});

/// Tickers that match the code pattern but are not tradable crypto assets.
static DENY_LIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Fiat
        "USD", "EUR", "GBP", "JPY", "CNY", "KRW", "CHF", "RUB", "AUD", "CAD",
        // Equities and indices the models keep suggesting
        "AAPL", "TSLA", "NVDA", "MSFT", "GOOG", "GOOGL", "AMZN", "META", "COIN", "MSTR", "SPY",
        "QQQ", "SP500", "NASDAQ", "DXY", "GOLD", "SILVER", "OIL",
    ]
    .into_iter()
    .collect()
});

/// Reconciles a model-proposed asset field against the code pattern and
/// deny list. Returns the cleaned comma-joined asset string, `"NONE"` when
/// nothing plausible survives.
#[must_use]
pub fn reconcile_assets(raw_asset: &str) -> String {
    let mut seen = HashSet::new();
    let codes: Vec<String> = raw_asset
        .split(',')
        .map(|c| c.trim().to_uppercase())
        .filter(|c| {
            !c.is_empty()
                && c != ASSET_NONE
                && ASSET_CODE.is_match(c)
                && !DENY_LIST.contains(c.as_str())
                && seen.insert(c.clone())
        })
        .collect();
    if codes.is_empty() {
        ASSET_NONE.to_string()
    } else {
        codes.join(",")
    }
}

/// Parses a model response into a signal, then validates and corrects it.
///
/// # Errors
///
/// Returns [`Error::ParseFailed`] when no JSON object can be decoded;
/// callers degrade to a skip result rather than propagating.
pub fn parse_signal(response: &str, config: &AnalysisConfig) -> Result<SignalResult> {
    let json = extract_json(response);
    let raw: RawSignalResponse =
        serde_json::from_str(json).map_err(|e| Error::ParseFailed {
            context: "signal_response".to_string(),
            cause: format!("{e}; response: {}", response.chars().take(200).collect::<String>()),
        })?;

    let mut signal = SignalResult {
        status: SignalStatus::Skip,
        summary: raw.summary,
        event_type: EventType::parse(&raw.event_type),
        asset: raw.asset,
        asset_names: raw.asset_names,
        action: Action::parse(&raw.action),
        direction: Direction::parse(&raw.direction),
        confidence: raw.confidence,
        strength: Strength::parse(&raw.strength),
        risk_flags: raw
            .risk_flags
            .iter()
            .filter_map(|f| RiskFlag::parse(f))
            .collect(),
        notes: raw.notes,
        links: raw.links,
    };
    apply_corrections(&mut signal, config);
    Ok(signal)
}

/// Applies the post-validation corrections and determines status.
///
/// Order matters: asset reconciliation can turn a confident buy into an
/// asset-less observe, which the caution cap then bounds.
pub fn apply_corrections(signal: &mut SignalResult, config: &AnalysisConfig) {
    signal.asset = reconcile_assets(&signal.asset);
    signal.set_confidence(signal.confidence);

    let cautioned = signal.has_no_asset()
        || signal.has_risk_flag(RiskFlag::StaleEvent)
        || signal.has_risk_flag(RiskFlag::NotYetIssued);
    if cautioned {
        signal.action = Action::Observe;
        if signal.confidence > config.caution_cap {
            signal.set_confidence(config.caution_cap);
        }
    }

    signal.status = if signal.status == SignalStatus::Error {
        SignalStatus::Error
    } else if signal.confidence >= config.success_threshold && !signal.has_no_asset() {
        SignalStatus::Success
    } else {
        SignalStatus::Skip
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("BTC", "BTC")]
    #[test_case("btc, eth", "BTC,ETH")]
    #[test_case("BTC, BTC, ETH", "BTC,ETH"; "dedups repeated codes")]
    #[test_case("TSLA", "NONE"; "deny list equity")]
    #[test_case("USD, EUR", "NONE"; "deny list fiat")]
    #[test_case("TSLA, SOL", "SOL"; "mixed keeps crypto")]
    #[test_case("", "NONE")]
    #[test_case("NONE", "NONE")]
    #[test_case("this is not a ticker", "NONE")]
    #[test_case("X", "NONE"; "too short")]
    fn test_reconcile_assets(input: &str, expected: &str) {
        assert_eq!(reconcile_assets(input), expected);
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig::default()
    }

    #[test]
    fn test_parse_valid_response() {
        let response = r#"```json
        {"summary": "Exchange lists XYZ", "event_type": "listing", "asset": "XYZ",
         "action": "buy", "direction": "up", "confidence": 0.8, "strength": "high"}
        ```"#;
        let signal = parse_signal(response, &config()).unwrap();
        assert_eq!(signal.status, SignalStatus::Success);
        assert_eq!(signal.event_type, EventType::Listing);
        assert_eq!(signal.asset, "XYZ");
        assert_eq!(signal.action, Action::Buy);
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_signal("no json here at all", &config()).is_err());
    }

    #[test]
    fn test_none_asset_forced_to_observe_and_capped() {
        let mut signal = SignalResult {
            asset: ASSET_NONE.to_string(),
            action: Action::Buy,
            confidence: 0.8,
            ..SignalResult::default()
        };
        apply_corrections(&mut signal, &config());
        assert_eq!(signal.action, Action::Observe);
        assert!(signal.confidence <= 0.40);
        assert_eq!(signal.status, SignalStatus::Skip);
    }

    #[test]
    fn test_stale_event_forced_to_observe_and_capped() {
        let mut signal = SignalResult {
            asset: "BTC".to_string(),
            action: Action::Sell,
            confidence: 0.9,
            risk_flags: vec![RiskFlag::StaleEvent],
            ..SignalResult::default()
        };
        apply_corrections(&mut signal, &config());
        assert_eq!(signal.action, Action::Observe);
        assert!((signal.confidence - 0.40).abs() < f32::EPSILON);
    }

    #[test]
    fn test_not_yet_issued_capped() {
        let mut signal = SignalResult {
            asset: "NEWTOKEN".to_string(),
            action: Action::Buy,
            confidence: 0.7,
            risk_flags: vec![RiskFlag::NotYetIssued],
            ..SignalResult::default()
        };
        apply_corrections(&mut signal, &config());
        assert_eq!(signal.action, Action::Observe);
        assert!(signal.confidence <= 0.40);
    }

    #[test]
    fn test_low_caution_confidence_not_raised() {
        let mut signal = SignalResult {
            asset: ASSET_NONE.to_string(),
            confidence: 0.2,
            ..SignalResult::default()
        };
        apply_corrections(&mut signal, &config());
        assert!((signal.confidence - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_low_confidence_is_skip() {
        let mut signal = SignalResult {
            asset: "BTC".to_string(),
            confidence: 0.3,
            ..SignalResult::default()
        };
        apply_corrections(&mut signal, &config());
        assert_eq!(signal.status, SignalStatus::Skip);
    }

    #[test]
    fn test_deny_listed_asset_demotes_confident_buy() {
        let mut signal = SignalResult {
            asset: "TSLA".to_string(),
            action: Action::Buy,
            confidence: 0.85,
            ..SignalResult::default()
        };
        apply_corrections(&mut signal, &config());
        assert_eq!(signal.asset, ASSET_NONE);
        assert_eq!(signal.action, Action::Observe);
        assert!(signal.confidence <= 0.40);
    }

    #[test]
    fn test_confidence_out_of_range_clamped() {
        let response =
            r#"{"summary": "x", "asset": "BTC", "action": "buy", "confidence": 1.8}"#;
        let signal = parse_signal(response, &config()).unwrap();
        assert!((signal.confidence - 1.0).abs() < f32::EPSILON);
    }
}
