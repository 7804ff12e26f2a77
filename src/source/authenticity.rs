//! Source authenticity re-check.
//!
//! Optional post-pass over a classification result. Downgrades confidence
//! when the request looks automated or carries implausible campaign tags:
//! - Bot or tooling User-Agent
//! - Oversized UTM values
//! - UTM source contradicting a recognized referrer

use super::TrafficSourceDetectionResult;
use crate::catalog::CompiledCatalog;
use crate::config::SourceConfig;
use crate::signals::RequestSignals;
use crate::source::TrafficSource;
use serde::{Deserialize, Serialize};

const AUTOMATED_UA_PENALTY: u8 = 30;
const OVERSIZED_UTM_PENALTY: u8 = 20;
const REFERRER_MISMATCH_PENALTY: u8 = 15;

/// Outcome of the authenticity re-check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticityReport {
    /// Source with adjusted confidence and authenticity verdict
    pub source: TrafficSource,
    pub original_confidence: u8,
    pub adjusted_confidence: u8,
    pub flags: Vec<String>,
    pub is_authentic: bool,
}

/// Re-check a classification against signals that undermine it.
pub fn validate_source_authenticity(
    result: &TrafficSourceDetectionResult,
    signals: &RequestSignals,
    catalog: &CompiledCatalog,
    config: &SourceConfig,
) -> AuthenticityReport {
    let mut flags = Vec::new();
    let mut penalty = 0u8;

    let ua = signals.user_agent.as_str();
    let automated = ua.is_empty()
        || catalog.match_known_bot(ua).is_some()
        || catalog.suspicious_markers(&signals.user_agent_lower).next().is_some();
    if automated {
        flags.push("automated_user_agent".to_string());
        penalty = penalty.saturating_add(AUTOMATED_UA_PENALTY);
    }

    for (key, value) in signals.utm.fields() {
        if value.chars().count() > config.max_utm_length {
            flags.push(format!("oversized_{}", key));
            penalty = penalty.saturating_add(OVERSIZED_UTM_PENALTY);
        }
    }

    if let (Some(utm_source), Some(host)) = (signals.utm.source.as_deref(), signals.referrer_host.as_deref()) {
        let utm_source = utm_source.to_lowercase();
        let referrer_owner = catalog
            .search_engines
            .iter()
            .chain(&catalog.social_networks)
            .chain(&catalog.ai_assistants)
            .find(|sig| sig.matches_referrer(host));

        if let Some(sig) = referrer_owner {
            let name = sig.name.to_lowercase();
            if !name.contains(&utm_source) && !utm_source.contains(&name) {
                flags.push("utm_referrer_mismatch".to_string());
                penalty = penalty.saturating_add(REFERRER_MISMATCH_PENALTY);
            }
        }
    }

    let original = result.confidence;
    let adjusted = original.saturating_sub(penalty);
    let is_authentic = adjusted >= config.authenticity_threshold && flags.len() <= config.max_authenticity_flags;

    AuthenticityReport {
        source: result.source.with_verdict(adjusted, is_authentic),
        original_confidence: original,
        adjusted_confidence: adjusted,
        flags,
        is_authentic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{RawRequest, SignalExtractor};
    use crate::source::SourceClassifier;

    fn check(referrer: Option<&str>, ua: Option<&str>, url: &str) -> AuthenticityReport {
        let mut raw = RawRequest::new("10.0.0.1", url, "2024-05-01T10:00:00Z".parse().unwrap());
        raw.referrer = referrer.map(str::to_string);
        raw.user_agent = ua.map(str::to_string);
        let signals = SignalExtractor::new().extract(&raw);
        let classifier = SourceClassifier::with_defaults();
        let result = classifier.classify(&signals);
        validate_source_authenticity(&result, &signals, classifier.catalog(), classifier.config())
    }

    #[test]
    fn test_clean_request_is_authentic() {
        let report = check(
            Some("https://www.google.com/"),
            Some("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"),
            "https://example.com/",
        );
        assert!(report.flags.is_empty());
        assert!(report.is_authentic);
        assert_eq!(report.adjusted_confidence, report.original_confidence);
    }

    #[test]
    fn test_tooling_ua_downgraded() {
        let report = check(None, Some("curl/8.0"), "https://example.com/");
        assert!(report.flags.contains(&"automated_user_agent".to_string()));
        assert_eq!(report.adjusted_confidence, 65);
        assert!(report.is_authentic);
    }

    #[test]
    fn test_oversized_utm_not_authentic() {
        let long = "x".repeat(150);
        let url = format!(
            "https://example.com/?utm_source={}&utm_medium={}&utm_campaign={}",
            long, long, long
        );
        let report = check(None, Some("python-requests/2.31"), &url);
        assert_eq!(report.flags.len(), 4);
        assert!(!report.is_authentic);
        assert!(!report.source.is_authentic);
        assert_eq!(report.source.confidence, 10);
    }

    #[test]
    fn test_referrer_mismatch() {
        let report = check(
            Some("https://www.facebook.com/"),
            Some("Mozilla/5.0"),
            "https://example.com/?utm_source=google&utm_medium=organic",
        );
        assert!(report.flags.contains(&"utm_referrer_mismatch".to_string()));
        assert_eq!(report.adjusted_confidence, 85);
    }
}
