//! Source classification cascade.

use super::{
    AiAssistantDetector, DetectionMethod, EmailDetector, PaidDetector, SearchEngineDetector,
    SocialMediaDetector, SourceDetector, SourceMatch, TrafficCategory, TrafficSource,
    TrafficSourceDetectionResult, UtmDetector,
};
use crate::catalog::CompiledCatalog;
use crate::config::SourceConfig;
use crate::signals::{RawRequest, RequestSignals, SignalExtractor, UtmParameters};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Confidence of the direct default when no referrer was present.
pub const DIRECT_CONFIDENCE: u8 = 95;
/// Confidence of the direct default when an unrecognized referrer was present.
pub const UNCLASSIFIED_CONFIDENCE: u8 = 60;

/// Runs the detector cascade in priority order.
pub struct SourceClassifier {
    catalog: Arc<CompiledCatalog>,
    config: SourceConfig,
    cascade: Vec<Box<dyn SourceDetector>>,
}

impl SourceClassifier {
    /// Create a classifier with the standard cascade:
    /// UTM, AI assistant, search engine, social, email, paid.
    pub fn new(catalog: Arc<CompiledCatalog>, config: SourceConfig) -> Self {
        let cascade: Vec<Box<dyn SourceDetector>> = vec![
            Box::new(UtmDetector::new()),
            Box::new(AiAssistantDetector::new(config.ai_min_confidence)),
            Box::new(SearchEngineDetector),
            Box::new(SocialMediaDetector),
            Box::new(EmailDetector),
            Box::new(PaidDetector),
        ];

        Self {
            catalog,
            config,
            cascade,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Arc::new(CompiledCatalog::default()), SourceConfig::default())
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn catalog(&self) -> &CompiledCatalog {
        &self.catalog
    }

    /// Classify a request. Never fails: unrecognized input falls through to
    /// the direct default.
    pub fn classify(&self, signals: &RequestSignals) -> TrafficSourceDetectionResult {
        let matched = self.cascade.iter().find_map(|detector| {
            let m = detector.detect(signals, &self.catalog)?;
            debug!(
                detector = detector.name(),
                source = %m.source,
                confidence = m.confidence,
                "Source detector matched"
            );
            Some(m)
        });

        let m = matched.unwrap_or_else(|| Self::default_match(signals));
        self.build_result(signals, m)
    }

    /// Classify from loose parts. Explicit UTM values take precedence over
    /// those parsed from the URL.
    pub fn classify_parts(
        &self,
        referrer: Option<&str>,
        user_agent: Option<&str>,
        url: &str,
        utm: &UtmParameters,
        at: DateTime<Utc>,
    ) -> TrafficSourceDetectionResult {
        let mut raw = RawRequest::new("", url, at);
        raw.referrer = referrer.map(str::to_string);
        raw.user_agent = user_agent.map(str::to_string);

        let mut signals = SignalExtractor::new().extract(&raw);
        signals.utm = utm.clone().merged_with(&signals.utm);
        self.classify(&signals)
    }

    fn default_match(signals: &RequestSignals) -> SourceMatch {
        match signals.referrer_host.as_deref() {
            None => SourceMatch::new(TrafficCategory::Direct, "direct", DIRECT_CONFIDENCE, DetectionMethod::Default),
            Some(host) => SourceMatch::new(
                TrafficCategory::Direct,
                host,
                UNCLASSIFIED_CONFIDENCE,
                DetectionMethod::Default,
            )
            .with_medium("unclassified"),
        }
    }

    fn build_result(&self, signals: &RequestSignals, m: SourceMatch) -> TrafficSourceDetectionResult {
        let source = TrafficSource {
            id: source_id(signals),
            category: m.category,
            medium: m
                .medium
                .unwrap_or_else(|| m.category.default_medium().to_string()),
            source: m.source,
            campaign: signals.utm.campaign.clone(),
            content: signals.utm.content.clone(),
            term: signals.utm.term.clone(),
            is_authentic: true,
            confidence: m.confidence,
            detected_at: signals.timestamp,
        };

        TrafficSourceDetectionResult {
            confidence: source.confidence,
            source,
            detection_method: m.method,
        }
    }
}

/// Deterministic id derived from the classifier inputs.
fn source_id(signals: &RequestSignals) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signals.referrer.as_deref().unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(signals.user_agent.as_bytes());
    hasher.update([0u8]);
    hasher.update(signals.url.as_bytes());
    for (key, value) in signals.utm.fields() {
        hasher.update([0u8]);
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        "2024-05-01T10:00:00Z".parse().unwrap()
    }

    fn classify(referrer: Option<&str>, ua: &str, url: &str) -> TrafficSourceDetectionResult {
        SourceClassifier::with_defaults().classify_parts(referrer, Some(ua), url, &UtmParameters::default(), at())
    }

    #[test]
    fn test_utm_organic() {
        let r = classify(None, "Mozilla/5.0", "https://example.com/?utm_source=google&utm_medium=organic");
        assert_eq!(r.source.category, TrafficCategory::Organic);
        assert_eq!(r.source.source, "google");
        assert_eq!(r.source.medium, "organic");
        assert_eq!(r.confidence, 100);
        assert_eq!(r.detection_method, DetectionMethod::UtmParameters);
    }

    #[test]
    fn test_utm_wins_over_referrer() {
        let r = classify(
            Some("https://chat.openai.com/"),
            "Mozilla/5.0",
            "https://example.com/?utm_source=newsletter&utm_medium=email",
        );
        assert_eq!(r.source.category, TrafficCategory::Email);
        assert_eq!(r.detection_method, DetectionMethod::UtmParameters);
    }

    #[test]
    fn test_webmail_referrer_beats_search_domain() {
        for referrer in ["https://mail.google.com/mail/u/0/", "https://mail.yahoo.com/d/folders/1"] {
            let r = classify(Some(referrer), "Mozilla/5.0", "https://example.com/");
            assert_eq!(r.source.category, TrafficCategory::Email, "{}", referrer);
            assert_eq!(r.detection_method, DetectionMethod::EmailReferrer);
            assert_eq!(r.source.medium, "email");
        }
        // the search homepage itself is still organic
        let r = classify(Some("https://www.google.com/"), "Mozilla/5.0", "https://example.com/");
        assert_eq!(r.source.category, TrafficCategory::Organic);
    }

    #[test]
    fn test_ai_assistant() {
        let r = classify(Some("https://chat.openai.com/"), "Mozilla/5.0", "https://example.com/");
        assert_eq!(r.source.category, TrafficCategory::AiAssistant);
        assert_eq!(r.source.source, "ChatGPT");
        assert!(r.confidence >= 70);
    }

    #[test]
    fn test_direct_default() {
        let r = classify(None, "Mozilla/5.0", "https://example.com/");
        assert_eq!(r.source.category, TrafficCategory::Direct);
        assert_eq!(r.confidence, 95);

        let r = classify(Some("https://some-blog.example.org/post"), "Mozilla/5.0", "https://example.com/");
        assert_eq!(r.source.category, TrafficCategory::Direct);
        assert_eq!(r.source.source, "some-blog.example.org");
        assert_eq!(r.confidence, 60);
    }

    #[test]
    fn test_explicit_utm_precedence() {
        let utm = UtmParameters {
            source: Some("facebook".into()),
            medium: Some("paid_social".into()),
            ..Default::default()
        };
        let r = SourceClassifier::with_defaults().classify_parts(
            None,
            None,
            "https://example.com/?utm_source=google",
            &utm,
            at(),
        );
        assert_eq!(r.source.source, "facebook");
        assert_eq!(r.source.category, TrafficCategory::Paid);
    }

    #[test]
    fn test_deterministic() {
        let a = classify(Some("https://www.bing.com/"), "Mozilla/5.0", "https://example.com/x");
        let b = classify(Some("https://www.bing.com/"), "Mozilla/5.0", "https://example.com/x");
        assert_eq!(a, b);
        assert_eq!(a.source.id.len(), 32);
    }
}
