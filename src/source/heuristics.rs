//! Email and paid-advertising heuristics.

use super::{DetectionMethod, SourceDetector, SourceMatch, TrafficCategory};
use crate::catalog::CompiledCatalog;
use crate::signals::RequestSignals;

pub const EMAIL_CONFIDENCE: u8 = 90;
pub const PAID_CONFIDENCE: u8 = 95;

/// Detects visits arriving from webmail clients and newsletter platforms.
#[derive(Debug, Clone, Default)]
pub struct EmailDetector;

impl SourceDetector for EmailDetector {
    fn detect(&self, signals: &RequestSignals, catalog: &CompiledCatalog) -> Option<SourceMatch> {
        let referrer = signals.referrer.as_deref()?.to_lowercase();
        let platform = catalog
            .email_platforms
            .iter()
            .find(|p| referrer.contains(p.as_str()))?;

        let source = signals
            .referrer_host
            .clone()
            .unwrap_or_else(|| platform.clone());
        Some(
            SourceMatch::new(TrafficCategory::Email, source, EMAIL_CONFIDENCE, DetectionMethod::EmailReferrer)
                .with_medium("email"),
        )
    }

    fn name(&self) -> &'static str {
        "email"
    }
}

/// Detects paid traffic from UTM mediums, paid source names and ad click ids.
#[derive(Debug, Clone, Default)]
pub struct PaidDetector;

impl SourceDetector for PaidDetector {
    fn detect(&self, signals: &RequestSignals, catalog: &CompiledCatalog) -> Option<SourceMatch> {
        let medium = signals.utm.medium.as_deref().map(str::to_lowercase);
        let paid_medium = medium
            .as_deref()
            .is_some_and(|m| catalog.paid_mediums.contains(m));
        let paid_source = signals
            .utm
            .source
            .as_deref()
            .is_some_and(|s| catalog.is_paid_source(s));

        if paid_medium || paid_source {
            let source = signals
                .utm
                .source
                .clone()
                .or_else(|| signals.referrer_host.clone())
                .unwrap_or_else(|| "paid".to_string());
            let m = SourceMatch::new(TrafficCategory::Paid, source, PAID_CONFIDENCE, DetectionMethod::PaidHeuristic);
            return Some(match medium {
                Some(medium) => m.with_medium(medium),
                None => m,
            });
        }

        catalog
            .click_ids
            .iter()
            .find(|(param, _)| signals.query_param(param).is_some_and(|v| !v.is_empty()))
            .map(|(param, source)| {
                SourceMatch::new(TrafficCategory::Paid, source.clone(), PAID_CONFIDENCE, DetectionMethod::PaidHeuristic)
                    .with_medium(format!("cpc:{}", param))
            })
    }

    fn name(&self) -> &'static str {
        "paid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{RawRequest, SignalExtractor};

    fn signals(referrer: Option<&str>, url: &str) -> RequestSignals {
        let mut raw = RawRequest::new("10.0.0.1", url, "2024-05-01T10:00:00Z".parse().unwrap());
        if let Some(r) = referrer {
            raw = raw.with_referrer(r);
        }
        SignalExtractor::new().extract(&raw)
    }

    #[test]
    fn test_webmail_referrer() {
        let catalog = CompiledCatalog::default();
        let s = signals(Some("https://mail.google.com/mail/u/0/"), "https://example.com/");
        let m = EmailDetector.detect(&s, &catalog).unwrap();
        assert_eq!(m.category, TrafficCategory::Email);
        assert_eq!(m.source, "mail.google.com");
        assert_eq!(m.confidence, 90);
    }

    #[test]
    fn test_paid_medium_without_source() {
        let catalog = CompiledCatalog::default();
        let s = signals(None, "https://example.com/?utm_medium=cpc");
        let m = PaidDetector.detect(&s, &catalog).unwrap();
        assert_eq!(m.category, TrafficCategory::Paid);
        assert_eq!(m.source, "paid");
        assert_eq!(m.medium.as_deref(), Some("cpc"));
    }

    #[test]
    fn test_click_id() {
        let catalog = CompiledCatalog::default();
        let s = signals(None, "https://example.com/landing?gclid=abc123");
        let m = PaidDetector.detect(&s, &catalog).unwrap();
        assert_eq!(m.source, "google_ads");
        assert_eq!(m.confidence, 95);
    }

    #[test]
    fn test_no_paid_signal() {
        let catalog = CompiledCatalog::default();
        let s = signals(Some("https://news.ycombinator.com/"), "https://example.com/");
        assert!(PaidDetector.detect(&s, &catalog).is_none());
        assert!(EmailDetector.detect(&s, &catalog).is_none());
    }
}
