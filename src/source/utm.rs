//! UTM parameter detector.
//!
//! UTM tags are authoritative: any request carrying `utm_source` is
//! classified here with full confidence.

use super::{DetectionMethod, SourceDetector, SourceMatch, TrafficCategory};
use crate::catalog::CompiledCatalog;
use crate::signals::RequestSignals;

/// Confidence assigned to UTM-tagged traffic.
pub const UTM_CONFIDENCE: u8 = 100;

/// Maps `(utm_source, utm_medium)` to a traffic category.
#[derive(Debug, Clone, Default)]
pub struct UtmDetector;

impl UtmDetector {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a category from UTM values.
    ///
    /// Medium rules are checked before source-name rules so that
    /// `google / cpc` is paid rather than organic.
    pub fn categorize(source: &str, medium: Option<&str>, catalog: &CompiledCatalog) -> TrafficCategory {
        let source = source.to_lowercase();
        let medium = medium.map(|m| m.to_lowercase());

        match medium.as_deref() {
            Some(m) if catalog.paid_mediums.contains(m) => return TrafficCategory::Paid,
            Some("organic") => return TrafficCategory::Organic,
            Some("social") | Some("social-media") | Some("social_media") => {
                return TrafficCategory::Social
            }
            Some("email") | Some("e-mail") | Some("newsletter") => return TrafficCategory::Email,
            _ => {}
        }

        if catalog.is_paid_source(&source) {
            TrafficCategory::Paid
        } else if catalog.utm_ai_sources.contains(&source) {
            TrafficCategory::AiAssistant
        } else if catalog.utm_search_sources.contains(&source) {
            TrafficCategory::Organic
        } else if catalog.utm_social_sources.contains(&source) {
            TrafficCategory::Social
        } else {
            TrafficCategory::Referral
        }
    }
}

impl SourceDetector for UtmDetector {
    fn detect(&self, signals: &RequestSignals, catalog: &CompiledCatalog) -> Option<SourceMatch> {
        let source = signals.utm.source.as_deref()?;
        let medium = signals.utm.medium.as_deref();
        let category = Self::categorize(source, medium, catalog);

        let m = SourceMatch::new(category, source, UTM_CONFIDENCE, DetectionMethod::UtmParameters);
        Some(match medium {
            Some(medium) => m.with_medium(medium),
            None => m,
        })
    }

    fn name(&self) -> &'static str {
        "utm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> CompiledCatalog {
        CompiledCatalog::default()
    }

    #[test]
    fn test_categorize_by_medium() {
        let c = catalog();
        assert_eq!(UtmDetector::categorize("google", Some("organic"), &c), TrafficCategory::Organic);
        assert_eq!(UtmDetector::categorize("google", Some("cpc"), &c), TrafficCategory::Paid);
        assert_eq!(UtmDetector::categorize("anything", Some("social"), &c), TrafficCategory::Social);
        assert_eq!(UtmDetector::categorize("weekly", Some("email"), &c), TrafficCategory::Email);
    }

    #[test]
    fn test_categorize_by_source() {
        let c = catalog();
        assert_eq!(UtmDetector::categorize("ChatGPT", None, &c), TrafficCategory::AiAssistant);
        assert_eq!(UtmDetector::categorize("bing", None, &c), TrafficCategory::Organic);
        assert_eq!(UtmDetector::categorize("linkedin", Some("post"), &c), TrafficCategory::Social);
        assert_eq!(UtmDetector::categorize("googleads", None, &c), TrafficCategory::Paid);
        assert_eq!(UtmDetector::categorize("partner-blog", None, &c), TrafficCategory::Referral);
    }
}
