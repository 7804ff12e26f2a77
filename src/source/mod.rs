//! Traffic source classification.
//!
//! Each detector inspects one family of signals and either claims the
//! request or passes. [`SourceClassifier`] runs them in strict priority
//! order; the first match wins.

pub mod authenticity;
pub mod classifier;
pub mod heuristics;
pub mod patterns;
pub mod utm;

pub use authenticity::{validate_source_authenticity, AuthenticityReport};
pub use classifier::SourceClassifier;
pub use heuristics::{EmailDetector, PaidDetector};
pub use patterns::{AiAssistantDetector, SearchEngineDetector, SocialMediaDetector};
pub use utm::UtmDetector;

use crate::catalog::CompiledCatalog;
use crate::signals::RequestSignals;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Traffic category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficCategory {
    Organic,
    Direct,
    Social,
    AiAssistant,
    Referral,
    Email,
    Paid,
}

impl TrafficCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficCategory::Organic => "organic",
            TrafficCategory::Direct => "direct",
            TrafficCategory::Social => "social",
            TrafficCategory::AiAssistant => "ai_assistant",
            TrafficCategory::Referral => "referral",
            TrafficCategory::Email => "email",
            TrafficCategory::Paid => "paid",
        }
    }

    /// Medium reported when no UTM medium was supplied.
    pub fn default_medium(&self) -> &'static str {
        match self {
            TrafficCategory::Organic => "organic",
            TrafficCategory::Direct => "(none)",
            TrafficCategory::Social => "social",
            TrafficCategory::AiAssistant => "ai_referral",
            TrafficCategory::Referral => "referral",
            TrafficCategory::Email => "email",
            TrafficCategory::Paid => "cpc",
        }
    }
}

/// How a traffic source was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    UtmParameters,
    AiPattern,
    SearchEngine,
    SocialMedia,
    EmailReferrer,
    PaidHeuristic,
    Default,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::UtmParameters => "utm_parameters",
            DetectionMethod::AiPattern => "ai_pattern",
            DetectionMethod::SearchEngine => "search_engine",
            DetectionMethod::SocialMedia => "social_media",
            DetectionMethod::EmailReferrer => "email_referrer",
            DetectionMethod::PaidHeuristic => "paid_heuristic",
            DetectionMethod::Default => "default",
        }
    }
}

/// A classified traffic source. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSource {
    /// Digest of the classifier inputs
    pub id: String,
    pub category: TrafficCategory,
    /// Source name (e.g., "google", "ChatGPT")
    pub source: String,
    pub medium: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    pub is_authentic: bool,
    /// Confidence in the classification (0-100)
    pub confidence: u8,
    pub detected_at: DateTime<Utc>,
}

impl TrafficSource {
    /// Same source with a different confidence / authenticity verdict.
    pub fn with_verdict(&self, confidence: u8, is_authentic: bool) -> Self {
        Self {
            confidence: confidence.min(100),
            is_authentic,
            ..self.clone()
        }
    }

    /// Stable key used to detect a change of source within a journey.
    pub fn channel_key(&self) -> String {
        format!("{}:{}", self.category.as_str(), self.source.to_lowercase())
    }
}

/// Output of the classification cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSourceDetectionResult {
    pub source: TrafficSource,
    pub confidence: u8,
    pub detection_method: DetectionMethod,
}

/// A detector's claim on a request.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMatch {
    pub category: TrafficCategory,
    pub source: String,
    pub medium: Option<String>,
    pub confidence: u8,
    pub method: DetectionMethod,
}

impl SourceMatch {
    pub fn new(
        category: TrafficCategory,
        source: impl Into<String>,
        confidence: u8,
        method: DetectionMethod,
    ) -> Self {
        Self {
            category,
            source: source.into(),
            medium: None,
            confidence: confidence.min(100),
            method,
        }
    }

    pub fn with_medium(mut self, medium: impl Into<String>) -> Self {
        self.medium = Some(medium.into());
        self
    }
}

/// One step of the source classification cascade.
pub trait SourceDetector: Send + Sync {
    /// Claim the request, or return `None` to pass to the next step.
    fn detect(&self, signals: &RequestSignals, catalog: &CompiledCatalog) -> Option<SourceMatch>;

    /// Get the detector name.
    fn name(&self) -> &'static str;
}
