//! Session journey tracking.
//!
//! One [`ActiveJourney`] per live session, mutated by page views,
//! interactions and scroll events, then finalized into an immutable
//! [`UserJourneyDocument`].

pub mod metrics;
pub mod store;
pub mod sweeper;
pub mod tracker;

pub use metrics::{compute_metrics, engagement_score, JourneyMetrics};
pub use store::{InMemoryJourneyStore, JourneyStore};
pub use sweeper::{CollectingSink, JourneySink, JourneySweeper, SweeperHandle};
pub use tracker::{JourneyStateTracker, PageView};

use crate::attribution::{AttributionModel, Touchpoint};
use crate::config::PageCategoryRule;
use crate::signals::{path_of, UtmParameters};
use crate::source::TrafficSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Interaction type recorded for each scroll milestone.
pub const SCROLL_MILESTONE_EVENT: &str = "scroll_milestone";

/// Scroll depths (percent) recorded at most once per page.
pub const SCROLL_MILESTONES: [u8; 5] = [25, 50, 75, 90, 100];

/// Errors from journey operations. All of them leave state unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JourneyError {
    #[error("journey {0} is unknown or already finalized")]
    UnknownJourney(String),
}

/// Page category derived from the path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageCategory {
    Home,
    Blog,
    Product,
    Pricing,
    Contact,
    Checkout,
    Confirmation,
    #[default]
    Other,
}

impl PageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageCategory::Home => "home",
            PageCategory::Blog => "blog",
            PageCategory::Product => "product",
            PageCategory::Pricing => "pricing",
            PageCategory::Contact => "contact",
            PageCategory::Checkout => "checkout",
            PageCategory::Confirmation => "confirmation",
            PageCategory::Other => "other",
        }
    }

    /// Funnel stage a visitor has reached when viewing this page.
    pub fn funnel_stage(&self) -> FunnelStage {
        match self {
            PageCategory::Home | PageCategory::Blog | PageCategory::Other => FunnelStage::Awareness,
            PageCategory::Product => FunnelStage::Interest,
            PageCategory::Pricing => FunnelStage::Consideration,
            PageCategory::Contact | PageCategory::Checkout => FunnelStage::Intent,
            PageCategory::Confirmation => FunnelStage::Conversion,
        }
    }

    /// Categorize a path: `/` is home, otherwise the first rule whose prefix
    /// matches wins.
    pub fn from_path(path: &str, rules: &[PageCategoryRule]) -> Self {
        let path = path.trim().to_lowercase();
        if path.is_empty() || path == "/" || path == "/index.html" {
            return PageCategory::Home;
        }
        rules
            .iter()
            .find(|r| path.starts_with(&r.prefix.to_lowercase()))
            .map(|r| r.category)
            .unwrap_or_default()
    }
}

/// Marketing funnel stage, ordered from top to bottom.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    #[default]
    Awareness,
    Interest,
    Consideration,
    Intent,
    Conversion,
}

impl FunnelStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunnelStage::Awareness => "awareness",
            FunnelStage::Interest => "interest",
            FunnelStage::Consideration => "consideration",
            FunnelStage::Intent => "intent",
            FunnelStage::Conversion => "conversion",
        }
    }
}

/// Something the visitor did on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyInteractionEvent {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl JourneyInteractionEvent {
    pub fn new(event_type: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            element: None,
            value: None,
            timestamp,
        }
    }

    pub fn with_element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn is_scroll_milestone(&self) -> bool {
        self.event_type == SCROLL_MILESTONE_EVENT
    }
}

/// One page view within a journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageVisitData {
    pub url: String,
    pub title: String,
    pub path: String,
    pub category: PageCategory,
    pub entry_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<DateTime<Utc>>,
    pub time_spent_seconds: f64,
    /// Latest reported scroll depth (percent)
    pub scroll_depth: f64,
    pub max_scroll_depth: f64,
    pub interactions: Vec<JourneyInteractionEvent>,
    pub is_entry_point: bool,
    pub is_exit_point: bool,
}

impl PageVisitData {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        category: PageCategory,
        entry_time: DateTime<Utc>,
        is_entry_point: bool,
    ) -> Self {
        let url = url.into();
        Self {
            path: path_of(&url),
            url,
            title: title.into(),
            category,
            entry_time,
            exit_time: None,
            time_spent_seconds: 0.0,
            scroll_depth: 0.0,
            max_scroll_depth: 0.0,
            interactions: Vec::new(),
            is_entry_point,
            is_exit_point: false,
        }
    }

    /// Set exit time and time spent. Only the first call has an effect.
    pub fn close(&mut self, at: DateTime<Utc>) {
        if self.exit_time.is_some() {
            return;
        }
        let at = at.max(self.entry_time);
        self.exit_time = Some(at);
        self.time_spent_seconds = (at - self.entry_time).num_milliseconds() as f64 / 1000.0;
    }

    pub fn has_milestone(&self, milestone: u8) -> bool {
        self.interactions
            .iter()
            .any(|i| i.is_scroll_milestone() && i.value == Some(milestone as f64))
    }
}

/// Browser environment of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub browser: String,
    pub os: String,
    pub device_type: String,
}

/// How the visitor arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyEntry {
    pub page: String,
    pub source: TrafficSource,
    #[serde(default)]
    pub utm: UtmParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Source exposures along the journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyAttribution {
    pub first_touch: TrafficSource,
    pub last_touch: TrafficSource,
    pub touchpoints: Vec<Touchpoint>,
    /// Model applied at conversion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<AttributionModel>,
}

/// Mutable state of a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveJourney {
    pub journey_id: String,
    pub user_id: String,
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub entry: JourneyEntry,
    pub current_page: PageVisitData,
    /// Pages already left, in visit order
    pub visited_pages: Vec<PageVisitData>,
    pub total_interactions: u32,
    pub is_active: bool,
    pub device: DeviceInfo,
    pub attribution: JourneyAttribution,
    pub funnel_stage: FunnelStage,
}

impl ActiveJourney {
    /// All pages in visit order, the current one last.
    pub fn pages(&self) -> impl Iterator<Item = &PageVisitData> {
        self.visited_pages.iter().chain(std::iter::once(&self.current_page))
    }

    pub fn page_count(&self) -> usize {
        self.visited_pages.len() + 1
    }
}

/// Terminal state type of a journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeType {
    Conversion,
    Bounce,
    Exit,
    Ongoing,
}

/// Terminal state of a journey, written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyOutcome {
    #[serde(rename = "type")]
    pub outcome_type: OutcomeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
}

impl JourneyOutcome {
    pub fn conversion(conversion_type: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            outcome_type: OutcomeType::Conversion,
            conversion_type: Some(conversion_type.into()),
            conversion_value: value,
            exit_reason: None,
        }
    }

    pub fn exit(reason: impl Into<String>) -> Self {
        Self {
            outcome_type: OutcomeType::Exit,
            conversion_type: None,
            conversion_value: None,
            exit_reason: Some(reason.into()),
        }
    }

    pub fn bounce() -> Self {
        Self {
            outcome_type: OutcomeType::Bounce,
            conversion_type: None,
            conversion_value: None,
            exit_reason: None,
        }
    }

    pub fn ongoing() -> Self {
        Self {
            outcome_type: OutcomeType::Ongoing,
            conversion_type: None,
            conversion_value: None,
            exit_reason: None,
        }
    }

    pub fn is_conversion(&self) -> bool {
        self.outcome_type == OutcomeType::Conversion
    }
}

/// Finalized, immutable journey record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserJourneyDocument {
    pub journey_id: String,
    pub user_id: String,
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub entry: JourneyEntry,
    pub pages: Vec<PageVisitData>,
    pub device: DeviceInfo,
    pub attribution: JourneyAttribution,
    pub metrics: JourneyMetrics,
    pub outcome: JourneyOutcome,
    pub funnel_stage: FunnelStage,
}

impl UserJourneyDocument {
    pub fn converted(&self) -> bool {
        self.outcome.is_conversion()
    }

    pub fn page_paths(&self) -> impl Iterator<Item = &str> {
        self.pages.iter().map(|p| p.path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JourneyConfig;

    #[test]
    fn test_page_categories() {
        let rules = JourneyConfig::default().page_categories;
        assert_eq!(PageCategory::from_path("/", &rules), PageCategory::Home);
        assert_eq!(PageCategory::from_path("/pricing", &rules), PageCategory::Pricing);
        assert_eq!(PageCategory::from_path("/Blog/rust-tips", &rules), PageCategory::Blog);
        assert_eq!(PageCategory::from_path("/thank-you?order=1", &rules), PageCategory::Confirmation);
        assert_eq!(PageCategory::from_path("/about", &rules), PageCategory::Other);
    }

    #[test]
    fn test_funnel_stage_order() {
        assert!(FunnelStage::Awareness < FunnelStage::Interest);
        assert!(FunnelStage::Intent < FunnelStage::Conversion);
        assert_eq!(PageCategory::Checkout.funnel_stage(), FunnelStage::Intent);
    }

    #[test]
    fn test_page_close_once() {
        let t0: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let mut page = PageVisitData::new("https://example.com/pricing?x=1", "Pricing", PageCategory::Pricing, t0, true);
        assert_eq!(page.path, "/pricing");
        page.close(t0 + chrono::Duration::milliseconds(12_500));
        page.close(t0 + chrono::Duration::seconds(60));
        assert_eq!(page.time_spent_seconds, 12.5);
    }

    #[test]
    fn test_outcome_serializes_type_tag() {
        let json = serde_json::to_value(JourneyOutcome::exit("timeout")).unwrap();
        assert_eq!(json["type"], "exit");
        assert_eq!(json["exit_reason"], "timeout");
    }
}
