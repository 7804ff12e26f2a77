//! Configuration types for the traffic attribution engine.

use crate::attribution::AttributionModel;
use crate::journey::PageCategory;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Source classification settings
    pub source: SourceConfig,

    /// Bot scoring settings
    pub bot: BotConfig,

    /// Journey tracking settings
    pub journey: JourneyConfig,

    /// Funnel analysis settings
    pub funnel: FunnelConfig,

    /// Data quality gate settings
    pub quality: QualityConfig,

    /// Cache settings
    pub cache: CacheConfig,

    /// Optional signature catalog (JSON); built-in tables when unset
    pub catalog_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from a JSON or YAML file (by extension).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }
}

/// Source classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Minimum confidence to accept an AI-assistant pattern match (0-100)
    pub ai_min_confidence: u8,

    /// Confidence below which a source is flagged not authentic
    pub authenticity_threshold: u8,

    /// More flags than this marks a source not authentic
    pub max_authenticity_flags: usize,

    /// UTM values longer than this are implausible
    pub max_utm_length: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            ai_min_confidence: 70,
            authenticity_threshold: 50,
            max_authenticity_flags: 2,
            max_utm_length: 100,
        }
    }
}

/// Bot scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Maximum request history kept per origin
    pub max_history: usize,

    /// Origins idle longer than this are dropped by cleanup
    pub history_max_age_seconds: u64,

    /// Score above which a request is a bot
    pub bot_threshold: u8,

    /// Score above which a non-allowlisted bot is bad
    pub bad_bot_threshold: u8,

    /// Score cap applied to known good bots
    pub good_bot_cap: u8,

    /// Requests per minute threshold
    pub rpm_threshold: u32,

    /// Dwell time considered long when no scrolling happened
    pub long_dwell_ms: u64,

    /// Minimum history entries before timing checks run
    pub min_history_for_timing: usize,

    /// Requests inspected for systematic path traversal
    pub traversal_window: usize,

    /// Data-center networks (CIDR notation)
    pub datacenter_ranges: Vec<String>,

    /// Networks with bad reputation (CIDR notation)
    pub bad_reputation_ranges: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            history_max_age_seconds: 3600,
            bot_threshold: 50,
            bad_bot_threshold: 80,
            good_bot_cap: 70,
            rpm_threshold: 30,
            long_dwell_ms: 30_000,
            min_history_for_timing: 5,
            traversal_window: 20,
            datacenter_ranges: [
                // AWS
                "3.0.0.0/9",
                "52.0.0.0/10",
                "54.64.0.0/11",
                // Google Cloud
                "34.64.0.0/10",
                "35.184.0.0/13",
                // Azure
                "20.33.0.0/16",
                "40.64.0.0/10",
                // DigitalOcean
                "104.131.0.0/16",
                "159.203.0.0/16",
                // Hetzner
                "78.46.0.0/15",
                "88.198.0.0/16",
                // OVH
                "51.68.0.0/16",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            bad_reputation_ranges: vec![],
        }
    }
}

/// Path prefix to page category mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageCategoryRule {
    pub prefix: String,
    pub category: PageCategory,
}

impl PageCategoryRule {
    pub fn new(prefix: impl Into<String>, category: PageCategory) -> Self {
        Self {
            prefix: prefix.into(),
            category,
        }
    }
}

/// Journey tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JourneyConfig {
    /// Journeys inactive longer than this are completed by the sweep
    pub timeout_seconds: u64,

    /// Sweep interval
    pub sweep_interval_seconds: u64,

    /// Single-page journeys shorter than this are bounces
    pub bounce_max_seconds: u64,

    /// Single-page journeys with fewer interactions than this are bounces
    pub bounce_max_interactions: u32,

    /// Model used to weight touchpoints of converted journeys
    pub attribution_model: AttributionModel,

    /// Page categorization rules, first matching prefix wins
    pub page_categories: Vec<PageCategoryRule>,
}

impl Default for JourneyConfig {
    fn default() -> Self {
        use PageCategory::*;

        Self {
            timeout_seconds: 1800,
            sweep_interval_seconds: 1800,
            bounce_max_seconds: 10,
            bounce_max_interactions: 2,
            attribution_model: AttributionModel::PositionBased,
            page_categories: vec![
                PageCategoryRule::new("/thank-you", Confirmation),
                PageCategoryRule::new("/success", Confirmation),
                PageCategoryRule::new("/checkout", Checkout),
                PageCategoryRule::new("/enroll", Checkout),
                PageCategoryRule::new("/signup", Checkout),
                PageCategoryRule::new("/contact", Contact),
                PageCategoryRule::new("/demo", Contact),
                PageCategoryRule::new("/pricing", Pricing),
                PageCategoryRule::new("/plans", Pricing),
                PageCategoryRule::new("/courses", Product),
                PageCategoryRule::new("/products", Product),
                PageCategoryRule::new("/features", Product),
                PageCategoryRule::new("/blog", Blog),
                PageCategoryRule::new("/articles", Blog),
            ],
        }
    }
}

/// Funnel analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunnelConfig {
    /// Drop-off rate (percent) above which a step boundary is reported
    pub drop_off_threshold: f64,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            drop_off_threshold: 10.0,
        }
    }
}

/// Data quality gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// z-score above which a metric is anomalous
    pub anomaly_z_threshold: f64,

    /// Minimum baseline size before anomaly checks run
    pub min_baseline: usize,

    /// Longest plausible average session (seconds)
    pub max_session_duration_seconds: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            anomaly_z_threshold: 3.0,
            min_baseline: 7,
            max_session_duration_seconds: 86_400.0,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Source classification cache size
    pub classification_cache_size: u64,

    /// Source classification cache TTL in seconds
    pub classification_cache_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            classification_cache_size: 10_000,
            classification_cache_ttl_seconds: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.source.ai_min_confidence, 70);
        assert_eq!(config.bot.max_history, 100);
        assert_eq!(config.bot.good_bot_cap, 70);
        assert_eq!(config.journey.timeout_seconds, 1800);
        assert_eq!(config.funnel.drop_off_threshold, 10.0);
        assert!(config.catalog_path.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.bot.rpm_threshold, config.bot.rpm_threshold);
        assert_eq!(parsed.journey.page_categories.len(), config.journey.page_categories.len());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "bot:\n  rpm_threshold: 10\njourney:\n  attribution_model: time_decay\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bot.rpm_threshold, 10);
        assert_eq!(config.bot.max_history, 100);
        assert_eq!(config.journey.attribution_model, AttributionModel::TimeDecay);
    }
}
