//! Traffic attribution engine
//!
//! Classifies where web traffic comes from, scores how likely it is to be
//! automated, follows visitors through multi-page journeys and attributes
//! conversions across the channels that touched them.
//!
//! # Features
//!
//! - Source classification (UTM, AI assistants, search, social, email, paid, direct)
//! - Source authenticity re-check
//! - Multi-signal bot scoring (User-Agent, behavior, network, timing, frequency, headers)
//! - Journey tracking with timeouts, bounce detection and engagement metrics
//! - Multi-touch attribution (first/last touch, linear, time decay, position based)
//! - Conversion funnel analysis
//! - Data quality gate for analytics exports
//!
//! # Example
//!
//! ```ignore
//! use traffic_attribution::{RawRequest, TrafficEngine};
//!
//! let engine = TrafficEngine::with_defaults();
//! let processed = engine.process_request(
//!     &RawRequest::new("203.0.113.7", "https://example.com/pricing", chrono::Utc::now())
//!         .with_referrer("https://chat.openai.com/")
//!         .with_user_agent("Mozilla/5.0"),
//! );
//! println!("{} ({})", processed.source.source, processed.source.category.as_str());
//! ```

pub mod attribution;
pub mod bot;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod funnel;
pub mod history;
pub mod journey;
pub mod quality;
pub mod score;
pub mod signals;
pub mod source;

pub use attribution::{attribute_conversion, attribution_weights, AttributionModel, Touchpoint};
pub use bot::BotScorer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{ProcessedRequest, TrafficEngine};
pub use funnel::{analyze_funnel, ConversionFunnel, FunnelAnalyzer, FunnelDefinition, TimeRange};
pub use journey::{JourneyOutcome, JourneyStateTracker, PageView, UserJourneyDocument};
pub use quality::{DataQualityGate, TrafficMetricsRecord};
pub use score::{BotClassification, BotDetectionResult};
pub use signals::{RawRequest, RequestSignals, SignalExtractor, UtmParameters};
pub use source::{SourceClassifier, TrafficCategory, TrafficSource, TrafficSourceDetectionResult};
