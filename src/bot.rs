//! Bot risk scoring.
//!
//! Runs every detector against the request signals and the origin's recent
//! history, then folds the points into a [`BotDetectionResult`].

use crate::catalog::CompiledCatalog;
use crate::config::BotConfig;
use crate::detectors::{
    BehavioralDetector, DetectionContext, Detector, FrequencyDetector, HeaderDetector,
    NetworkDetector, TimingDetector, UserAgentDetector,
};
use crate::history::{InMemoryHistoryStore, RequestHistoryStore, RequestRecord};
use crate::score::{BotDetectionResult, ScoreCalculator, SignalBreakdown};
use crate::signals::RequestSignals;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Scores requests for bot likelihood.
pub struct BotScorer {
    detectors: Vec<Box<dyn Detector>>,
    calculator: ScoreCalculator,
    catalog: Arc<CompiledCatalog>,
    history: Arc<dyn RequestHistoryStore>,
    max_age: Duration,
}

impl BotScorer {
    /// Create a scorer over an injected history store.
    pub fn new(
        config: &BotConfig,
        catalog: Arc<CompiledCatalog>,
        history: Arc<dyn RequestHistoryStore>,
    ) -> Self {
        let detectors: Vec<Box<dyn Detector>> = vec![
            Box::new(UserAgentDetector::new()),
            Box::new(BehavioralDetector::new(
                config.long_dwell_ms,
                config.min_history_for_timing,
            )),
            Box::new(NetworkDetector::new(
                &config.datacenter_ranges,
                &config.bad_reputation_ranges,
            )),
            Box::new(TimingDetector::new(config.min_history_for_timing)),
            Box::new(FrequencyDetector::new(
                config.rpm_threshold,
                config.traversal_window,
            )),
            Box::new(HeaderDetector::new()),
        ];

        Self {
            detectors,
            calculator: ScoreCalculator::new(
                config.bot_threshold,
                config.bad_bot_threshold,
                config.good_bot_cap,
            ),
            catalog,
            history,
            max_age: Duration::seconds(config.history_max_age_seconds as i64),
        }
    }

    /// Create with default configuration, built-in catalog and in-memory history.
    pub fn with_defaults() -> Self {
        let config = BotConfig::default();
        let history = Arc::new(InMemoryHistoryStore::new(config.max_history));
        Self::new(&config, Arc::new(CompiledCatalog::default()), history)
    }

    pub fn history(&self) -> &Arc<dyn RequestHistoryStore> {
        &self.history
    }

    /// Record the request in the origin's history, then score it.
    pub fn score(&self, signals: &RequestSignals) -> BotDetectionResult {
        let record = RequestRecord::new(signals.timestamp, signals.path.clone());
        let history = self.history.record(&signals.origin, record);
        self.score_with_history(signals, &history)
    }

    /// Score against an explicit history without touching the store.
    pub fn score_with_history(
        &self,
        signals: &RequestSignals,
        history: &[RequestRecord],
    ) -> BotDetectionResult {
        let ctx = DetectionContext {
            signals,
            history,
            catalog: &self.catalog,
        };

        let mut breakdown = SignalBreakdown::default();
        for detector in &self.detectors {
            let result = detector.analyze(&ctx);
            debug!(
                detector = detector.name(),
                score = result.score,
                reasons = ?result.reasons,
                "Detector pass complete"
            );
            breakdown.record(detector.name(), &result);
        }

        let result = self.calculator.calculate(&breakdown);
        debug!(
            origin = %signals.origin,
            bot_score = result.bot_score,
            classification = result.classification.as_str(),
            methods = ?result.detection_methods,
            "Bot scoring complete"
        );
        result
    }

    /// Drop history entries older than the configured max age.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let removed = self.history.evict_older_than(now - self.max_age);
        if removed > 0 {
            info!(
                removed,
                remaining = self.history.origin_count(),
                "Evicted idle origin histories"
            );
        }
        removed
    }
}
