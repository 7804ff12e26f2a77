//! Engine facade wiring the classifiers, trackers and analyzers together.

use crate::attribution::{channel_report, ChannelReport};
use crate::bot::BotScorer;
use crate::cache::{CacheStats, MemoCache};
use crate::catalog::{CompiledCatalog, PatternCatalog};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::funnel::{ConversionFunnel, FunnelAnalyzer, FunnelDefinition, TimeRange};
use crate::history::{InMemoryHistoryStore, RequestHistoryStore};
use crate::journey::{
    InMemoryJourneyStore, JourneySink, JourneyStateTracker, JourneyStore, JourneySweeper,
    UserJourneyDocument,
};
use crate::quality::DataQualityGate;
use crate::score::BotDetectionResult;
use crate::signals::{RawRequest, RequestSignals, SignalExtractor, UtmParameters};
use crate::source::{
    validate_source_authenticity, DetectionMethod, SourceClassifier, TrafficSource,
    TrafficSourceDetectionResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Inputs that determine a classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClassificationKey {
    referrer: Option<String>,
    user_agent: Option<String>,
    url: String,
    utm: UtmParameters,
}

/// Everything the engine derives from one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRequest {
    pub origin: String,
    pub timestamp: DateTime<Utc>,
    /// Source after the authenticity re-check
    pub source: TrafficSource,
    pub detection_method: DetectionMethod,
    pub authenticity_flags: Vec<String>,
    pub bot: BotDetectionResult,
}

/// Traffic attribution engine.
pub struct TrafficEngine {
    config: EngineConfig,
    extractor: SignalExtractor,
    catalog: Arc<CompiledCatalog>,
    classifier: Arc<SourceClassifier>,
    bot_scorer: Arc<BotScorer>,
    tracker: Arc<JourneyStateTracker>,
    funnel: FunnelAnalyzer,
    quality: DataQualityGate,
    cache: MemoCache<ClassificationKey, TrafficSourceDetectionResult>,
}

impl TrafficEngine {
    /// Create an engine with in-memory stores, loading the signature catalog
    /// from `config.catalog_path` when set.
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let catalog = match &config.catalog_path {
            Some(path) => PatternCatalog::load(path)?,
            None => PatternCatalog::default(),
        };
        let history = Arc::new(InMemoryHistoryStore::new(config.bot.max_history));
        let journeys = Arc::new(InMemoryJourneyStore::new());

        Ok(Self::with_stores(config, catalog.compile(), history, journeys, clock))
    }

    /// Create an engine over injected stores.
    pub fn with_stores(
        config: EngineConfig,
        catalog: CompiledCatalog,
        history: Arc<dyn RequestHistoryStore>,
        journeys: Arc<dyn JourneyStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let classifier = Arc::new(SourceClassifier::new(catalog.clone(), config.source.clone()));
        let bot_scorer = Arc::new(BotScorer::new(&config.bot, catalog.clone(), history));
        let tracker = Arc::new(JourneyStateTracker::new(
            config.journey.clone(),
            classifier.clone(),
            journeys,
            clock,
        ));
        let cache = MemoCache::new(
            "classification",
            config.cache.classification_cache_size,
            Duration::from_secs(config.cache.classification_cache_ttl_seconds),
        );

        info!(
            ai_signatures = catalog.ai_assistants.len(),
            search_signatures = catalog.search_engines.len(),
            social_signatures = catalog.social_networks.len(),
            known_bots = catalog.known_bots.len(),
            cache = cache.name(),
            cache_capacity = config.cache.classification_cache_size,
            "Traffic engine initialized"
        );

        Self {
            funnel: FunnelAnalyzer::new(config.funnel.clone()),
            quality: DataQualityGate::new(config.quality.clone()),
            config,
            extractor: SignalExtractor::new(),
            catalog,
            classifier,
            bot_scorer,
            tracker,
            cache,
        }
    }

    /// Default configuration, built-in catalog, wall clock.
    pub fn with_defaults() -> Self {
        Self::with_stores(
            EngineConfig::default(),
            CompiledCatalog::default(),
            Arc::new(InMemoryHistoryStore::default()),
            Arc::new(InMemoryJourneyStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Arc<SourceClassifier> {
        &self.classifier
    }

    pub fn bot_scorer(&self) -> &Arc<BotScorer> {
        &self.bot_scorer
    }

    pub fn tracker(&self) -> &Arc<JourneyStateTracker> {
        &self.tracker
    }

    pub fn quality_gate(&self) -> &DataQualityGate {
        &self.quality
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Forget memoized classifications, e.g. after the catalog changed.
    pub fn clear_classification_cache(&self) {
        self.cache.invalidate_all();
        debug!(cache = self.cache.name(), "Classification cache cleared");
    }

    /// Classify a request source from loose parts (memoized).
    pub fn classify_source(
        &self,
        referrer: Option<&str>,
        user_agent: Option<&str>,
        url: &str,
        utm: &UtmParameters,
        at: DateTime<Utc>,
    ) -> TrafficSourceDetectionResult {
        let key = ClassificationKey {
            referrer: referrer.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            url: url.to_string(),
            utm: utm.clone(),
        };
        let mut result = self.cache.get_or_insert_with(key, || {
            self.classifier.classify_parts(referrer, user_agent, url, utm, at)
        });
        result.source.detected_at = at;
        result
    }

    /// Score bot risk against the origin's stored history. Records the request.
    pub fn score_bot_risk(&self, signals: &RequestSignals) -> BotDetectionResult {
        self.bot_scorer.score(signals)
    }

    /// Extract signals, classify the source, re-check authenticity and score
    /// bot risk for one request.
    pub fn process_request(&self, raw: &RawRequest) -> ProcessedRequest {
        let signals = self.extractor.extract(raw);
        let classification = self.classify_source(
            raw.referrer.as_deref(),
            raw.user_agent.as_deref(),
            &raw.url,
            &UtmParameters::default(),
            raw.timestamp,
        );
        let authenticity =
            validate_source_authenticity(&classification, &signals, &self.catalog, &self.config.source);
        let bot = self.score_bot_risk(&signals);

        debug!(
            origin = %raw.origin,
            category = classification.source.category.as_str(),
            source = %classification.source.source,
            confidence = authenticity.adjusted_confidence,
            authentic = authenticity.is_authentic,
            bot_score = bot.bot_score,
            classification = bot.classification.as_str(),
            "Request processed"
        );

        ProcessedRequest {
            origin: raw.origin.clone(),
            timestamp: raw.timestamp,
            source: authenticity.source,
            detection_method: classification.detection_method,
            authenticity_flags: authenticity.flags,
            bot,
        }
    }

    /// Evaluate a funnel over finalized journeys.
    pub fn analyze_funnel(
        &self,
        definition: &FunnelDefinition,
        journeys: &[UserJourneyDocument],
        range: Option<TimeRange>,
    ) -> ConversionFunnel {
        self.funnel.analyze(definition, journeys, range)
    }

    /// Per-channel attribution with the configured model.
    pub fn channel_report(&self, journeys: &[UserJourneyDocument]) -> ChannelReport {
        channel_report(journeys, self.config.journey.attribution_model)
    }

    /// Sweeper for timed-out journeys that also trims bot history.
    pub fn sweeper(&self, sink: Arc<dyn JourneySink>) -> JourneySweeper {
        JourneySweeper::new(self.tracker.clone(), sink).with_bot_scorer(self.bot_scorer.clone())
    }
}
