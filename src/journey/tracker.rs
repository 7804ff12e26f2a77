//! Journey state machine.
//!
//! no journey -> active -> converted | bounced | exited | timed out

use super::{
    compute_metrics, ActiveJourney, DeviceInfo, FunnelStage, JourneyAttribution, JourneyEntry,
    JourneyError, JourneyInteractionEvent, JourneyOutcome, JourneyStore, OutcomeType,
    PageCategory, PageVisitData, UserJourneyDocument, SCROLL_MILESTONES, SCROLL_MILESTONE_EVENT,
};
use crate::attribution::{attribute_conversion, Touchpoint};
use crate::clock::Clock;
use crate::config::JourneyConfig;
use crate::signals::{RawRequest, RequestSignals, SignalExtractor, UtmParameters};
use crate::source::{SourceClassifier, TrafficSource};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A page view reported by the site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageView {
    pub url: String,
    pub title: String,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    /// Explicit UTM values; override those in the URL
    pub utm: UtmParameters,
}

impl PageView {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_utm(mut self, utm: UtmParameters) -> Self {
        self.utm = utm;
        self
    }
}

/// Tracks live journeys.
pub struct JourneyStateTracker {
    config: JourneyConfig,
    classifier: Arc<SourceClassifier>,
    store: Arc<dyn JourneyStore>,
    clock: Arc<dyn Clock>,
    extractor: SignalExtractor,
}

impl JourneyStateTracker {
    pub fn new(
        config: JourneyConfig,
        classifier: Arc<SourceClassifier>,
        store: Arc<dyn JourneyStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            classifier,
            store,
            clock,
            extractor: SignalExtractor::new(),
        }
    }

    pub fn config(&self) -> &JourneyConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JourneyStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn signals(&self, page: &PageView, at: DateTime<Utc>) -> RequestSignals {
        let mut raw = RawRequest::new("", page.url.clone(), at);
        raw.referrer = page.referrer.clone();
        raw.user_agent = page.user_agent.clone();
        let mut signals = self.extractor.extract(&raw);
        signals.utm = page.utm.clone().merged_with(&signals.utm);
        signals
    }

    fn categorize(&self, path: &str) -> PageCategory {
        PageCategory::from_path(path, &self.config.page_categories)
    }

    /// Start the session's journey, or return the live one if it exists.
    ///
    /// The entry source is classified once and frozen as first touch.
    pub fn start_journey(&self, user_id: &str, session_id: &str, page: &PageView) -> String {
        let now = self.clock.now();
        let mut create = || {
            let signals = self.signals(page, now);
            let source = self.classifier.classify(&signals).source;
            let category = self.categorize(&signals.path);
            let entry_page = PageVisitData::new(page.url.clone(), page.title.clone(), category, now, true);

            ActiveJourney {
                journey_id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
                start_time: now,
                last_activity: now,
                entry: JourneyEntry {
                    page: page.url.clone(),
                    source: source.clone(),
                    utm: signals.utm.clone(),
                    referrer: signals.referrer.clone(),
                    timestamp: now,
                },
                current_page: entry_page,
                visited_pages: Vec::new(),
                total_interactions: 0,
                is_active: true,
                device: DeviceInfo {
                    browser: signals.browser.clone(),
                    os: signals.os.clone(),
                    device_type: signals.device_type.clone(),
                },
                attribution: JourneyAttribution {
                    first_touch: source.clone(),
                    last_touch: source.clone(),
                    touchpoints: vec![Touchpoint::new(source, now, page.url.clone())],
                    model: None,
                },
                funnel_stage: category.funnel_stage(),
            }
        };

        let (journey_id, created) = self.store.get_or_start(session_id, &mut create);
        if created {
            debug!(journey_id = %journey_id, session_id, user_id, "Journey started");
        } else {
            debug!(journey_id = %journey_id, session_id, "Session already has a live journey");
        }
        journey_id
    }

    /// Close the current page and move to a new one.
    ///
    /// An external referrer or explicit UTM re-classifies the source; a new
    /// channel becomes last touch and gets a touchpoint.
    pub fn track_page_visit(&self, journey_id: &str, page: &PageView) -> Result<(), JourneyError> {
        let now = self.clock.now();
        let signals = self.signals(page, now);
        let new_source = (signals.referrer_host.is_some() || !signals.utm.is_empty())
            .then(|| self.classifier.classify(&signals).source);
        let category = self.categorize(&signals.path);

        let found = self.store.update(journey_id, &mut |journey| {
            let next = PageVisitData::new(page.url.clone(), page.title.clone(), category, now, false);
            let mut previous = std::mem::replace(&mut journey.current_page, next);
            previous.close(now);
            journey.visited_pages.push(previous);
            journey.funnel_stage = journey.funnel_stage.max(category.funnel_stage());
            journey.last_activity = now;

            if let Some(source) = &new_source {
                if source.channel_key() != journey.attribution.last_touch.channel_key() {
                    journey.attribution.last_touch = source.clone();
                    journey
                        .attribution
                        .touchpoints
                        .push(Touchpoint::new(source.clone(), now, page.url.clone()));
                }
            }
        });

        self.found_or_warn(found, journey_id, "track_page_visit")
    }

    /// Record an interaction on the current page.
    pub fn track_interaction(
        &self,
        journey_id: &str,
        event_type: &str,
        element: Option<&str>,
        value: Option<f64>,
    ) -> Result<(), JourneyError> {
        let now = self.clock.now();
        let mut event = JourneyInteractionEvent::new(event_type, now);
        event.element = element.map(str::to_string);
        event.value = value;

        let found = self.store.update(journey_id, &mut |journey| {
            journey.current_page.interactions.push(event.clone());
            journey.total_interactions += 1;
            journey.last_activity = now;
        });

        self.found_or_warn(found, journey_id, "track_interaction")
    }

    /// Record scroll depth (percent) on the current page. Returns milestones
    /// reached for the first time.
    pub fn track_scroll_depth(&self, journey_id: &str, depth: f64) -> Result<Vec<u8>, JourneyError> {
        let now = self.clock.now();
        let depth = if depth.is_finite() { depth.clamp(0.0, 100.0) } else { 0.0 };
        let mut reached = Vec::new();

        let found = self.store.update(journey_id, &mut |journey| {
            reached.clear();
            let page = &mut journey.current_page;
            page.scroll_depth = depth;
            page.max_scroll_depth = page.max_scroll_depth.max(depth);

            for milestone in SCROLL_MILESTONES {
                if page.max_scroll_depth >= milestone as f64 && !page.has_milestone(milestone) {
                    page.interactions.push(
                        JourneyInteractionEvent::new(SCROLL_MILESTONE_EVENT, now).with_value(milestone as f64),
                    );
                    reached.push(milestone);
                }
            }
            journey.last_activity = now;
        });

        self.found_or_warn(found, journey_id, "track_scroll_depth")?;
        Ok(reached)
    }

    /// Finalize a journey with the given outcome.
    pub fn complete_journey(
        &self,
        journey_id: &str,
        outcome: JourneyOutcome,
    ) -> Result<UserJourneyDocument, JourneyError> {
        let now = self.clock.now();
        let Some(journey) = self.store.remove(journey_id) else {
            return Err(self.unknown(journey_id, "complete_journey"));
        };
        Ok(self.finalize(journey, outcome, now, true))
    }

    /// Complete every journey idle past the timeout with `exit/timeout`.
    pub fn sweep_timeouts(&self) -> Vec<UserJourneyDocument> {
        let cutoff = self.clock.now() - Duration::seconds(self.config.timeout_seconds as i64);
        let expired = self.store.idle_since(cutoff);

        let documents: Vec<_> = expired
            .iter()
            .filter_map(|id| {
                // Activity since the scan keeps the journey live
                let journey = self.store.remove_if_idle(id, cutoff)?;
                // Close at the last activity, not at sweep time
                let end = journey.last_activity;
                Some(self.finalize(journey, JourneyOutcome::exit("timeout"), end, false))
            })
            .collect();

        if !documents.is_empty() {
            info!(
                completed = documents.len(),
                live = self.store.len(),
                "Timed-out journeys completed"
            );
        }
        documents
    }

    pub fn active_count(&self) -> usize {
        self.store.len()
    }

    /// Build the final record of a removed journey. A caller-reported exit
    /// that meets the bounce rule is reported as a bounce when
    /// `bounce_exit` is set; timeouts keep `exit/timeout`.
    fn finalize(
        &self,
        mut journey: ActiveJourney,
        outcome: JourneyOutcome,
        end: DateTime<Utc>,
        bounce_exit: bool,
    ) -> UserJourneyDocument {
        let end = end.max(journey.start_time);
        journey.current_page.close(end);
        journey.current_page.is_exit_point = true;
        journey.is_active = false;

        let mut pages = std::mem::take(&mut journey.visited_pages);
        pages.push(journey.current_page);

        let metrics = compute_metrics(
            &pages,
            journey.total_interactions,
            journey.start_time,
            end,
            self.config.bounce_max_seconds,
            self.config.bounce_max_interactions,
        );

        let outcome = if bounce_exit && outcome.outcome_type == OutcomeType::Exit && metrics.is_bounce {
            JourneyOutcome {
                outcome_type: OutcomeType::Bounce,
                ..outcome
            }
        } else {
            outcome
        };

        let mut attribution = journey.attribution;
        let mut funnel_stage = journey.funnel_stage.max(metrics.funnel_stage);
        if outcome.is_conversion() {
            let model = self.config.attribution_model;
            attribution.touchpoints = attribute_conversion(
                &attribution.touchpoints,
                model,
                outcome.conversion_value.unwrap_or(0.0),
            );
            attribution.model = Some(model);
            funnel_stage = FunnelStage::Conversion;
        }

        info!(
            journey_id = %journey.journey_id,
            session_id = %journey.session_id,
            outcome = ?outcome.outcome_type,
            pages = metrics.page_count,
            engagement = metrics.engagement_score,
            "Journey finalized"
        );

        UserJourneyDocument {
            journey_id: journey.journey_id,
            user_id: journey.user_id,
            session_id: journey.session_id,
            start_time: journey.start_time,
            end_time: end,
            entry: journey.entry,
            pages,
            device: journey.device,
            attribution,
            metrics,
            outcome,
            funnel_stage,
        }
    }

    fn found_or_warn(&self, found: bool, journey_id: &str, operation: &'static str) -> Result<(), JourneyError> {
        if found {
            Ok(())
        } else {
            Err(self.unknown(journey_id, operation))
        }
    }

    fn unknown(&self, journey_id: &str, operation: &'static str) -> JourneyError {
        warn!(journey_id, operation, "Ignoring operation on unknown or finalized journey");
        JourneyError::UnknownJourney(journey_id.to_string())
    }

    /// Source of the live journey, if any.
    pub fn last_touch(&self, journey_id: &str) -> Option<TrafficSource> {
        self.store.get(journey_id).map(|j| j.attribution.last_touch)
    }
}
