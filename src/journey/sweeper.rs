//! Background sweep of timed-out journeys.
//!
//! The sweep is an explicit task owned by the host: spawn it, keep the
//! handle, call [`SweeperHandle::shutdown`] to stop it.

use super::{JourneyStateTracker, UserJourneyDocument};
use crate::bot::BotScorer;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Destination for finalized journeys.
#[async_trait]
pub trait JourneySink: Send + Sync {
    async fn persist(&self, journey: &UserJourneyDocument) -> anyhow::Result<()>;
}

/// Sink that keeps finalized journeys in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    journeys: Mutex<Vec<UserJourneyDocument>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn journeys(&self) -> Vec<UserJourneyDocument> {
        self.journeys.lock().await.clone()
    }

    pub async fn take(&self) -> Vec<UserJourneyDocument> {
        std::mem::take(&mut *self.journeys.lock().await)
    }
}

#[async_trait]
impl JourneySink for CollectingSink {
    async fn persist(&self, journey: &UserJourneyDocument) -> anyhow::Result<()> {
        self.journeys.lock().await.push(journey.clone());
        Ok(())
    }
}

/// Completes idle journeys and trims bot history on an interval.
pub struct JourneySweeper {
    tracker: Arc<JourneyStateTracker>,
    bot_scorer: Option<Arc<BotScorer>>,
    sink: Arc<dyn JourneySink>,
    period: Duration,
}

impl JourneySweeper {
    pub fn new(tracker: Arc<JourneyStateTracker>, sink: Arc<dyn JourneySink>) -> Self {
        let period = Duration::from_secs(tracker.config().sweep_interval_seconds.max(1));
        Self {
            tracker,
            bot_scorer: None,
            sink,
            period,
        }
    }

    /// Also run bot history cleanup on every sweep.
    pub fn with_bot_scorer(mut self, scorer: Arc<BotScorer>) -> Self {
        self.bot_scorer = Some(scorer);
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Run one sweep. Returns the number of journeys completed.
    pub async fn sweep_once(&self) -> usize {
        let completed = self.tracker.sweep_timeouts();
        for journey in &completed {
            if let Err(e) = self.sink.persist(journey).await {
                warn!(journey_id = %journey.journey_id, error = %e, "Failed to persist timed-out journey");
            }
        }

        if let Some(scorer) = &self.bot_scorer {
            scorer.cleanup(self.tracker.clock().now());
        }

        debug!(completed = completed.len(), live = self.tracker.active_count(), "Sweep complete");
        completed.len()
    }

    /// Spawn the sweep loop on the current runtime.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            info!(period_secs = self.period.as_secs(), "Journey sweeper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    _ = &mut shutdown_rx => {
                        info!("Journey sweeper stopping");
                        break;
                    }
                }
            }
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }
}

/// Handle to a running sweeper.
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweep loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.join).await {
            warn!(error = %e, "Journey sweeper task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::JourneyConfig;
    use crate::journey::{InMemoryJourneyStore, OutcomeType, PageView};
    use crate::source::SourceClassifier;
    use chrono::{DateTime, Utc};

    fn setup() -> (Arc<JourneyStateTracker>, Arc<ManualClock>) {
        let start: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let tracker = JourneyStateTracker::new(
            JourneyConfig::default(),
            Arc::new(SourceClassifier::with_defaults()),
            Arc::new(InMemoryJourneyStore::new()),
            clock.clone(),
        );
        (Arc::new(tracker), clock)
    }

    #[tokio::test]
    async fn test_sweep_once_persists() {
        let (tracker, clock) = setup();
        tracker.start_journey("u1", "s1", &PageView::new("https://example.com/pricing"));
        clock.advance(chrono::Duration::minutes(31));

        let sink = Arc::new(CollectingSink::new());
        let sweeper = JourneySweeper::new(tracker.clone(), sink.clone());
        assert_eq!(sweeper.sweep_once().await, 1);
        assert_eq!(sweeper.sweep_once().await, 0);

        let journeys = sink.journeys().await;
        assert_eq!(journeys.len(), 1);
        assert_eq!(journeys[0].outcome.exit_reason.as_deref(), Some("timeout"));
        assert_eq!(journeys[0].outcome.outcome_type, OutcomeType::Exit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweeper_runs_and_stops() {
        let (tracker, clock) = setup();
        tracker.start_journey("u1", "s1", &PageView::new("https://example.com/"));
        clock.advance(chrono::Duration::hours(1));

        let sink = Arc::new(CollectingSink::new());
        let scorer = Arc::new(BotScorer::with_defaults());
        let handle = JourneySweeper::new(tracker.clone(), sink.clone())
            .with_bot_scorer(scorer)
            .with_period(Duration::from_secs(5))
            .spawn();

        tokio::time::sleep(Duration::from_secs(12)).await;
        handle.shutdown().await;

        assert_eq!(sink.take().await.len(), 1);
        assert_eq!(tracker.active_count(), 0);
    }
}
