//! Live journey storage.

use super::ActiveJourney;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Store of live journeys, keyed by journey id with a session index.
///
/// Mutation goes through [`JourneyStore::update`] so implementations can hold
/// a per-journey lock for the duration of the change.
pub trait JourneyStore: Send + Sync {
    /// Return the live journey of a session, creating it with `create` when
    /// there is none. The flag is true when a journey was created.
    fn get_or_start(
        &self,
        session_id: &str,
        create: &mut dyn FnMut() -> ActiveJourney,
    ) -> (String, bool);

    /// Snapshot of a live journey.
    fn get(&self, journey_id: &str) -> Option<ActiveJourney>;

    fn journey_for_session(&self, session_id: &str) -> Option<String>;

    /// Apply a mutation. Returns false for unknown journeys.
    fn update(&self, journey_id: &str, apply: &mut dyn FnMut(&mut ActiveJourney)) -> bool;

    /// Remove a journey. Only one caller ever receives it.
    fn remove(&self, journey_id: &str) -> Option<ActiveJourney>;

    /// Remove a journey only if it is still idle since `cutoff`. The check
    /// and the removal are atomic with respect to [`JourneyStore::update`].
    fn remove_if_idle(&self, journey_id: &str, cutoff: DateTime<Utc>) -> Option<ActiveJourney>;

    /// Ids of journeys with no activity since `cutoff`.
    fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory journey store on sharded maps.
#[derive(Debug, Default)]
pub struct InMemoryJourneyStore {
    journeys: DashMap<String, ActiveJourney>,
    sessions: DashMap<String, String>,
}

impl InMemoryJourneyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JourneyStore for InMemoryJourneyStore {
    fn get_or_start(
        &self,
        session_id: &str,
        create: &mut dyn FnMut() -> ActiveJourney,
    ) -> (String, bool) {
        // The session entry stays locked until the journey is inserted
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                let journey = create();
                let id = journey.journey_id.clone();
                self.journeys.insert(id.clone(), journey);
                e.insert(id.clone());
                (id, true)
            }
        }
    }

    fn get(&self, journey_id: &str) -> Option<ActiveJourney> {
        self.journeys.get(journey_id).map(|j| j.clone())
    }

    fn journey_for_session(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).map(|id| id.clone())
    }

    fn update(&self, journey_id: &str, apply: &mut dyn FnMut(&mut ActiveJourney)) -> bool {
        match self.journeys.get_mut(journey_id) {
            Some(mut journey) => {
                apply(&mut journey);
                true
            }
            None => false,
        }
    }

    fn remove(&self, journey_id: &str) -> Option<ActiveJourney> {
        let (_, journey) = self.journeys.remove(journey_id)?;
        self.sessions
            .remove_if(&journey.session_id, |_, id| id == journey_id);
        Some(journey)
    }

    fn remove_if_idle(&self, journey_id: &str, cutoff: DateTime<Utc>) -> Option<ActiveJourney> {
        let (_, journey) = self
            .journeys
            .remove_if(journey_id, |_, j| j.last_activity < cutoff)?;
        self.sessions
            .remove_if(&journey.session_id, |_, id| id == journey_id);
        Some(journey)
    }

    fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.journeys
            .iter()
            .filter(|j| j.last_activity < cutoff)
            .map(|j| j.key().clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.journeys.len()
    }
}
