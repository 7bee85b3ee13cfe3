//! Per-fixture match state and the arena that owns it.
//!
//! State is created lazily on the first event for a fixture and removed when
//! a terminal event arrives. Each state sits behind its own lock, so fixtures
//! progress independently.

use crate::models::{FixtureId, MatchEvent, MatchEventKind, Probabilities};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// An event as recorded in a fixture's log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    pub message_id: String,
    pub kind: String,
    pub elapsed: Option<f64>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchState {
    pub fixture_id: FixtureId,
    pub home_team: String,
    pub away_team: String,
    pub score: (u32, u32),
    pub elapsed_minutes: f64,
    pub events: Vec<LoggedEvent>,
    pub current_probs: Option<Probabilities>,
    seen: FxHashSet<String>,
}

impl MatchState {
    pub fn new(fixture_id: impl Into<FixtureId>) -> Self {
        Self {
            fixture_id: fixture_id.into(),
            home_team: "Home".to_string(),
            away_team: "Away".to_string(),
            score: (0, 0),
            elapsed_minutes: 0.0,
            events: Vec::new(),
            current_probs: None,
            seen: FxHashSet::default(),
        }
    }

    /// Apply an event. Fields are overwritten with the event's values, so
    /// applying the same message again leaves the state unchanged; the
    /// event log records each message id once. Returns whether the message
    /// was new.
    pub fn apply_event(&mut self, message_id: &str, event: &MatchEvent) -> bool {
        if let Some(elapsed) = event.elapsed {
            if elapsed.is_finite() && elapsed >= 0.0 {
                self.elapsed_minutes = elapsed;
            }
        }
        if event.kind == MatchEventKind::Goal {
            if let Some(score) = event.score() {
                self.score = score;
            }
        }
        if let Some(home) = event.team("homeTeam") {
            self.home_team = home.to_string();
        }
        if let Some(away) = event.team("awayTeam") {
            self.away_team = away.to_string();
        }

        if !self.seen.insert(message_id.to_string()) {
            return false;
        }
        self.events.push(LoggedEvent {
            message_id: message_id.to_string(),
            kind: event.kind.as_str().to_string(),
            elapsed: event.elapsed,
            data: event.data.clone(),
        });
        true
    }
}

/// Owns every live fixture's state.
#[derive(Default)]
pub struct FixtureArena {
    fixtures: RwLock<FxHashMap<FixtureId, Arc<Mutex<MatchState>>>>,
}

impl FixtureArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fixture_id: &str) -> Option<Arc<Mutex<MatchState>>> {
        self.fixtures.read().get(fixture_id).cloned()
    }

    pub fn get_or_create(&self, fixture_id: &str) -> Arc<Mutex<MatchState>> {
        if let Some(state) = self.get(fixture_id) {
            return state;
        }
        self.fixtures
            .write()
            .entry(fixture_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(MatchState::new(fixture_id))))
            .clone()
    }

    /// Copy of a fixture's state.
    pub fn snapshot(&self, fixture_id: &str) -> Option<MatchState> {
        self.get(fixture_id).map(|state| state.lock().clone())
    }

    pub fn current_probs(&self, fixture_id: &str) -> Option<Probabilities> {
        self.get(fixture_id).and_then(|state| state.lock().current_probs)
    }

    pub fn remove(&self, fixture_id: &str) -> Option<MatchState> {
        let state = self.fixtures.write().remove(fixture_id)?;
        let snapshot = state.lock().clone();
        Some(snapshot)
    }

    pub fn contains(&self, fixture_id: &str) -> bool {
        self.fixtures.read().contains_key(fixture_id)
    }

    pub fn len(&self) -> usize {
        self.fixtures.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.read().is_empty()
    }
}
