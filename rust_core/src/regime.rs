//! Market regime detection from recent odds movement.
//!
//! Keeps a bounded window of odds per (fixture, selection). A window with a
//! large relative move between consecutive quotes marks the market unstable.

use crate::models::FixtureId;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RegimeConfig {
    /// Quotes kept per selection
    pub window: usize,
    /// Quotes required before a regime is classified
    pub min_samples: usize,
    /// Largest relative move tolerated between consecutive quotes
    pub max_change: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            window: 10,
            min_samples: 5,
            max_change: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarketRegime {
    /// Not enough quotes yet
    Warmup,
    Stable,
    Unstable { max_change: f64 },
}

pub struct RegimeDetector {
    config: RegimeConfig,
    history: Mutex<FxHashMap<(FixtureId, String), VecDeque<f64>>>,
}

impl RegimeDetector {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            history: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn observe(&self, fixture_id: &str, selection: &str, odds: f64) {
        if !odds.is_finite() || odds <= 0.0 {
            return;
        }
        let mut history = self.history.lock();
        let window = history
            .entry((fixture_id.to_string(), selection.to_string()))
            .or_default();
        window.push_back(odds);
        while window.len() > self.config.window.max(1) {
            window.pop_front();
        }
    }

    pub fn classify(&self, fixture_id: &str, selection: &str) -> MarketRegime {
        let history = self.history.lock();
        let Some(window) = history.get(&(fixture_id.to_string(), selection.to_string())) else {
            return MarketRegime::Warmup;
        };
        if window.len() < self.config.min_samples {
            return MarketRegime::Warmup;
        }
        let max_change = relative_changes(window).fold(0.0, f64::max);
        if max_change > self.config.max_change {
            MarketRegime::Unstable { max_change }
        } else {
            MarketRegime::Stable
        }
    }

    pub fn is_unstable(&self, fixture_id: &str, selection: &str) -> bool {
        matches!(self.classify(fixture_id, selection), MarketRegime::Unstable { .. })
    }

    /// Mean absolute relative change across the window.
    pub fn volatility(&self, fixture_id: &str, selection: &str) -> Option<f64> {
        let history = self.history.lock();
        let window = history.get(&(fixture_id.to_string(), selection.to_string()))?;
        if window.len() < 2 {
            return None;
        }
        let changes: Vec<f64> = relative_changes(window).collect();
        Some(changes.iter().sum::<f64>() / changes.len() as f64)
    }

    pub fn evict_fixture(&self, fixture_id: &str) -> usize {
        let mut history = self.history.lock();
        let before = history.len();
        history.retain(|(fixture, _), _| fixture != fixture_id);
        before - history.len()
    }
}

fn relative_changes(window: &VecDeque<f64>) -> impl Iterator<Item = f64> + '_ {
    window
        .iter()
        .zip(window.iter().skip(1))
        .map(|(prev, next)| ((next - prev) / prev).abs())
}
