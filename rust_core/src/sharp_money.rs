//! Sharp money detection via lead-lag correlation between bookmakers.
//!
//! Each (fixture, bookmaker, selection) keeps a time-ordered price history.
//! Two histories are resampled onto a common grid with last-observation
//! carried forward, then correlated across a range of lags. A positive lag
//! means the leader moved first.

use crate::models::FixtureId;
use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::VecDeque;

/// Leadership detection configuration
#[derive(Debug, Clone)]
pub struct SharpMoneyConfig {
    /// Correlation window in seconds
    pub window_secs: u64,
    /// Resampling grid step in seconds
    pub resolution_secs: u64,
    /// Extra history kept beyond the window, in seconds
    pub buffer_secs: u64,
    /// Largest lag tested in each direction, in grid steps
    pub max_lag: i64,
}

impl Default for SharpMoneyConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            resolution_secs: 1,
            buffer_secs: 60,
            max_lag: 10,
        }
    }
}

/// Outcome of comparing a leader's history against a follower's.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadershipResult {
    /// Lag in grid steps at maximum correlation
    pub lag: i64,
    /// Same lag expressed in seconds
    pub lag_secs: f64,
    pub correlation: f64,
    /// `correlation * sign(lag)`. Zero at lag 0: simultaneous moves show no
    /// leadership in either direction, rather than counting against the leader.
    pub leadership_score: f64,
}

impl LeadershipResult {
    pub fn neutral() -> Self {
        Self {
            lag: 0,
            lag_secs: 0.0,
            correlation: 0.0,
            leadership_score: 0.0,
        }
    }
}

/// History key: (fixture, bookmaker, selection)
type HistoryKey = (FixtureId, String, String);

pub struct SharpMoneyDetector {
    config: SharpMoneyConfig,
    history: RwLock<FxHashMap<HistoryKey, VecDeque<(i64, f64)>>>,
}

impl SharpMoneyDetector {
    pub fn new(config: SharpMoneyConfig) -> Self {
        Self {
            config,
            history: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &SharpMoneyConfig {
        &self.config
    }

    /// Record a price sample. Samples older than window + buffer relative to
    /// the newest sample are pruned.
    pub fn add_price(
        &self,
        fixture_id: &str,
        bookmaker: &str,
        selection: &str,
        price: f64,
        timestamp_ms: i64,
    ) {
        if !price.is_finite() {
            return;
        }
        let retention_ms = ((self.config.window_secs + self.config.buffer_secs) * 1000) as i64;
        let key = (
            fixture_id.to_string(),
            bookmaker.to_string(),
            selection.to_string(),
        );

        let mut history = self.history.write();
        let samples = history.entry(key).or_default();
        let idx = samples.partition_point(|&(ts, _)| ts <= timestamp_ms);
        samples.insert(idx, (timestamp_ms, price));

        if let Some(&(newest, _)) = samples.back() {
            let cutoff = newest - retention_ms;
            while samples.front().is_some_and(|&(ts, _)| ts < cutoff) {
                samples.pop_front();
            }
        }
    }

    pub fn sample_count(&self, fixture_id: &str, bookmaker: &str, selection: &str) -> usize {
        self.history
            .read()
            .get(&(
                fixture_id.to_string(),
                bookmaker.to_string(),
                selection.to_string(),
            ))
            .map_or(0, VecDeque::len)
    }

    pub fn has_history(&self, fixture_id: &str, bookmaker: &str, selection: &str) -> bool {
        self.sample_count(fixture_id, bookmaker, selection) > 0
    }

    /// Leadership of `leader` over `follower` for one selection, relative to
    /// the current wall clock.
    pub fn detect_leadership(
        &self,
        fixture_id: &str,
        selection: &str,
        leader: &str,
        follower: &str,
    ) -> Option<LeadershipResult> {
        self.detect_leadership_at(
            fixture_id,
            selection,
            leader,
            follower,
            Utc::now().timestamp_millis(),
        )
    }

    /// Leadership over the window ending at `now_ms`. `None` when either
    /// side has no history; neutral when no lag yields a defined correlation.
    pub fn detect_leadership_at(
        &self,
        fixture_id: &str,
        selection: &str,
        leader: &str,
        follower: &str,
        now_ms: i64,
    ) -> Option<LeadershipResult> {
        let step_ms = (self.config.resolution_secs.max(1) * 1000) as i64;
        let points = (self.config.window_secs / self.config.resolution_secs.max(1)) as usize;
        let start = now_ms - (self.config.window_secs * 1000) as i64;
        let grid: Vec<i64> = (0..points).map(|k| start + k as i64 * step_ms).collect();

        let (leader_series, follower_series) = {
            let history = self.history.read();
            let leader_samples = history.get(&(
                fixture_id.to_string(),
                leader.to_string(),
                selection.to_string(),
            ))?;
            let follower_samples = history.get(&(
                fixture_id.to_string(),
                follower.to_string(),
                selection.to_string(),
            ))?;
            if leader_samples.is_empty() || follower_samples.is_empty() {
                return None;
            }
            (
                resample(leader_samples, &grid),
                resample(follower_samples, &grid),
            )
        };

        let n = grid.len() as i64;
        let mut best: Option<(i64, f64)> = None;
        for lag in -self.config.max_lag..=self.config.max_lag {
            let shift = lag.unsigned_abs() as usize;
            if lag.abs() >= n {
                continue;
            }
            let (x, y) = if lag > 0 {
                (
                    &leader_series[..points - shift],
                    &follower_series[shift..],
                )
            } else {
                (
                    &leader_series[shift..],
                    &follower_series[..points - shift],
                )
            };
            let Some(corr) = pearson(x, y) else { continue };
            if best.map_or(true, |(_, c)| corr > c) {
                best = Some((lag, corr));
            }
        }

        let result = match best {
            Some((lag, correlation)) => LeadershipResult {
                lag,
                lag_secs: (lag * step_ms) as f64 / 1000.0,
                correlation,
                leadership_score: correlation * lag.signum() as f64,
            },
            None => LeadershipResult::neutral(),
        };
        Some(result)
    }

    /// Drop all histories of a fixture.
    pub fn evict_fixture(&self, fixture_id: &str) -> usize {
        let mut history = self.history.write();
        let before = history.len();
        history.retain(|(fixture, _, _), _| fixture != fixture_id);
        before - history.len()
    }

    pub fn series_count(&self) -> usize {
        self.history.read().len()
    }
}

/// Last observation carried forward onto `grid`. Grid points before the
/// first sample take the first sample's price.
fn resample(samples: &VecDeque<(i64, f64)>, grid: &[i64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(grid.len());
    let mut idx = 0;
    let mut current = samples.front().map_or(0.0, |&(_, p)| p);
    for &t in grid {
        while idx < samples.len() && samples[idx].0 <= t {
            current = samples[idx].1;
            idx += 1;
        }
        out.push(current);
    }
    out
}

/// Pearson correlation, `None` on mismatched, short or constant input.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if var_x == 0.0 || var_y == 0.0 || denom == 0.0 || !denom.is_finite() {
        return None;
    }
    Some((cov / denom).clamp(-1.0, 1.0))
}
