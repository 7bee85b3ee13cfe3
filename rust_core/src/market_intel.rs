//! Market intelligence: sharp consensus and soft-book line shading.
//!
//! Sharp bookmakers set the consensus price per (fixture, selection). Soft
//! bookmakers are compared against it: a price well below consensus is
//! shaded, a price well above it is stale.

use crate::models::FixtureId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct MarketIntelConfig {
    /// Bookmakers whose prices form the consensus (case-insensitive)
    pub sharp_bookmakers: Vec<String>,
    /// Divergence strictly below this is shading
    pub shading_threshold: f64,
    /// Divergence strictly above this is a stale line
    pub stale_threshold: f64,
}

impl Default for MarketIntelConfig {
    fn default() -> Self {
        Self {
            sharp_bookmakers: vec!["Pinnacle".to_string(), "Betfair".to_string()],
            shading_threshold: -0.05,
            stale_threshold: 0.03,
        }
    }
}

/// Comparison of a soft price against the sharp consensus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadingResult {
    /// `(soft - consensus) / consensus`
    pub divergence: f64,
    pub is_shaded: bool,
    pub is_stale: bool,
    pub consensus: f64,
}

pub struct MarketIntelligence {
    config: MarketIntelConfig,
    consensus: RwLock<FxHashMap<(FixtureId, String), f64>>,
}

impl MarketIntelligence {
    pub fn new(config: MarketIntelConfig) -> Self {
        Self {
            config,
            consensus: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &MarketIntelConfig {
        &self.config
    }

    pub fn is_sharp(&self, bookmaker: &str) -> bool {
        self.config
            .sharp_bookmakers
            .iter()
            .any(|sharp| sharp.eq_ignore_ascii_case(bookmaker))
    }

    /// Record a price as consensus when it comes from a sharp bookmaker.
    /// Returns whether the consensus was updated.
    pub fn update_consensus(&self, fixture_id: &str, bookmaker: &str, selection: &str, odds: f64) -> bool {
        if !self.is_sharp(bookmaker) || !odds.is_finite() || odds <= 0.0 {
            return false;
        }
        self.consensus
            .write()
            .insert((fixture_id.to_string(), selection.to_string()), odds);
        true
    }

    pub fn consensus(&self, fixture_id: &str, selection: &str) -> Option<f64> {
        self.consensus
            .read()
            .get(&(fixture_id.to_string(), selection.to_string()))
            .copied()
    }

    /// Compare a soft price with the consensus. `None` without a usable
    /// consensus.
    pub fn detect_shading(&self, fixture_id: &str, selection: &str, soft_odds: f64) -> Option<ShadingResult> {
        let consensus = self.consensus(fixture_id, selection)?;
        if consensus <= 0.0 || !soft_odds.is_finite() {
            return None;
        }
        let divergence = (soft_odds - consensus) / consensus;
        Some(ShadingResult {
            divergence,
            is_shaded: divergence < self.config.shading_threshold,
            is_stale: divergence > self.config.stale_threshold,
            consensus,
        })
    }

    pub fn evict_fixture(&self, fixture_id: &str) -> usize {
        let mut consensus = self.consensus.write();
        let before = consensus.len();
        consensus.retain(|(fixture, _), _| fixture != fixture_id);
        before - consensus.len()
    }
}

/// Rough probability that a line is stale given its divergence and the
/// market's recent volatility, clamped to [0, 1].
pub fn stale_line_probability(divergence: f64, volatility: f64) -> f64 {
    if divergence <= 0.0 {
        return 0.0;
    }
    (divergence / (volatility.max(0.0) + 0.01)).clamp(0.0, 1.0)
}
