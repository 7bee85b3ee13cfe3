//! Poisson Live Model
//!
//! Remaining goals for each side are independent Poisson variables whose
//! intensity scales with the share of the match still to play. Final-score
//! probabilities are summed into home/draw/away outcomes.

use super::{LiveContext, LiveProbabilityModel};
use crate::models::Probabilities;
use anyhow::{anyhow, Result};
use async_trait::async_trait;

const DEFAULT_HOME_RATE: f64 = 1.35;
const DEFAULT_AWAY_RATE: f64 = 1.10;
/// Minute by which the match is treated as over (stoppage time included)
const FULL_TIME_MINUTES: f64 = 95.0;
const REGULATION_MINUTES: f64 = 90.0;
const MAX_REMAINING_GOALS: usize = 10;

pub struct PoissonLiveModel {
    home_rate: f64,
    away_rate: f64,
    name: String,
}

impl Default for PoissonLiveModel {
    fn default() -> Self {
        Self::new(DEFAULT_HOME_RATE, DEFAULT_AWAY_RATE)
    }
}

impl PoissonLiveModel {
    /// `home_rate` and `away_rate` are expected goals over a full match.
    pub fn new(home_rate: f64, away_rate: f64) -> Self {
        Self {
            home_rate,
            away_rate,
            name: format!("poisson_{:.2}_{:.2}", home_rate, away_rate),
        }
    }

    /// Share of the full-match intensity still to come.
    fn remaining_ratio(elapsed_minutes: f64) -> f64 {
        ((FULL_TIME_MINUTES - elapsed_minutes) / REGULATION_MINUTES).max(0.0)
    }

    /// Outcome probabilities, normalised over the truncated goal range.
    pub fn outcome_probabilities(&self, score: (u32, u32), elapsed_minutes: f64) -> Probabilities {
        let ratio = Self::remaining_ratio(elapsed_minutes);
        let home_pmf = poisson_pmf(self.home_rate * ratio, MAX_REMAINING_GOALS);
        let away_pmf = poisson_pmf(self.away_rate * ratio, MAX_REMAINING_GOALS);

        let (mut home, mut draw, mut away) = (0.0, 0.0, 0.0);
        for (h, ph) in home_pmf.iter().enumerate() {
            for (a, pa) in away_pmf.iter().enumerate() {
                let p = ph * pa;
                let final_home = score.0 as usize + h;
                let final_away = score.1 as usize + a;
                if final_home > final_away {
                    home += p;
                } else if final_home == final_away {
                    draw += p;
                } else {
                    away += p;
                }
            }
        }

        let total = home + draw + away;
        Probabilities::new(home / total, draw / total, away / total)
    }
}

fn poisson_pmf(lambda: f64, max_k: usize) -> Vec<f64> {
    let mut pmf = Vec::with_capacity(max_k + 1);
    let mut p = (-lambda).exp();
    pmf.push(p);
    for k in 1..=max_k {
        p *= lambda / k as f64;
        pmf.push(p);
    }
    pmf
}

#[async_trait]
impl LiveProbabilityModel for PoissonLiveModel {
    async fn predict(&self, context: &LiveContext) -> Result<Probabilities> {
        if !context.elapsed_minutes.is_finite() {
            return Err(anyhow!(
                "Invalid elapsed time for {}: {}",
                context.fixture_id,
                context.elapsed_minutes
            ));
        }
        Ok(self.outcome_probabilities(context.score, context.elapsed_minutes))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
