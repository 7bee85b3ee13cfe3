//! Live Probability Model Abstractions
//!
//! Defines the LiveProbabilityModel trait that lets the coordinator plug in
//! any in-play 1X2 model, plus a runner for shadow models that are scored
//! alongside the primary one without affecting signals.

use crate::models::{FixtureId, Probabilities};
use crate::state::MatchState;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub mod poisson;

pub use poisson::PoissonLiveModel;

/// Inputs a live model sees for one fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveContext {
    pub fixture_id: FixtureId,
    pub home_team: String,
    pub away_team: String,
    pub score: (u32, u32),
    pub elapsed_minutes: f64,
}

impl From<&MatchState> for LiveContext {
    fn from(state: &MatchState) -> Self {
        Self {
            fixture_id: state.fixture_id.clone(),
            home_team: state.home_team.clone(),
            away_team: state.away_team.clone(),
            score: state.score,
            elapsed_minutes: state.elapsed_minutes,
        }
    }
}

/// In-play outcome probability model
///
/// Implementations must return probabilities in [0, 1] for each outcome.
#[async_trait]
pub trait LiveProbabilityModel: Send + Sync {
    /// Predict home/draw/away probabilities for the current match state
    async fn predict(&self, context: &LiveContext) -> Result<Probabilities>;

    /// Model name for logging and debugging
    fn model_name(&self) -> &str;
}

/// A shadow model's output for one prediction round.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowPrediction {
    pub model: String,
    pub probs: Probabilities,
}

/// Runs shadow models next to the primary. Failures are logged and skipped.
#[derive(Default)]
pub struct ShadowRunner {
    models: Vec<Arc<dyn LiveProbabilityModel>>,
}

impl ShadowRunner {
    pub fn new(models: Vec<Arc<dyn LiveProbabilityModel>>) -> Self {
        Self { models }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub async fn run(&self, context: &LiveContext, primary: &Probabilities) -> Vec<ShadowPrediction> {
        let mut out = Vec::with_capacity(self.models.len());
        for model in &self.models {
            match model.predict(context).await {
                Ok(probs) => {
                    debug!(
                        "Shadow {} for {}: home {:.3} (primary {:.3}), draw {:.3} ({:.3}), away {:.3} ({:.3})",
                        model.model_name(),
                        context.fixture_id,
                        probs.home,
                        primary.home,
                        probs.draw,
                        primary.draw,
                        probs.away,
                        primary.away
                    );
                    out.push(ShadowPrediction {
                        model: model.model_name().to_string(),
                        probs,
                    });
                }
                Err(e) => warn!(
                    "Shadow model {} failed for {}: {}",
                    model.model_name(),
                    context.fixture_id,
                    e
                ),
            }
        }
        out
    }
}
