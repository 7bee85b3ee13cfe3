//! Shared data models for the live edge pipeline
//!
//! These types cross module boundaries: feed payloads decoded by the
//! coordinator, signals produced by the EV calculator, and execution
//! reports produced by the simulator.

use serde::{Deserialize, Serialize};

/// Opaque fixture identifier as carried on the input streams.
pub type FixtureId = String;

// ============================================================================
// Probabilities
// ============================================================================

/// Live 1X2 outcome probabilities for a fixture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl Probabilities {
    pub fn new(home: f64, draw: f64, away: f64) -> Self {
        Self { home, draw, away }
    }

    /// Probability for a selection label. Matching is case-insensitive on
    /// `home`, `draw` and `away`; any other label has no probability.
    pub fn for_selection(&self, selection: &str) -> Option<f64> {
        match selection.to_ascii_lowercase().as_str() {
            "home" => Some(self.home),
            "draw" => Some(self.draw),
            "away" => Some(self.away),
            _ => None,
        }
    }

    pub fn total(&self) -> f64 {
        self.home + self.draw + self.away
    }
}

// ============================================================================
// Feed payloads
// ============================================================================

/// One price level of market depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub volume: f64,
}

/// A bookmaker's quote for a single selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    #[serde(alias = "value")]
    pub selection: String,
    pub odds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<Vec<PriceLevel>>,
}

impl MarketQuote {
    pub fn new(selection: impl Into<String>, odds: f64) -> Self {
        Self {
            selection: selection.into(),
            odds,
            depth: None,
        }
    }

    pub fn with_depth(mut self, depth: Vec<PriceLevel>) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Decimal odds must be finite and positive to be usable anywhere.
    pub fn has_valid_odds(&self) -> bool {
        self.odds.is_finite() && self.odds > 0.0
    }
}

/// A bookmaker odds update for one fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct OddsUpdate {
    pub bookmaker: String,
    pub market: Option<String>,
    pub values: Vec<MarketQuote>,
    /// Event time in epoch milliseconds.
    pub timestamp_ms: i64,
}

/// Kind of an in-play match event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEventKind {
    Goal,
    FullTime,
    MatchFinished,
    FixtureFinalized,
    Other(String),
}

impl MatchEventKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GOAL" => MatchEventKind::Goal,
            "FULL_TIME" => MatchEventKind::FullTime,
            "MATCH_FINISHED" => MatchEventKind::MatchFinished,
            "FIXTURE_FINALIZED" => MatchEventKind::FixtureFinalized,
            _ => MatchEventKind::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MatchEventKind::Goal => "GOAL",
            MatchEventKind::FullTime => "FULL_TIME",
            MatchEventKind::MatchFinished => "MATCH_FINISHED",
            MatchEventKind::FixtureFinalized => "FIXTURE_FINALIZED",
            MatchEventKind::Other(raw) => raw,
        }
    }

    /// Terminal events end the fixture's lifetime in the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MatchEventKind::FullTime | MatchEventKind::MatchFinished | MatchEventKind::FixtureFinalized
        )
    }
}

/// A decoded match event.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchEvent {
    pub kind: MatchEventKind,
    pub elapsed: Option<f64>,
    pub data: serde_json::Value,
}

impl MatchEvent {
    /// Score carried by the payload as `[home, away]`, if well formed.
    pub fn score(&self) -> Option<(u32, u32)> {
        let score = self.data.get("score")?.as_array()?;
        if score.len() != 2 {
            return None;
        }
        let home = u32::try_from(score[0].as_u64()?).ok()?;
        let away = u32::try_from(score[1].as_u64()?).ok()?;
        Some((home, away))
    }

    pub fn team(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

// ============================================================================
// Signals & execution
// ============================================================================

/// A positive-EV opportunity for one selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    #[serde(skip_serializing)]
    pub fixture_id: FixtureId,
    pub selection: String,
    pub ev: f64,
    pub prob: f64,
    pub odds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmaker: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Executed,
    Rejected,
    NoFill,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ExecutionStatus::Executed => "EXECUTED",
            ExecutionStatus::Rejected => "REJECTED",
            ExecutionStatus::NoFill => "NO_FILL",
        };
        f.write_str(label)
    }
}

/// Simulated outcome of executing a signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub fixture_id: FixtureId,
    pub selection: String,
    pub original_odds: f64,
    pub executed_odds: f64,
    pub status: ExecutionStatus,
    /// Simulated placement delay in seconds.
    pub delay: f64,
    pub filled_stake: f64,
    pub requested_stake: f64,
}

// ============================================================================
// Stream & channel names
// ============================================================================

pub mod channels {
    /// Input: in-play match events
    pub const LIVE_EVENTS: &str = "live_events";
    /// Input: bookmaker odds updates
    pub const LIVE_ODDS: &str = "live_odds";
    /// Output: per-fixture live probabilities
    pub const LIVE_PREDICTIONS: &str = "live_predictions";
    /// Output: approved signals with their simulated execution
    pub const LIVE_SIGNALS: &str = "live_signals";
    /// Output: line shading / stale line alerts
    pub const LIVE_MARKET_ALERTS: &str = "live_market_alerts";
    /// Pub/sub: risk control commands (halt, reset, drawdown)
    pub const RISK_CONTROL: &str = "risk:control";
    /// Default consumer group
    pub const CONSUMER_GROUP: &str = "live_inference_group";
}
