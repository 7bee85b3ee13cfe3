//! Configuration for live_inference_rust

use anyhow::{anyhow, Result};
use live_edge_core::backoff::BackoffConfig;
use live_edge_core::circuit_breaker::CircuitBreakerConfig;
use live_edge_core::execution::ExecutionConfig;
use live_edge_core::liquidity_book::BookConfig;
use live_edge_core::market_intel::MarketIntelConfig;
use live_edge_core::models::channels;
use live_edge_core::regime::RegimeConfig;
use live_edge_core::sharp_money::SharpMoneyConfig;
use std::env;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LiveInferenceConfig {
    // Redis
    pub redis_url: String,

    // Streams
    pub event_stream: String,
    pub odds_stream: String,
    pub prediction_stream: String,
    pub signal_stream: String,
    pub alert_stream: String,
    pub risk_control_channel: String,

    // Consumer group
    pub consumer_group: String,
    pub consumer_name: String,
    pub read_block_ms: u64,
    pub read_count: usize,
    pub error_backoff_ms: u64,
    pub processing_timeout_ms: u64,
    pub max_delivery_attempts: u32,

    // Signal & risk
    pub ev_threshold: f64,
    pub drawdown_threshold: f64,
    pub extreme_ev_threshold: f64,

    // Market intelligence
    pub sharp_bookmakers: Vec<String>,
    pub shading_threshold: f64,
    pub stale_threshold: f64,
    pub correlation_window_secs: u64,
    pub correlation_resolution_secs: u64,
    pub correlation_max_lag: i64,
    pub history_buffer_secs: u64,

    // Regime
    pub regime_window: usize,
    pub regime_min_samples: usize,
    pub regime_max_change: f64,

    // Execution simulation
    pub base_execution_delay_secs: f64,
    pub execution_delay_jitter_secs: f64,
    pub rejection_probability: f64,
    pub max_slippage: f64,
    pub default_stake: f64,
    pub synthetic_depth: bool,
    pub replenish_rate_per_sec: f64,

    // Supervisor
    pub supervisor_max_restarts: u32,
    pub supervisor_base_delay_ms: u64,
    pub supervisor_max_delay_ms: u64,

    // Shadow models as (home_rate, away_rate)
    pub shadow_models: Vec<(f64, f64)>,
}

impl Default for LiveInferenceConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            event_stream: channels::LIVE_EVENTS.to_string(),
            odds_stream: channels::LIVE_ODDS.to_string(),
            prediction_stream: channels::LIVE_PREDICTIONS.to_string(),
            signal_stream: channels::LIVE_SIGNALS.to_string(),
            alert_stream: channels::LIVE_MARKET_ALERTS.to_string(),
            risk_control_channel: channels::RISK_CONTROL.to_string(),
            consumer_group: channels::CONSUMER_GROUP.to_string(),
            consumer_name: default_consumer_name(),
            read_block_ms: 5000,
            read_count: 10,
            error_backoff_ms: 1000,
            processing_timeout_ms: 10_000,
            max_delivery_attempts: 5,
            ev_threshold: 0.05,
            drawdown_threshold: 0.15,
            extreme_ev_threshold: 0.5,
            sharp_bookmakers: vec!["Pinnacle".to_string(), "Betfair".to_string()],
            shading_threshold: -0.05,
            stale_threshold: 0.03,
            correlation_window_secs: 300,
            correlation_resolution_secs: 1,
            correlation_max_lag: 10,
            history_buffer_secs: 60,
            regime_window: 10,
            regime_min_samples: 5,
            regime_max_change: 0.10,
            base_execution_delay_secs: 5.0,
            execution_delay_jitter_secs: 3.0,
            rejection_probability: 0.1,
            max_slippage: 0.05,
            default_stake: 100.0,
            synthetic_depth: false,
            replenish_rate_per_sec: 0.0,
            supervisor_max_restarts: 10,
            supervisor_base_delay_ms: 1000,
            supervisor_max_delay_ms: 60_000,
            shadow_models: Vec::new(),
        }
    }
}

impl LiveInferenceConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),

            event_stream: env::var("EVENT_STREAM").unwrap_or(defaults.event_stream),
            odds_stream: env::var("ODDS_STREAM").unwrap_or(defaults.odds_stream),
            prediction_stream: env::var("PREDICTION_STREAM").unwrap_or(defaults.prediction_stream),
            signal_stream: env::var("SIGNAL_STREAM").unwrap_or(defaults.signal_stream),
            alert_stream: env::var("ALERT_STREAM").unwrap_or(defaults.alert_stream),
            risk_control_channel: env::var("RISK_CONTROL_CHANNEL")
                .unwrap_or(defaults.risk_control_channel),

            consumer_group: env::var("CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            consumer_name: env::var("CONSUMER_NAME").unwrap_or(defaults.consumer_name),
            read_block_ms: parse_u64("READ_BLOCK_MS", defaults.read_block_ms)?,
            read_count: parse_u64("READ_COUNT", defaults.read_count as u64)? as usize,
            error_backoff_ms: parse_u64("ERROR_BACKOFF_MS", defaults.error_backoff_ms)?,
            processing_timeout_ms: parse_u64("PROCESSING_TIMEOUT_MS", defaults.processing_timeout_ms)?,
            max_delivery_attempts: parse_u32("MAX_DELIVERY_ATTEMPTS", defaults.max_delivery_attempts)?,

            ev_threshold: parse_f64("EV_THRESHOLD", defaults.ev_threshold)?,
            drawdown_threshold: parse_f64("DRAWDOWN_THRESHOLD", defaults.drawdown_threshold)?,
            extreme_ev_threshold: parse_f64("EXTREME_EV_THRESHOLD", defaults.extreme_ev_threshold)?,

            sharp_bookmakers: match env::var("SHARP_BOOKMAKERS") {
                Ok(raw) => parse_list(&raw),
                Err(_) => defaults.sharp_bookmakers,
            },
            shading_threshold: parse_f64("SHADING_THRESHOLD", defaults.shading_threshold)?,
            stale_threshold: parse_f64("STALE_THRESHOLD", defaults.stale_threshold)?,
            correlation_window_secs: parse_u64("CORRELATION_WINDOW_SECS", defaults.correlation_window_secs)?,
            correlation_resolution_secs: parse_u64(
                "CORRELATION_RESOLUTION_SECS",
                defaults.correlation_resolution_secs,
            )?,
            correlation_max_lag: parse_u64("CORRELATION_MAX_LAG", defaults.correlation_max_lag as u64)? as i64,
            history_buffer_secs: parse_u64("HISTORY_BUFFER_SECS", defaults.history_buffer_secs)?,

            regime_window: parse_u64("REGIME_WINDOW", defaults.regime_window as u64)? as usize,
            regime_min_samples: parse_u64("REGIME_MIN_SAMPLES", defaults.regime_min_samples as u64)? as usize,
            regime_max_change: parse_f64("REGIME_MAX_CHANGE", defaults.regime_max_change)?,

            base_execution_delay_secs: parse_f64(
                "BASE_EXECUTION_DELAY_SECS",
                defaults.base_execution_delay_secs,
            )?,
            execution_delay_jitter_secs: parse_f64(
                "EXECUTION_DELAY_JITTER_SECS",
                defaults.execution_delay_jitter_secs,
            )?,
            rejection_probability: parse_f64("REJECTION_PROBABILITY", defaults.rejection_probability)?,
            max_slippage: parse_f64("MAX_SLIPPAGE", defaults.max_slippage)?,
            default_stake: parse_f64("DEFAULT_STAKE", defaults.default_stake)?,
            synthetic_depth: parse_bool("SYNTHETIC_DEPTH", defaults.synthetic_depth)?,
            replenish_rate_per_sec: parse_f64("REPLENISH_RATE_PER_SEC", defaults.replenish_rate_per_sec)?,

            supervisor_max_restarts: parse_u32("SUPERVISOR_MAX_RESTARTS", defaults.supervisor_max_restarts)?,
            supervisor_base_delay_ms: parse_u64("SUPERVISOR_BASE_DELAY_MS", defaults.supervisor_base_delay_ms)?,
            supervisor_max_delay_ms: parse_u64("SUPERVISOR_MAX_DELAY_MS", defaults.supervisor_max_delay_ms)?,

            shadow_models: match env::var("SHADOW_MODELS") {
                Ok(raw) => parse_shadow_models(&raw)?,
                Err(_) => defaults.shadow_models,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ev_threshold < 0.0 {
            return Err(anyhow!("EV_THRESHOLD must be >= 0"));
        }
        if self.drawdown_threshold <= 0.0 || self.drawdown_threshold > 1.0 {
            return Err(anyhow!("DRAWDOWN_THRESHOLD must be in (0, 1]"));
        }
        if self.extreme_ev_threshold <= self.ev_threshold {
            return Err(anyhow!("EXTREME_EV_THRESHOLD must be > EV_THRESHOLD"));
        }
        if !(0.0..=1.0).contains(&self.rejection_probability) {
            return Err(anyhow!("REJECTION_PROBABILITY must be between 0 and 1"));
        }
        if !(0.0..1.0).contains(&self.max_slippage) {
            return Err(anyhow!("MAX_SLIPPAGE must be in [0, 1)"));
        }
        if self.default_stake <= 0.0 {
            return Err(anyhow!("DEFAULT_STAKE must be > 0"));
        }
        if self.base_execution_delay_secs < 0.0 || self.execution_delay_jitter_secs < 0.0 {
            return Err(anyhow!("Execution delays must be >= 0"));
        }
        if self.replenish_rate_per_sec < 0.0 {
            return Err(anyhow!("REPLENISH_RATE_PER_SEC must be >= 0"));
        }
        if self.shading_threshold >= 0.0 || self.stale_threshold <= 0.0 {
            return Err(anyhow!("SHADING_THRESHOLD must be < 0 and STALE_THRESHOLD > 0"));
        }
        if self.correlation_resolution_secs == 0
            || self.correlation_window_secs < self.correlation_resolution_secs
        {
            return Err(anyhow!(
                "CORRELATION_WINDOW_SECS must be >= CORRELATION_RESOLUTION_SECS > 0"
            ));
        }
        if self.read_count == 0 {
            return Err(anyhow!("READ_COUNT must be > 0"));
        }
        if self.max_delivery_attempts == 0 {
            return Err(anyhow!("MAX_DELIVERY_ATTEMPTS must be > 0"));
        }
        if self.regime_min_samples < 2 || self.regime_window < self.regime_min_samples {
            return Err(anyhow!("REGIME_WINDOW must be >= REGIME_MIN_SAMPLES >= 2"));
        }
        if self.sharp_bookmakers.is_empty() {
            return Err(anyhow!("SHARP_BOOKMAKERS must name at least one bookmaker"));
        }
        Ok(())
    }

    pub fn input_streams(&self) -> Vec<String> {
        vec![self.event_stream.clone(), self.odds_stream.clone()]
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            drawdown_threshold: self.drawdown_threshold,
            ..Default::default()
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            base_delay_secs: self.base_execution_delay_secs,
            delay_jitter_secs: self.execution_delay_jitter_secs,
            rejection_probability: self.rejection_probability,
            max_slippage: self.max_slippage,
        }
    }

    pub fn book_config(&self) -> BookConfig {
        BookConfig {
            synthetic_depth: self.synthetic_depth,
            replenish_rate_per_sec: self.replenish_rate_per_sec,
            ..Default::default()
        }
    }

    pub fn sharp_money_config(&self) -> SharpMoneyConfig {
        SharpMoneyConfig {
            window_secs: self.correlation_window_secs,
            resolution_secs: self.correlation_resolution_secs,
            buffer_secs: self.history_buffer_secs,
            max_lag: self.correlation_max_lag,
        }
    }

    pub fn market_intel_config(&self) -> MarketIntelConfig {
        MarketIntelConfig {
            sharp_bookmakers: self.sharp_bookmakers.clone(),
            shading_threshold: self.shading_threshold,
            stale_threshold: self.stale_threshold,
        }
    }

    pub fn regime_config(&self) -> RegimeConfig {
        RegimeConfig {
            window: self.regime_window,
            min_samples: self.regime_min_samples,
            max_change: self.regime_max_change,
        }
    }

    pub fn supervisor_backoff(&self) -> BackoffConfig {
        BackoffConfig::new(self.supervisor_base_delay_ms, self.supervisor_max_delay_ms)
    }
}

/// `live_inference_<hostname>`, or a random suffix when the hostname is unavailable
fn default_consumer_name() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty());
    match host {
        Some(host) => format!("live_inference_{}", host),
        None => format!("live_inference_{}", Uuid::new_v4()),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `home:away,home:away` intensity pairs
pub fn parse_shadow_models(raw: &str) -> Result<Vec<(f64, f64)>> {
    parse_list(raw)
        .iter()
        .map(|pair| {
            let (home, away) = pair
                .split_once(':')
                .ok_or_else(|| anyhow!("SHADOW_MODELS entry '{}' must be home:away", pair))?;
            let home: f64 = home
                .trim()
                .parse()
                .map_err(|_| anyhow!("SHADOW_MODELS entry '{}' has an invalid home rate", pair))?;
            let away: f64 = away
                .trim()
                .parse()
                .map_err(|_| anyhow!("SHADOW_MODELS entry '{}' has an invalid away rate", pair))?;
            if home <= 0.0 || away <= 0.0 {
                return Err(anyhow!("SHADOW_MODELS rates must be > 0 in '{}'", pair));
            }
            Ok((home, away))
        })
        .collect()
}

/// Parse environment variable as f64 with default fallback
fn parse_f64(var_name: &str, default: f64) -> Result<f64> {
    match env::var(var_name) {
        Ok(val) => val.parse().map_err(|_| anyhow!("{} must be a valid f64", var_name)),
        Err(_) => Ok(default),
    }
}

/// Parse environment variable as u32 with default fallback
fn parse_u32(var_name: &str, default: u32) -> Result<u32> {
    match env::var(var_name) {
        Ok(val) => val.parse().map_err(|_| anyhow!("{} must be a valid u32", var_name)),
        Err(_) => Ok(default),
    }
}

/// Parse environment variable as u64 with default fallback
fn parse_u64(var_name: &str, default: u64) -> Result<u64> {
    match env::var(var_name) {
        Ok(val) => val.parse().map_err(|_| anyhow!("{} must be a valid u64", var_name)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(var_name: &str, default: bool) -> Result<bool> {
    match env::var(var_name) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("{} must be a boolean", var_name)),
        },
        Err(_) => Ok(default),
    }
}
