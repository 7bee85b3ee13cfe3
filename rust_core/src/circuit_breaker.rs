//! Global drawdown circuit breaker.
//!
//! This module provides:
//! - ARMED / TRIPPED state shared by every fixture in the process
//! - Drawdown admission check that trips under the same lock it checks
//! - Manual halt and manual reset (a trip never clears by itself)

use crate::risk::RiskRejection;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use tracing::{error, info};

/// Reason for circuit breaker trip
#[derive(Debug, Clone, PartialEq)]
pub enum TripReason {
    ManualHalt,
    DrawdownExceeded { drawdown: f64, threshold: f64 },
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripReason::ManualHalt => write!(f, "Manual halt"),
            TripReason::DrawdownExceeded { drawdown, threshold } => write!(
                f,
                "Max drawdown exceeded: {:.2}% (limit: {:.2}%)",
                drawdown * 100.0,
                threshold * 100.0
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Armed,
    Tripped,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Portfolio drawdown fraction above which the breaker trips
    pub drawdown_threshold: f64,
    /// Whether circuit breaker is enabled
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            drawdown_threshold: 0.15,
            enabled: true,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    trip_reason: Option<TripReason>,
    tripped_at: Option<DateTime<Utc>>,
    trip_count: u64,
}

/// Process-wide circuit breaker. Once TRIPPED, every signal is rejected
/// until `reset` is called.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Armed,
                trip_reason: None,
                tripped_at: None,
                trip_count: 0,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn is_tripped(&self) -> bool {
        self.config.enabled && self.state() == BreakerState::Tripped
    }

    /// Admit a signal given the current portfolio drawdown. Trips the breaker
    /// when the drawdown exceeds the threshold.
    pub fn admit(&self, drawdown: f64) -> Result<(), RiskRejection> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Tripped {
            return Err(RiskRejection::CircuitBreakerActive);
        }
        if drawdown > self.config.drawdown_threshold {
            let reason = TripReason::DrawdownExceeded {
                drawdown,
                threshold: self.config.drawdown_threshold,
            };
            Self::trip_locked(&mut inner, reason);
            return Err(RiskRejection::DrawdownExceeded {
                drawdown,
                threshold: self.config.drawdown_threshold,
            });
        }
        Ok(())
    }

    /// Trip the breaker. Tripping an already tripped breaker keeps the
    /// original reason.
    pub fn trip(&self, reason: TripReason) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Tripped {
            return;
        }
        Self::trip_locked(&mut inner, reason);
    }

    /// Manually halt trading
    pub fn halt(&self) {
        self.trip(TripReason::ManualHalt);
    }

    /// Re-arm the breaker
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Tripped {
            info!("Circuit breaker reset (was: {:?})", inner.trip_reason);
        }
        inner.state = BreakerState::Armed;
        inner.trip_reason = None;
        inner.tripped_at = None;
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock();
        CircuitBreakerStatus {
            enabled: self.config.enabled,
            state: inner.state,
            trip_reason: inner.trip_reason.as_ref().map(|r| r.to_string()),
            tripped_at: inner.tripped_at,
            trip_count: inner.trip_count,
        }
    }

    fn trip_locked(inner: &mut BreakerInner, reason: TripReason) {
        error!("CIRCUIT BREAKER TRIPPED: {}", reason);
        inner.state = BreakerState::Tripped;
        inner.trip_reason = Some(reason);
        inner.tripped_at = Some(Utc::now());
        inner.trip_count += 1;
    }
}

/// Circuit breaker status for reporting
#[derive(Debug, Clone)]
pub struct CircuitBreakerStatus {
    pub enabled: bool,
    pub state: BreakerState,
    pub trip_reason: Option<String>,
    pub tripped_at: Option<DateTime<Utc>>,
    pub trip_count: u64,
}

// ============================================================================
// Tests
// ============================================================================
