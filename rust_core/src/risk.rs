//! Pre-trade risk gate for live signals.
//!
//! Checks run in a fixed order: circuit breaker, extreme EV, then portfolio
//! drawdown (which trips the breaker on breach).

use crate::circuit_breaker::CircuitBreaker;
use crate::models::Signal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Why a signal was blocked.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskRejection {
    #[error("circuit breaker active")]
    CircuitBreakerActive,

    #[error("extreme EV {ev:.3} above {threshold:.2}, possible mispricing or data error")]
    ExtremeEv { ev: f64, threshold: f64 },

    #[error("portfolio drawdown {drawdown:.3} exceeded {threshold:.2}")]
    DrawdownExceeded { drawdown: f64, threshold: f64 },

    #[error("unstable market: {max_change:.3} relative move in recent odds")]
    UnstableMarket { max_change: f64 },
}

/// Portfolio figures the gate needs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PortfolioSnapshot {
    /// Current drawdown as a fraction of peak equity
    pub drawdown: f64,
}

impl PortfolioSnapshot {
    pub fn with_drawdown(drawdown: f64) -> Self {
        Self { drawdown }
    }
}

pub struct RiskGate {
    breaker: Arc<CircuitBreaker>,
    extreme_ev_threshold: f64,
    checked: AtomicU64,
    blocked: AtomicU64,
}

impl RiskGate {
    pub fn new(breaker: Arc<CircuitBreaker>, extreme_ev_threshold: f64) -> Self {
        Self {
            breaker,
            extreme_ev_threshold,
            checked: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn check_signal(&self, signal: &Signal, portfolio: &PortfolioSnapshot) -> Result<(), RiskRejection> {
        self.checked.fetch_add(1, Ordering::Relaxed);
        let outcome = self.evaluate(signal, portfolio);
        if outcome.is_err() {
            self.blocked.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    fn evaluate(&self, signal: &Signal, portfolio: &PortfolioSnapshot) -> Result<(), RiskRejection> {
        if self.breaker.is_tripped() {
            return Err(RiskRejection::CircuitBreakerActive);
        }
        if signal.ev > self.extreme_ev_threshold {
            return Err(RiskRejection::ExtremeEv {
                ev: signal.ev,
                threshold: self.extreme_ev_threshold,
            });
        }
        self.breaker.admit(portfolio.drawdown)
    }

    /// (checked, blocked)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.checked.load(Ordering::Relaxed),
            self.blocked.load(Ordering::Relaxed),
        )
    }
}
