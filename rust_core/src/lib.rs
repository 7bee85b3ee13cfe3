//! Live Edge Core - in-play edge detection, risk gating and execution simulation.
//!
//! This module provides:
//! - Live outcome probability models (Poisson baseline, shadow runner)
//! - Expected value calculation against bookmaker quotes
//! - Sharp money lead-lag detection and line shading intelligence
//! - Market regime detection
//! - Drawdown circuit breaker and pre-trade risk gate
//! - Liquidity books and execution simulation
//! - Per-fixture match state
//! - Consumer-group event log (Redis streams or in-memory)

pub mod backoff;
pub mod circuit_breaker;
pub mod ev;
pub mod event_log;
pub mod execution;
pub mod liquidity_book;
pub mod market_intel;
pub mod models;
pub mod probability;
pub mod redis;
pub mod regime;
pub mod risk;
pub mod sharp_money;
pub mod state;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use event_log::{EventLog, LogRecord, MemoryEventLog, ReadFrom};
pub use models::*;
pub use risk::{PortfolioSnapshot, RiskGate, RiskRejection};
