//! Execution simulation against liquidity books.
//!
//! This module provides:
//! - Randomized placement delay and bookmaker rejection
//! - Volume-weighted fills against a selection's liquidity book
//! - Random slippage fallback when no book exists
//! - Execution counters for monitoring

use crate::liquidity_book::LiquidityBookStore;
use crate::models::{ExecutionReport, ExecutionStatus, PriceLevel};
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Execution simulator configuration
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Minimum placement delay in seconds
    pub base_delay_secs: f64,
    /// Uniform jitter added on top of the base delay
    pub delay_jitter_secs: f64,
    /// Probability the bookmaker rejects the bet outright
    pub rejection_probability: f64,
    /// Upper bound of the relative price slippage without a book
    pub max_slippage: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 5.0,
            delay_jitter_secs: 3.0,
            rejection_probability: 0.1,
            max_slippage: 0.05,
        }
    }
}

/// Execution counters
#[derive(Debug, Default)]
pub struct ExecutionStats {
    pub executed: AtomicU64,
    pub rejected: AtomicU64,
    pub no_fill: AtomicU64,
}

impl ExecutionStats {
    fn record(&self, status: ExecutionStatus) {
        let counter = match status {
            ExecutionStatus::Executed => &self.executed,
            ExecutionStatus::Rejected => &self.rejected,
            ExecutionStatus::NoFill => &self.no_fill,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// (executed, rejected, no_fill)
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.executed.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.no_fill.load(Ordering::Relaxed),
        )
    }
}

/// Simulates placing a bet after a signal is approved.
pub struct ExecutionSimulator {
    config: ExecutionConfig,
    books: Arc<LiquidityBookStore>,
    rng: Mutex<StdRng>,
    stats: ExecutionStats,
}

impl ExecutionSimulator {
    pub fn new(config: ExecutionConfig, books: Arc<LiquidityBookStore>) -> Self {
        Self::with_rng(config, books, StdRng::from_entropy())
    }

    /// Deterministic draws for replay and tests.
    pub fn with_seed(config: ExecutionConfig, books: Arc<LiquidityBookStore>, seed: u64) -> Self {
        Self::with_rng(config, books, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: ExecutionConfig, books: Arc<LiquidityBookStore>, rng: StdRng) -> Self {
        Self {
            config,
            books,
            rng: Mutex::new(rng),
            stats: ExecutionStats::default(),
        }
    }

    pub fn books(&self) -> &Arc<LiquidityBookStore> {
        &self.books
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Replace or merge known depth for a selection.
    pub fn update_book(&self, fixture_id: &str, selection: &str, levels: &[PriceLevel]) {
        self.books.update_book(fixture_id, selection, levels);
    }

    /// Simulate one execution. A rejected order never touches the book.
    pub fn simulate_execution(
        &self,
        fixture_id: &str,
        selection: &str,
        quoted_odds: f64,
        stake: f64,
    ) -> ExecutionReport {
        let (delay, rejected, slippage) = {
            let mut rng = self.rng.lock();
            let delay = self.config.base_delay_secs + rng.gen::<f64>() * self.config.delay_jitter_secs;
            let rejected = rng.gen::<f64>() < self.config.rejection_probability;
            let slippage = rng.gen::<f64>() * self.config.max_slippage;
            (delay, rejected, slippage)
        };

        let report = |status, executed_odds, filled_stake| ExecutionReport {
            fixture_id: fixture_id.to_string(),
            selection: selection.to_string(),
            original_odds: quoted_odds,
            executed_odds,
            status,
            delay,
            filled_stake,
            requested_stake: stake,
        };

        let outcome = if rejected {
            report(ExecutionStatus::Rejected, 0.0, 0.0)
        } else if let Some(book) = self.books.get(fixture_id, selection) {
            let fill = {
                let mut book = book.lock();
                book.replenish(
                    self.books.config().replenish_rate_per_sec,
                    Utc::now().timestamp_millis(),
                );
                book.fill(stake)
            };
            match fill.average_price {
                Some(price) if fill.filled_stake > 0.0 => {
                    report(ExecutionStatus::Executed, price, fill.filled_stake)
                }
                _ => report(ExecutionStatus::NoFill, 0.0, 0.0),
            }
        } else {
            report(
                ExecutionStatus::Executed,
                quoted_odds * (1.0 - slippage),
                stake,
            )
        };

        debug!(
            "Simulated execution {} {}: {} @ {:.3} (quoted {:.3}, filled {:.2}/{:.2}, delay {:.2}s)",
            fixture_id,
            selection,
            outcome.status,
            outcome.executed_odds,
            quoted_odds,
            outcome.filled_stake,
            stake,
            delay
        );
        self.stats.record(outcome.status);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liquidity_book::BookConfig;

    fn no_reject() -> ExecutionConfig {
        ExecutionConfig {
            rejection_probability: 0.0,
            ..Default::default()
        }
    }

    fn store() -> Arc<LiquidityBookStore> {
        Arc::new(LiquidityBookStore::new(BookConfig::default()))
    }

    #[test]
    fn test_fill_against_book() {
        let books = store();
        books.update_book(
            "f1",
            "Home",
            &[
                PriceLevel { price: 2.10, volume: 50.0 },
                PriceLevel { price: 2.05, volume: 100.0 },
            ],
        );
        let sim = ExecutionSimulator::with_seed(no_reject(), books.clone(), 7);

        let report = sim.simulate_execution("f1", "Home", 2.10, 80.0);
        assert_eq!(report.status, ExecutionStatus::Executed);
        assert_eq!(report.filled_stake, 80.0);
        let expected = (50.0 * 2.10 + 30.0 * 2.05) / 80.0;
        assert!((report.executed_odds - expected).abs() < 1e-12);
        assert!((books.get("f1", "Home").unwrap().lock().total_volume() - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_level_fills_at_level_price() {
        let books = store();
        books.update_book("f1", "Draw", &[PriceLevel { price: 3.25, volume: 500.0 }]);
        let sim = ExecutionSimulator::with_seed(no_reject(), books, 11);

        let report = sim.simulate_execution("f1", "Draw", 3.4, 100.0);
        assert_eq!(report.status, ExecutionStatus::Executed);
        assert_eq!(report.executed_odds, 3.25);
        assert_eq!(report.filled_stake, 100.0);
    }

    #[test]
    fn test_no_fill_when_book_exhausted() {
        let books = store();
        books.update_book("f1", "Home", &[PriceLevel { price: 2.0, volume: 10.0 }]);
        let sim = ExecutionSimulator::with_seed(no_reject(), books, 7);

        assert_eq!(sim.simulate_execution("f1", "Home", 2.0, 10.0).status, ExecutionStatus::Executed);
        let report = sim.simulate_execution("f1", "Home", 2.0, 10.0);
        assert_eq!(report.status, ExecutionStatus::NoFill);
        assert_eq!(report.filled_stake, 0.0);
        assert_eq!(report.executed_odds, 0.0);
    }

    #[test]
    fn test_slippage_fallback_bounds() {
        let sim = ExecutionSimulator::with_seed(no_reject(), store(), 42);
        for _ in 0..200 {
            let report = sim.simulate_execution("f1", "Away", 3.0, 100.0);
            assert_eq!(report.status, ExecutionStatus::Executed);
            assert!(report.executed_odds <= 3.0);
            assert!(report.executed_odds >= 3.0 * 0.95);
            assert_eq!(report.filled_stake, 100.0);
            assert!(report.delay >= 5.0 && report.delay <= 8.0);
        }
    }

    #[test]
    fn test_rejection_leaves_book_untouched() {
        let books = store();
        books.update_book("f1", "Home", &[PriceLevel { price: 2.0, volume: 100.0 }]);
        let config = ExecutionConfig {
            rejection_probability: 1.0,
            ..Default::default()
        };
        let sim = ExecutionSimulator::with_seed(config, books.clone(), 1);

        let report = sim.simulate_execution("f1", "Home", 2.0, 50.0);
        assert_eq!(report.status, ExecutionStatus::Rejected);
        assert_eq!(report.filled_stake, 0.0);
        assert_eq!(books.get("f1", "Home").unwrap().lock().total_volume(), 100.0);
        assert_eq!(sim.stats().snapshot(), (0, 1, 0));
    }

    #[test]
    fn test_seeded_simulators_agree() {
        let a = ExecutionSimulator::with_seed(ExecutionConfig::default(), store(), 99);
        let b = ExecutionSimulator::with_seed(ExecutionConfig::default(), store(), 99);
        for _ in 0..20 {
            assert_eq!(
                a.simulate_execution("f1", "Draw", 3.4, 10.0),
                b.simulate_execution("f1", "Draw", 3.4, 10.0)
            );
        }
    }
}
