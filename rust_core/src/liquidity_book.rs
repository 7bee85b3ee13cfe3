//! Per-selection liquidity books for fill simulation.
//!
//! This module provides:
//! - `LiquidityBook` - Price levels sorted best price first, consumed by fills
//! - `LiquidityBookStore` - Books keyed by (fixture, selection) with fast lookups
//! - Synthetic depth seeding and linear replenishment

use crate::models::{FixtureId, PriceLevel};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Prices closer than this are the same level.
const PRICE_EPSILON: f64 = 1e-9;

/// Book behaviour configuration
#[derive(Debug, Clone)]
pub struct BookConfig {
    /// Seed a synthetic ladder when a quote arrives without depth
    pub synthetic_depth: bool,
    /// Number of synthetic levels
    pub synthetic_levels: usize,
    /// Volume at the best synthetic level
    pub synthetic_base_volume: f64,
    /// Volume multiplier per level away from the best price
    pub synthetic_decay: f64,
    /// Relative price step between synthetic levels
    pub synthetic_tick: f64,
    /// Fraction of a level's initial volume restored per second (0 = never)
    pub replenish_rate_per_sec: f64,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            synthetic_depth: false,
            synthetic_levels: 5,
            synthetic_base_volume: 1000.0,
            synthetic_decay: 0.6,
            synthetic_tick: 0.01,
            replenish_rate_per_sec: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct BookLevel {
    price: f64,
    volume: f64,
    initial_volume: f64,
}

/// Result of walking a book for a stake.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub filled_stake: f64,
    /// Volume-weighted price over the consumed levels, `None` when nothing filled
    pub average_price: Option<f64>,
    pub levels_touched: usize,
}

/// Liquidity for one selection. Levels stay sorted by price, best (highest
/// decimal odds) first. Consumed levels are kept at zero volume so they can
/// be replenished.
#[derive(Debug, Clone, Default)]
pub struct LiquidityBook {
    levels: Vec<BookLevel>,
    last_replenish_ms: Option<i64>,
}

impl LiquidityBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_levels(levels: &[PriceLevel]) -> Self {
        let mut book = Self::new();
        book.merge(levels);
        book
    }

    /// Synthetic ladder below `odds`: level i sits at `odds * (1 - tick * i)`
    /// with volume `base * decay^i`.
    pub fn synthetic(odds: f64, config: &BookConfig) -> Self {
        let levels: Vec<PriceLevel> = (0..config.synthetic_levels)
            .map(|i| PriceLevel {
                price: odds * (1.0 - config.synthetic_tick * i as f64),
                volume: config.synthetic_base_volume * config.synthetic_decay.powi(i as i32),
            })
            .filter(|level| level.price > 0.0)
            .collect();
        Self::from_levels(&levels)
    }

    /// Merge new depth: known prices are replaced, new prices inserted, and a
    /// non-positive volume removes the level.
    pub fn merge(&mut self, levels: &[PriceLevel]) {
        for level in levels {
            if !level.price.is_finite() || level.price <= 0.0 || !level.volume.is_finite() {
                continue;
            }
            let existing = self
                .levels
                .iter()
                .position(|l| (l.price - level.price).abs() < PRICE_EPSILON);

            match existing {
                Some(idx) if level.volume <= 0.0 => {
                    self.levels.remove(idx);
                }
                Some(idx) => {
                    self.levels[idx].volume = level.volume;
                    self.levels[idx].initial_volume = level.volume;
                }
                None if level.volume > 0.0 => {
                    let idx = self.levels.partition_point(|l| l.price > level.price);
                    self.levels.insert(
                        idx,
                        BookLevel {
                            price: level.price,
                            volume: level.volume,
                            initial_volume: level.volume,
                        },
                    );
                }
                None => {}
            }
        }
    }

    /// Current levels, best price first, including exhausted ones.
    pub fn levels(&self) -> Vec<PriceLevel> {
        self.levels
            .iter()
            .map(|l| PriceLevel {
                price: l.price,
                volume: l.volume,
            })
            .collect()
    }

    pub fn total_volume(&self) -> f64 {
        self.levels.iter().map(|l| l.volume).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Walk levels best first, consuming volume until the stake is filled or
    /// the book runs dry.
    pub fn fill(&mut self, stake: f64) -> Fill {
        let mut remaining = stake.max(0.0);
        let mut filled = 0.0;
        let mut notional = 0.0;
        let mut touched = 0;

        for level in self.levels.iter_mut() {
            if remaining <= 0.0 {
                break;
            }
            if level.volume <= 0.0 {
                continue;
            }
            let take = remaining.min(level.volume);
            level.volume -= take;
            remaining -= take;
            filled += take;
            notional += take * level.price;
            touched += 1;
        }

        Fill {
            filled_stake: filled,
            average_price: if filled > 0.0 {
                Some(notional / filled)
            } else {
                None
            },
            levels_touched: touched,
        }
    }

    /// Restore consumed volume linearly toward each level's initial volume.
    pub fn replenish(&mut self, rate_per_sec: f64, now_ms: i64) {
        let last = self.last_replenish_ms.replace(now_ms);
        if rate_per_sec <= 0.0 {
            return;
        }
        let Some(last) = last else { return };
        let elapsed_secs = (now_ms - last).max(0) as f64 / 1000.0;
        if elapsed_secs == 0.0 {
            return;
        }
        for level in self.levels.iter_mut() {
            let restored = level.initial_volume * rate_per_sec * elapsed_secs;
            level.volume = (level.volume + restored).min(level.initial_volume);
        }
    }
}

/// Book key: (fixture, selection)
pub type BookKey = (FixtureId, String);

/// Liquidity books for every (fixture, selection) pair seen.
pub struct LiquidityBookStore {
    config: BookConfig,
    books: RwLock<FxHashMap<BookKey, Arc<Mutex<LiquidityBook>>>>,
}

impl LiquidityBookStore {
    pub fn new(config: BookConfig) -> Self {
        Self {
            config,
            books: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &BookConfig {
        &self.config
    }

    /// Merge depth into the book, creating it when absent.
    pub fn update_book(&self, fixture_id: &str, selection: &str, levels: &[PriceLevel]) {
        let book = self.get_or_create(fixture_id, selection);
        book.lock().merge(levels);
    }

    /// Seed a synthetic ladder if no book exists yet. Returns whether a book
    /// was created.
    pub fn seed_synthetic(&self, fixture_id: &str, selection: &str, odds: f64) -> bool {
        if odds <= 0.0 || !odds.is_finite() {
            return false;
        }
        let key = (fixture_id.to_string(), selection.to_string());
        let mut books = self.books.write();
        if books.contains_key(&key) {
            return false;
        }
        books.insert(
            key,
            Arc::new(Mutex::new(LiquidityBook::synthetic(odds, &self.config))),
        );
        true
    }

    pub fn get(&self, fixture_id: &str, selection: &str) -> Option<Arc<Mutex<LiquidityBook>>> {
        self.books
            .read()
            .get(&(fixture_id.to_string(), selection.to_string()))
            .cloned()
    }

    pub fn snapshot(&self, fixture_id: &str, selection: &str) -> Option<Vec<PriceLevel>> {
        self.get(fixture_id, selection).map(|book| book.lock().levels())
    }

    /// Drop every book belonging to a fixture. Returns how many were removed.
    pub fn evict_fixture(&self, fixture_id: &str) -> usize {
        let mut books = self.books.write();
        let before = books.len();
        books.retain(|(fixture, _), _| fixture != fixture_id);
        before - books.len()
    }

    pub fn book_count(&self) -> usize {
        self.books.read().len()
    }

    fn get_or_create(&self, fixture_id: &str, selection: &str) -> Arc<Mutex<LiquidityBook>> {
        if let Some(book) = self.get(fixture_id, selection) {
            return book;
        }
        self.books
            .write()
            .entry((fixture_id.to_string(), selection.to_string()))
            .or_default()
            .clone()
    }
}
