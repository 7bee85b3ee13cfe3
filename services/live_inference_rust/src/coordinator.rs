//! Stream coordinator: consumes match events and odds through one consumer
//! group and drives every component of the pipeline.
//!
//! Events update the fixture's MatchState, re-run the live model and publish
//! probabilities. Odds feed the market components (price history, consensus,
//! regime, liquidity) and, once probabilities exist, produce EV signals that
//! pass through the risk gates and the execution simulator before being
//! published. A message is acknowledged only after all of its side effects
//! have completed.

use crate::config::LiveInferenceConfig;
use crate::messages::{self, MarketAlert, MessageError};
use anyhow::{anyhow, Context, Result};
use live_edge_core::circuit_breaker::CircuitBreaker;
use live_edge_core::ev::calculate_ev;
use live_edge_core::event_log::{EventLog, LogRecord, ReadFrom};
use live_edge_core::execution::ExecutionSimulator;
use live_edge_core::liquidity_book::LiquidityBookStore;
use live_edge_core::market_intel::{stale_line_probability, MarketIntelligence};
use live_edge_core::models::{MarketQuote, MatchEvent, OddsUpdate, Signal};
use live_edge_core::probability::{LiveContext, LiveProbabilityModel, ShadowRunner};
use live_edge_core::regime::{MarketRegime, RegimeDetector};
use live_edge_core::risk::{PortfolioSnapshot, RiskGate, RiskRejection};
use live_edge_core::sharp_money::SharpMoneyDetector;
use live_edge_core::state::FixtureArena;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Counters for monitoring the consumer loop
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    pub events_processed: AtomicU64,
    pub odds_processed: AtomicU64,
    pub predictions_published: AtomicU64,
    pub shadow_predictions: AtomicU64,
    pub signals_published: AtomicU64,
    pub risk_blocks: AtomicU64,
    pub alerts_published: AtomicU64,
    pub processing_failures: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub fixtures_evicted: AtomicU64,
}

impl CoordinatorStats {
    pub fn snapshot(&self) -> CoordinatorStatsSnapshot {
        CoordinatorStatsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            odds_processed: self.odds_processed.load(Ordering::Relaxed),
            predictions_published: self.predictions_published.load(Ordering::Relaxed),
            shadow_predictions: self.shadow_predictions.load(Ordering::Relaxed),
            signals_published: self.signals_published.load(Ordering::Relaxed),
            risk_blocks: self.risk_blocks.load(Ordering::Relaxed),
            alerts_published: self.alerts_published.load(Ordering::Relaxed),
            processing_failures: self.processing_failures.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            fixtures_evicted: self.fixtures_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of coordinator statistics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStatsSnapshot {
    pub events_processed: u64,
    pub odds_processed: u64,
    pub predictions_published: u64,
    /// Successful shadow model runs
    pub shadow_predictions: u64,
    pub signals_published: u64,
    pub risk_blocks: u64,
    pub alerts_published: u64,
    pub processing_failures: u64,
    pub dead_lettered: u64,
    pub fixtures_evicted: u64,
}

/// Result of one read-and-process pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub read: usize,
    /// Messages left pending for another attempt
    pub failed: usize,
}

pub struct StreamCoordinator {
    config: LiveInferenceConfig,
    streams: Vec<String>,
    log: Arc<dyn EventLog>,
    model: Arc<dyn LiveProbabilityModel>,
    shadow: ShadowRunner,
    arena: FixtureArena,
    sharp: SharpMoneyDetector,
    intel: MarketIntelligence,
    regime: RegimeDetector,
    risk: RiskGate,
    simulator: ExecutionSimulator,
    portfolio: Arc<RwLock<PortfolioSnapshot>>,
    /// Failed attempts per "stream/id"
    attempts: Mutex<FxHashMap<String, u32>>,
    stats: CoordinatorStats,
}

impl StreamCoordinator {
    pub fn new(
        config: LiveInferenceConfig,
        log: Arc<dyn EventLog>,
        model: Arc<dyn LiveProbabilityModel>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(config.breaker_config()));
        let books = Arc::new(LiquidityBookStore::new(config.book_config()));

        Self {
            streams: config.input_streams(),
            log,
            model,
            shadow: ShadowRunner::default(),
            arena: FixtureArena::new(),
            sharp: SharpMoneyDetector::new(config.sharp_money_config()),
            intel: MarketIntelligence::new(config.market_intel_config()),
            regime: RegimeDetector::new(config.regime_config()),
            risk: RiskGate::new(breaker, config.extreme_ev_threshold),
            simulator: ExecutionSimulator::new(config.execution_config(), books),
            portfolio: Arc::new(RwLock::new(PortfolioSnapshot::default())),
            attempts: Mutex::new(FxHashMap::default()),
            stats: CoordinatorStats::default(),
            config,
        }
    }

    pub fn with_shadow_models(mut self, models: Vec<Arc<dyn LiveProbabilityModel>>) -> Self {
        self.shadow = ShadowRunner::new(models);
        self
    }

    /// Seed the execution simulator's draws.
    pub fn with_execution_seed(mut self, seed: u64) -> Self {
        let books = self.simulator.books().clone();
        self.simulator = ExecutionSimulator::with_seed(self.config.execution_config(), books, seed);
        self
    }

    pub fn config(&self) -> &LiveInferenceConfig {
        &self.config
    }

    pub fn arena(&self) -> &FixtureArena {
        &self.arena
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.risk.breaker()
    }

    pub fn portfolio(&self) -> Arc<RwLock<PortfolioSnapshot>> {
        self.portfolio.clone()
    }

    pub fn books(&self) -> &Arc<LiquidityBookStore> {
        self.simulator.books()
    }

    pub fn sharp_money(&self) -> &SharpMoneyDetector {
        &self.sharp
    }

    pub fn market_intel(&self) -> &MarketIntelligence {
        &self.intel
    }

    pub fn regime(&self) -> &RegimeDetector {
        &self.regime
    }

    pub fn stats(&self) -> CoordinatorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Create the consumer group on both input streams.
    pub async fn setup(&self) -> Result<()> {
        self.log
            .ensure_group(&self.streams, &self.config.consumer_group)
            .await
            .context("Failed to set up consumer group")?;
        info!(
            "Consumer group {} ready on {:?} as {}",
            self.config.consumer_group, self.streams, self.config.consumer_name
        );
        Ok(())
    }

    // ========================================================================
    // Consumer loop
    // ========================================================================

    /// Consume until shutdown is signalled. Starts from the pending list so
    /// entries left unacknowledged by a previous run are handled first.
    /// Returns an error on event log I/O failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Live inference consumer loop started");
        let mut from = ReadFrom::Pending;

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, consumer loop exiting");
                return Ok(());
            }

            let records = tokio::select! {
                records = self.read_batch(from) => records?,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    continue;
                }
            };

            if records.is_empty() {
                if from == ReadFrom::Pending {
                    debug!("Pending list drained, reading new entries");
                    from = ReadFrom::New;
                }
                continue;
            }

            let failed = self.process_batch(&records).await?;
            if failed > 0 {
                warn!(
                    "{} message(s) failed, retrying pending entries in {:?}",
                    failed,
                    self.config.error_backoff()
                );
                tokio::time::sleep(self.config.error_backoff()).await;
                from = ReadFrom::Pending;
            }
        }
    }

    /// Read one batch and process it.
    pub async fn poll_once(&self, from: ReadFrom) -> Result<BatchOutcome> {
        let records = self.read_batch(from).await?;
        let failed = self.process_batch(&records).await?;
        Ok(BatchOutcome {
            read: records.len(),
            failed,
        })
    }

    async fn read_batch(&self, from: ReadFrom) -> Result<Vec<LogRecord>> {
        self.log
            .read_group(
                &self.streams,
                &self.config.consumer_group,
                &self.config.consumer_name,
                from,
                self.config.read_count,
                self.config.read_block_ms,
            )
            .await
            .context("Failed to read from input streams")
    }

    /// Process and acknowledge each record. Returns how many failed and were
    /// left pending. Errors only on event log I/O.
    pub async fn process_batch(&self, records: &[LogRecord]) -> Result<usize> {
        let mut failed = 0;
        for record in records {
            match self.process_record(record).await {
                Ok(()) => {
                    self.ack(record).await?;
                    self.attempts.lock().remove(&attempt_key(record));
                }
                Err(e) if e.downcast_ref::<MessageError>().is_some() => {
                    error!("Malformed entry {} on {}: {:#}", record.id, record.stream, e);
                    self.dead_letter(record).await?;
                }
                Err(e) => {
                    self.stats.processing_failures.fetch_add(1, Ordering::Relaxed);
                    let attempts = {
                        let mut attempts = self.attempts.lock();
                        let count = attempts.entry(attempt_key(record)).or_insert(0);
                        *count += 1;
                        *count
                    };
                    error!(
                        "Error processing {} on {} (attempt {}/{}): {:#}",
                        record.id, record.stream, attempts, self.config.max_delivery_attempts, e
                    );
                    if attempts >= self.config.max_delivery_attempts {
                        self.dead_letter(record).await?;
                    } else {
                        failed += 1;
                    }
                }
            }
        }
        Ok(failed)
    }

    async fn ack(&self, record: &LogRecord) -> Result<()> {
        self.log
            .ack(&record.stream, &self.config.consumer_group, &record.id)
            .await
    }

    async fn dead_letter(&self, record: &LogRecord) -> Result<()> {
        error!(
            "Dead-lettering {} on {} with fields {:?}",
            record.id, record.stream, record.fields
        );
        self.ack(record).await?;
        self.attempts.lock().remove(&attempt_key(record));
        self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Handle one record under the processing deadline.
    async fn process_record(&self, record: &LogRecord) -> Result<()> {
        let timeout = self.config.processing_timeout();
        match tokio::time::timeout(timeout, self.handle_record(record)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("processing timed out after {:?}", timeout)),
        }
    }

    /// Dispatch a record by stream. Does not acknowledge.
    pub async fn handle_record(&self, record: &LogRecord) -> Result<()> {
        if record.stream == self.config.event_stream {
            let (fixture_id, event) = messages::decode_event(record)?;
            self.handle_event(&record.id, &fixture_id, &event).await
        } else if record.stream == self.config.odds_stream {
            let (fixture_id, update) = messages::decode_odds(record)?;
            self.handle_odds(&fixture_id, &update).await
        } else {
            Err(MessageError::UnknownStream(record.stream.clone()).into())
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub async fn handle_event(&self, message_id: &str, fixture_id: &str, event: &MatchEvent) -> Result<()> {
        if event.kind.is_terminal() {
            info!("Fixture {} ended ({}), releasing state", fixture_id, event.kind.as_str());
            self.evict_fixture(fixture_id);
            self.stats.events_processed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let context = {
            let state = self.arena.get_or_create(fixture_id);
            let mut state = state.lock();
            state.apply_event(message_id, event);
            LiveContext::from(&*state)
        };

        let probs = self
            .model
            .predict(&context)
            .await
            .with_context(|| format!("{} failed for {}", self.model.model_name(), fixture_id))?;

        if let Some(state) = self.arena.get(fixture_id) {
            state.lock().current_probs = Some(probs);
        }
        info!(
            "Updated probs for {} ({}-{} @ {:.0}'): home {:.3} draw {:.3} away {:.3}",
            fixture_id, context.score.0, context.score.1, context.elapsed_minutes, probs.home, probs.draw, probs.away
        );

        let fields = messages::prediction_fields(fixture_id, &probs)?;
        self.log
            .append(&self.config.prediction_stream, &fields)
            .await
            .context("Failed to publish prediction")?;
        self.stats.predictions_published.fetch_add(1, Ordering::Relaxed);

        if !self.shadow.is_empty() {
            let shadows = self.shadow.run(&context, &probs).await;
            self.stats
                .shadow_predictions
                .fetch_add(shadows.len() as u64, Ordering::Relaxed);
        }

        self.stats.events_processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drop a fixture's state from every component.
    pub fn evict_fixture(&self, fixture_id: &str) {
        let had_state = self.arena.remove(fixture_id).is_some();
        let series = self.sharp.evict_fixture(fixture_id);
        let consensus = self.intel.evict_fixture(fixture_id);
        let books = self.simulator.books().evict_fixture(fixture_id);
        let regimes = self.regime.evict_fixture(fixture_id);
        debug!(
            "Evicted {}: state={}, series={}, consensus={}, books={}, regimes={}",
            fixture_id, had_state, series, consensus, books, regimes
        );
        self.stats.fixtures_evicted.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Odds
    // ========================================================================

    pub async fn handle_odds(&self, fixture_id: &str, update: &OddsUpdate) -> Result<()> {
        let is_sharp = self.intel.is_sharp(&update.bookmaker);

        for quote in &update.values {
            if !quote.has_valid_odds() {
                debug!("Skipping unusable odds {} for {} {}", quote.odds, fixture_id, quote.selection);
                continue;
            }
            self.sharp
                .add_price(fixture_id, &update.bookmaker, &quote.selection, quote.odds, update.timestamp_ms);
            self.regime.observe(fixture_id, &quote.selection, quote.odds);

            if is_sharp {
                self.intel
                    .update_consensus(fixture_id, &update.bookmaker, &quote.selection, quote.odds);
            } else {
                self.check_market_alert(fixture_id, &update.bookmaker, quote).await?;
            }

            match &quote.depth {
                Some(levels) if !levels.is_empty() => {
                    self.simulator.update_book(fixture_id, &quote.selection, levels);
                }
                _ if self.simulator.books().config().synthetic_depth => {
                    self.simulator
                        .books()
                        .seed_synthetic(fixture_id, &quote.selection, quote.odds);
                }
                _ => {}
            }
        }
        self.stats.odds_processed.fetch_add(1, Ordering::Relaxed);

        let Some(probs) = self.arena.current_probs(fixture_id) else {
            debug!("No live probabilities for {} yet, odds only recorded", fixture_id);
            return Ok(());
        };

        let portfolio = *self.portfolio.read();
        let signals = calculate_ev(fixture_id, Some(&update.bookmaker), &probs, &update.values);
        for signal in signals {
            if signal.ev <= self.config.ev_threshold {
                continue;
            }
            if let Err(rejection) = self.gate(&signal, &portfolio) {
                self.stats.risk_blocks.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Risk block for {} {} @ {:.2} (EV {:.3}): {}",
                    fixture_id, signal.selection, signal.odds, signal.ev, rejection
                );
                continue;
            }

            info!(
                "LIVE EV SIGNAL: {} {} @ {:.2} with {} (p={:.3}, EV {:.3})",
                fixture_id, signal.selection, signal.odds, update.bookmaker, signal.prob, signal.ev
            );
            let execution = self.simulator.simulate_execution(
                fixture_id,
                &signal.selection,
                signal.odds,
                self.config.default_stake,
            );

            let fields = messages::signal_fields(&signal, &execution)?;
            self.log
                .append(&self.config.signal_stream, &fields)
                .await
                .context("Failed to publish signal")?;
            self.stats.signals_published.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Breaker state first, then the regime gate, then the remaining risk
    /// checks. A tripped breaker always reports itself as the reason.
    fn gate(&self, signal: &Signal, portfolio: &PortfolioSnapshot) -> Result<(), RiskRejection> {
        if self.risk.breaker().is_tripped() {
            return Err(RiskRejection::CircuitBreakerActive);
        }
        if let MarketRegime::Unstable { max_change } = self.regime.classify(&signal.fixture_id, &signal.selection) {
            return Err(RiskRejection::UnstableMarket { max_change });
        }
        self.risk.check_signal(signal, portfolio)
    }

    async fn check_market_alert(&self, fixture_id: &str, bookmaker: &str, quote: &MarketQuote) -> Result<()> {
        let Some(shading) = self.intel.detect_shading(fixture_id, &quote.selection, quote.odds) else {
            return Ok(());
        };
        if !shading.is_shaded && !shading.is_stale {
            return Ok(());
        }

        let volatility = self.regime.volatility(fixture_id, &quote.selection).unwrap_or(0.0);
        let sharp_bookmaker = self
            .intel
            .config()
            .sharp_bookmakers
            .iter()
            .find(|sharp| self.sharp.has_history(fixture_id, sharp, &quote.selection))
            .cloned();
        let leadership = sharp_bookmaker
            .as_deref()
            .and_then(|sharp| self.sharp.detect_leadership(fixture_id, &quote.selection, sharp, bookmaker));

        let alert = MarketAlert {
            bookmaker: bookmaker.to_string(),
            selection: quote.selection.clone(),
            odds: quote.odds,
            shading,
            stale_line_probability: stale_line_probability(shading.divergence, volatility),
            sharp_bookmaker,
            leadership,
        };

        if shading.is_shaded {
            info!(
                "Line shading: {} {} {} @ {:.2} vs consensus {:.2} ({:+.2}%)",
                fixture_id, bookmaker, quote.selection, quote.odds, shading.consensus, shading.divergence * 100.0
            );
        } else {
            info!(
                "Stale line: {} {} {} @ {:.2} vs consensus {:.2} (p_stale {:.2})",
                fixture_id, bookmaker, quote.selection, quote.odds, shading.consensus, alert.stale_line_probability
            );
        }

        let fields = messages::alert_fields(fixture_id, &alert)?;
        self.log
            .append(&self.config.alert_stream, &fields)
            .await
            .context("Failed to publish market alert")?;
        self.stats.alerts_published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn attempt_key(record: &LogRecord) -> String {
    format!("{}/{}", record.stream, record.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use live_edge_core::event_log::MemoryEventLog;
    use live_edge_core::models::{MatchEventKind, PriceLevel};
    use live_edge_core::probability::PoissonLiveModel;

    fn coordinator() -> StreamCoordinator {
        let config = LiveInferenceConfig {
            rejection_probability: 0.0,
            ..Default::default()
        };
        StreamCoordinator::new(config, Arc::new(MemoryEventLog::new()), Arc::new(PoissonLiveModel::default()))
            .with_execution_seed(3)
    }

    fn odds(bookmaker: &str, quotes: Vec<MarketQuote>) -> OddsUpdate {
        OddsUpdate {
            bookmaker: bookmaker.to_string(),
            market: None,
            values: quotes,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_odds_feed_market_components() {
        let coord = coordinator();
        let depth = vec![PriceLevel { price: 2.0, volume: 40.0 }];
        coord
            .handle_odds("f1", &odds("Pinnacle", vec![MarketQuote::new("Home", 2.0).with_depth(depth)]))
            .await
            .unwrap();

        assert_eq!(coord.market_intel().consensus("f1", "Home"), Some(2.0));
        assert_eq!(coord.sharp_money().sample_count("f1", "Pinnacle", "Home"), 1);
        assert_eq!(coord.books().snapshot("f1", "Home").unwrap().len(), 1);
        assert_eq!(coord.stats().signals_published, 0);
    }

    #[tokio::test]
    async fn test_unstable_market_blocks_signal() {
        let coord = coordinator();
        let event = MatchEvent {
            kind: MatchEventKind::parse("KICK_OFF"),
            elapsed: Some(10.0),
            data: serde_json::json!({}),
        };
        coord.handle_event("1-0", "f1", &event).await.unwrap();
        let home = coord.arena().current_probs("f1").unwrap().home;

        // Stable prices below fair value, then a jump to a value price
        let fair = 1.0 / home;
        for _ in 0..4 {
            coord
                .handle_odds("f1", &odds("Bet365", vec![MarketQuote::new("Home", fair * 0.9)]))
                .await
                .unwrap();
        }
        coord
            .handle_odds("f1", &odds("Bet365", vec![MarketQuote::new("Home", fair * 1.2)]))
            .await
            .unwrap();

        let stats = coord.stats();
        assert_eq!(stats.signals_published, 0);
        assert_eq!(stats.risk_blocks, 1);
    }

    #[test]
    fn test_tripped_breaker_outranks_unstable_market() {
        let coord = coordinator();
        coord.breaker().halt();
        for odds in [2.0, 2.0, 2.0, 2.0, 2.6] {
            coord.regime().observe("f1", "Home", odds);
        }
        assert!(coord.regime().is_unstable("f1", "Home"));

        let signal = Signal {
            fixture_id: "f1".to_string(),
            selection: "Home".to_string(),
            ev: 0.2,
            prob: 0.46,
            odds: 2.6,
            bookmaker: Some("Bet365".to_string()),
        };
        assert_eq!(
            coord.gate(&signal, &PortfolioSnapshot::default()),
            Err(RiskRejection::CircuitBreakerActive)
        );

        coord.breaker().reset();
        assert!(matches!(
            coord.gate(&signal, &PortfolioSnapshot::default()),
            Err(RiskRejection::UnstableMarket { .. })
        ));
    }

    #[tokio::test]
    async fn test_shadow_predictions_counted() {
        let coord = coordinator().with_shadow_models(vec![
            Arc::new(PoissonLiveModel::new(1.6, 1.0)) as Arc<dyn LiveProbabilityModel>,
            Arc::new(PoissonLiveModel::new(1.1, 1.3)),
        ]);
        let event = MatchEvent {
            kind: MatchEventKind::parse("SHOT"),
            elapsed: Some(30.0),
            data: serde_json::json!({}),
        };
        coord.handle_event("1-0", "f1", &event).await.unwrap();

        let stats = coord.stats();
        assert_eq!(stats.predictions_published, 1);
        assert_eq!(stats.shadow_predictions, 2);
    }

    #[tokio::test]
    async fn test_terminal_event_evicts_everywhere() {
        let coord = coordinator();
        let goal = MatchEvent {
            kind: MatchEventKind::Goal,
            elapsed: Some(20.0),
            data: serde_json::json!({ "score": [1, 0] }),
        };
        coord.handle_event("1-0", "f1", &goal).await.unwrap();
        coord
            .handle_odds("f1", &odds("Pinnacle", vec![MarketQuote::new("Home", 1.5)]))
            .await
            .unwrap();

        let full_time = MatchEvent {
            kind: MatchEventKind::FullTime,
            elapsed: Some(94.0),
            data: serde_json::json!({}),
        };
        coord.handle_event("2-0", "f1", &full_time).await.unwrap();

        assert!(!coord.arena().contains("f1"));
        assert_eq!(coord.market_intel().consensus("f1", "Home"), None);
        assert_eq!(coord.sharp_money().sample_count("f1", "Pinnacle", "Home"), 0);
        assert_eq!(coord.stats().fixtures_evicted, 1);
    }
}
