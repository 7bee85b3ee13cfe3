//! Integration tests for the live inference pipeline
//!
//! These tests drive the coordinator through the in-memory event log, so no
//! Redis instance is needed.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use live_edge_core::event_log::{EventLog, MemoryEventLog, ReadFrom};
use live_edge_core::models::Probabilities;
use live_edge_core::probability::{LiveContext, LiveProbabilityModel};
use live_inference_rust::{LiveInferenceConfig, StreamCoordinator};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Always returns the same probabilities
struct FixedModel(Probabilities);

#[async_trait]
impl LiveProbabilityModel for FixedModel {
    async fn predict(&self, _context: &LiveContext) -> Result<Probabilities> {
        Ok(self.0)
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

/// Fails a set number of times before predicting
struct FlakyModel {
    failures_left: AtomicU32,
}

#[async_trait]
impl LiveProbabilityModel for FlakyModel {
    async fn predict(&self, _context: &LiveContext) -> Result<Probabilities> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(anyhow!("model backend unavailable"));
        }
        Ok(Probabilities::new(0.5, 0.3, 0.2))
    }

    fn model_name(&self) -> &str {
        "flaky"
    }
}

/// Stalls past the processing deadline on its first call
struct StallingModel {
    stalled: AtomicU32,
}

#[async_trait]
impl LiveProbabilityModel for StallingModel {
    async fn predict(&self, _context: &LiveContext) -> Result<Probabilities> {
        if self.stalled.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(Probabilities::new(0.5, 0.3, 0.2))
    }

    fn model_name(&self) -> &str {
        "stalling"
    }
}

fn test_config() -> LiveInferenceConfig {
    LiveInferenceConfig {
        consumer_name: "test_consumer".to_string(),
        read_block_ms: 10,
        error_backoff_ms: 5,
        rejection_probability: 0.0,
        max_delivery_attempts: 3,
        ..Default::default()
    }
}

async fn setup(model: Arc<dyn LiveProbabilityModel>) -> (Arc<MemoryEventLog>, StreamCoordinator) {
    let log = Arc::new(MemoryEventLog::new());
    let coordinator = StreamCoordinator::new(test_config(), log.clone(), model).with_execution_seed(42);
    coordinator.setup().await.expect("group setup should succeed");
    (log, coordinator)
}

fn fixed_model() -> Arc<dyn LiveProbabilityModel> {
    Arc::new(FixedModel(Probabilities::new(0.5, 0.3, 0.2)))
}

async fn push_event(log: &MemoryEventLog, fixture: &str, kind: &str, data: &str) {
    log.append(
        "live_events",
        &[
            ("fixtureId", fixture.to_string()),
            ("type", kind.to_string()),
            ("data", data.to_string()),
        ],
    )
    .await
    .unwrap();
}

async fn push_odds(log: &MemoryEventLog, fixture: &str, bookmaker: &str, values: &str) {
    log.append(
        "live_odds",
        &[
            ("fixtureId", fixture.to_string()),
            ("bookmaker", bookmaker.to_string()),
            ("values", values.to_string()),
        ],
    )
    .await
    .unwrap();
}

fn json_field(entry: &std::collections::HashMap<String, String>, field: &str) -> Value {
    serde_json::from_str(&entry[field]).expect("field should hold JSON")
}

#[tokio::test]
async fn test_event_publishes_prediction_and_acks() {
    let (log, coordinator) = setup(fixed_model()).await;
    push_event(&log, "100", "GOAL", r#"{"score":[1,0],"elapsed":23}"#).await;

    let outcome = coordinator.poll_once(ReadFrom::New).await.unwrap();
    assert_eq!(outcome.read, 1);
    assert_eq!(outcome.failed, 0);

    let predictions = log.entries("live_predictions");
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0]["fixtureId"], "100");
    let probs = json_field(&predictions[0], "probs");
    assert_eq!(probs["home"], 0.5);

    let state = coordinator.arena().snapshot("100").unwrap();
    assert_eq!(state.score, (1, 0));
    assert_eq!(state.elapsed_minutes, 23.0);
    assert_eq!(log.pending_count("live_events", "live_inference_group"), 0);
}

#[tokio::test]
async fn test_redelivered_event_is_idempotent() {
    let (log, coordinator) = setup(fixed_model()).await;
    push_event(&log, "100", "GOAL", r#"{"score":[1,0],"elapsed":23}"#).await;

    let records = log
        .read_group(
            &["live_events".to_string(), "live_odds".to_string()],
            "live_inference_group",
            "test_consumer",
            ReadFrom::New,
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(records.len(), 1);

    coordinator.handle_record(&records[0]).await.unwrap();
    let first = coordinator.arena().snapshot("100").unwrap();
    coordinator.handle_record(&records[0]).await.unwrap();
    let second = coordinator.arena().snapshot("100").unwrap();

    assert_eq!(first.score, second.score);
    assert_eq!(first.elapsed_minutes, second.elapsed_minutes);
    assert_eq!(second.events.len(), 1);
}

#[tokio::test]
async fn test_value_odds_produce_executed_signal() {
    let (log, coordinator) = setup(fixed_model()).await;
    push_event(&log, "200", "KICK_OFF", r#"{"elapsed":1}"#).await;
    push_odds(
        &log,
        "200",
        "Bet365",
        r#"[{"selection":"Home","odds":2.4,"depth":[{"price":2.4,"volume":60},{"price":2.3,"volume":100}]},
            {"selection":"Draw","odds":3.0},
            {"selection":"Away","odds":4.5}]"#,
    )
    .await;

    let outcome = coordinator.poll_once(ReadFrom::New).await.unwrap();
    assert_eq!(outcome.read, 2);
    assert_eq!(outcome.failed, 0);

    let signals = log.entries("live_signals");
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0]["fixtureId"], "200");

    let signal = json_field(&signals[0], "signal");
    assert_eq!(signal["selection"], "Home");
    assert!((signal["ev"].as_f64().unwrap() - 0.2).abs() < 1e-9);

    let execution = json_field(&signals[0], "execution");
    assert_eq!(execution["status"], "EXECUTED");
    assert_eq!(execution["filledStake"], 100.0);
    assert!((execution["executedOdds"].as_f64().unwrap() - 2.36).abs() < 1e-9);

    // Consumed depth does not come back without replenishment
    let remaining = coordinator.books().snapshot("200", "Home").unwrap();
    let total: f64 = remaining.iter().map(|level| level.volume).sum();
    assert!((total - 60.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_ev_below_threshold_is_not_signalled() {
    let (log, coordinator) = setup(fixed_model()).await;
    push_event(&log, "300", "KICK_OFF", r#"{"elapsed":1}"#).await;
    // EV = 0.5 * 2.08 - 1 = 0.04
    push_odds(&log, "300", "Bet365", r#"[{"selection":"Home","odds":2.08}]"#).await;

    coordinator.poll_once(ReadFrom::New).await.unwrap();
    assert!(log.entries("live_signals").is_empty());
    assert_eq!(coordinator.stats().risk_blocks, 0);
}

#[tokio::test]
async fn test_tripped_breaker_blocks_signals() {
    let (log, coordinator) = setup(fixed_model()).await;
    coordinator.breaker().halt();

    push_event(&log, "400", "KICK_OFF", r#"{"elapsed":1}"#).await;
    push_odds(&log, "400", "Bet365", r#"[{"selection":"Home","odds":2.4}]"#).await;

    let outcome = coordinator.poll_once(ReadFrom::New).await.unwrap();
    assert_eq!(outcome.failed, 0);
    assert!(log.entries("live_signals").is_empty());
    assert_eq!(coordinator.stats().risk_blocks, 1);

    // Blocked odds are still acknowledged
    assert_eq!(log.pending_count("live_odds", "live_inference_group"), 0);
}

#[tokio::test]
async fn test_drawdown_trips_breaker_for_later_signals() {
    let (log, coordinator) = setup(fixed_model()).await;
    coordinator.portfolio().write().drawdown = 0.2;

    push_event(&log, "450", "KICK_OFF", r#"{"elapsed":1}"#).await;
    push_odds(&log, "450", "Bet365", r#"[{"selection":"Home","odds":2.4}]"#).await;
    coordinator.poll_once(ReadFrom::New).await.unwrap();

    assert!(coordinator.breaker().is_tripped());
    assert!(log.entries("live_signals").is_empty());

    // Recovery alone does not re-arm the breaker
    coordinator.portfolio().write().drawdown = 0.0;
    push_odds(&log, "450", "Bet365", r#"[{"selection":"Home","odds":2.4}]"#).await;
    coordinator.poll_once(ReadFrom::New).await.unwrap();
    assert!(log.entries("live_signals").is_empty());

    coordinator.breaker().reset();
    push_odds(&log, "450", "Bet365", r#"[{"selection":"Home","odds":2.4}]"#).await;
    coordinator.poll_once(ReadFrom::New).await.unwrap();
    assert_eq!(log.entries("live_signals").len(), 1);
}

#[tokio::test]
async fn test_odds_before_probabilities_still_update_book() {
    let (log, coordinator) = setup(fixed_model()).await;
    push_odds(
        &log,
        "500",
        "Bet365",
        r#"[{"selection":"Home","odds":2.4,"depth":[{"price":2.4,"volume":80}]}]"#,
    )
    .await;

    let outcome = coordinator.poll_once(ReadFrom::New).await.unwrap();
    assert_eq!(outcome.failed, 0);
    assert!(log.entries("live_signals").is_empty());
    assert_eq!(coordinator.books().snapshot("500", "Home").unwrap()[0].volume, 80.0);
    assert_eq!(log.pending_count("live_odds", "live_inference_group"), 0);
}

#[tokio::test]
async fn test_shaded_soft_quote_raises_alert() {
    let (log, coordinator) = setup(fixed_model()).await;
    push_odds(&log, "550", "Pinnacle", r#"[{"selection":"Away","odds":4.0}]"#).await;
    push_odds(&log, "550", "Bet365", r#"[{"selection":"Away","odds":3.6}]"#).await;

    coordinator.poll_once(ReadFrom::New).await.unwrap();

    let alerts = log.entries("live_market_alerts");
    assert_eq!(alerts.len(), 1);
    let alert = json_field(&alerts[0], "alert");
    assert_eq!(alert["bookmaker"], "Bet365");
    assert_eq!(alert["isShaded"], true);
    assert_eq!(alert["sharpBookmaker"], "Pinnacle");
}

#[tokio::test]
async fn test_full_time_evicts_fixture() {
    let (log, coordinator) = setup(fixed_model()).await;
    push_event(&log, "600", "GOAL", r#"{"score":[0,1],"elapsed":50}"#).await;
    push_odds(
        &log,
        "600",
        "Pinnacle",
        r#"[{"selection":"Away","odds":1.5,"depth":[{"price":1.5,"volume":10}]}]"#,
    )
    .await;
    coordinator.poll_once(ReadFrom::New).await.unwrap();
    assert!(coordinator.arena().contains("600"));

    push_event(&log, "600", "FULL_TIME", r#"{"score":[0,1],"elapsed":95}"#).await;
    coordinator.poll_once(ReadFrom::New).await.unwrap();

    assert!(!coordinator.arena().contains("600"));
    assert!(coordinator.books().snapshot("600", "Away").is_none());
    assert_eq!(coordinator.market_intel().consensus("600", "Away"), None);
    assert_eq!(coordinator.sharp_money().sample_count("600", "Pinnacle", "Away"), 0);
}

#[tokio::test]
async fn test_malformed_message_is_dead_lettered() {
    let (log, coordinator) = setup(fixed_model()).await;
    log.append("live_odds", &[("fixtureId", "700".to_string()), ("values", "[]".to_string())])
        .await
        .unwrap();
    push_event(&log, "700", "GOAL", "{not json").await;

    let outcome = coordinator.poll_once(ReadFrom::New).await.unwrap();
    assert_eq!(outcome.read, 2);
    assert_eq!(outcome.failed, 0);
    assert_eq!(coordinator.stats().dead_lettered, 2);
    assert_eq!(log.pending_count("live_odds", "live_inference_group"), 0);
    assert_eq!(log.pending_count("live_events", "live_inference_group"), 0);
}

#[tokio::test]
async fn test_failed_message_retried_from_pending() {
    let model = Arc::new(FlakyModel {
        failures_left: AtomicU32::new(1),
    });
    let (log, coordinator) = setup(model).await;
    push_event(&log, "800", "GOAL", r#"{"score":[1,0],"elapsed":10}"#).await;

    let first = coordinator.poll_once(ReadFrom::New).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(log.pending_count("live_events", "live_inference_group"), 1);
    assert!(log.entries("live_predictions").is_empty());

    let retry = coordinator.poll_once(ReadFrom::Pending).await.unwrap();
    assert_eq!(retry.read, 1);
    assert_eq!(retry.failed, 0);
    assert_eq!(log.pending_count("live_events", "live_inference_group"), 0);
    assert_eq!(log.entries("live_predictions").len(), 1);

    // The retried delivery did not double-apply the goal
    assert_eq!(coordinator.arena().snapshot("800").unwrap().score, (1, 0));
}

#[tokio::test]
async fn test_timed_out_message_left_pending_and_retried() {
    let log = Arc::new(MemoryEventLog::new());
    let config = LiveInferenceConfig {
        processing_timeout_ms: 50,
        ..test_config()
    };
    let model = Arc::new(StallingModel {
        stalled: AtomicU32::new(0),
    });
    let coordinator = StreamCoordinator::new(config, log.clone(), model);
    coordinator.setup().await.unwrap();
    push_event(&log, "850", "GOAL", r#"{"score":[0,1],"elapsed":61}"#).await;

    let first = coordinator.poll_once(ReadFrom::New).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(coordinator.stats().processing_failures, 1);
    assert_eq!(log.pending_count("live_events", "live_inference_group"), 1);

    // The event log stays usable after the abandoned attempt
    let retry = coordinator.poll_once(ReadFrom::Pending).await.unwrap();
    assert_eq!(retry.failed, 0);
    assert_eq!(log.entries("live_predictions").len(), 1);
    assert_eq!(log.pending_count("live_events", "live_inference_group"), 0);
}

#[tokio::test]
async fn test_poison_message_dead_lettered_after_max_attempts() {
    let model = Arc::new(FlakyModel {
        failures_left: AtomicU32::new(u32::MAX),
    });
    let (log, coordinator) = setup(model).await;
    push_event(&log, "900", "GOAL", r#"{"score":[1,0],"elapsed":10}"#).await;

    let first = coordinator.poll_once(ReadFrom::New).await.unwrap();
    assert_eq!(first.failed, 1);
    let second = coordinator.poll_once(ReadFrom::Pending).await.unwrap();
    assert_eq!(second.failed, 1);
    let third = coordinator.poll_once(ReadFrom::Pending).await.unwrap();
    assert_eq!(third.failed, 0);

    let stats = coordinator.stats();
    assert_eq!(stats.processing_failures, 3);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(log.pending_count("live_events", "live_inference_group"), 0);
}

#[tokio::test]
async fn test_run_loop_processes_until_shutdown() {
    let log = Arc::new(MemoryEventLog::new());
    let coordinator = Arc::new(
        StreamCoordinator::new(test_config(), log.clone(), fixed_model()).with_execution_seed(7),
    );
    coordinator.setup().await.unwrap();

    let (tx, rx) = watch::channel(false);
    let runner = coordinator.clone();
    let handle = tokio::spawn(async move { runner.run(rx).await });

    push_event(&log, "1000", "GOAL", r#"{"score":[1,0],"elapsed":12}"#).await;
    push_odds(&log, "1000", "Bet365", r#"[{"selection":"Home","odds":2.5}]"#).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while log.entries("live_signals").is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("run loop should stop on shutdown")
        .unwrap();
    assert!(result.is_ok());

    assert_eq!(log.entries("live_predictions").len(), 1);
    assert_eq!(log.entries("live_signals").len(), 1);
    assert_eq!(coordinator.stats().events_processed, 1);
}
