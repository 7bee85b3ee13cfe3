use anyhow::{Context, Result};
use dotenv::dotenv;
use live_edge_core::event_log::EventLog;
use live_edge_core::probability::{LiveProbabilityModel, PoissonLiveModel};
use live_edge_core::redis::RedisBus;
use live_inference_rust::{spawn_control_listener, supervise, LiveInferenceConfig, StreamCoordinator};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    info!("Starting Live Inference Service...");

    let config = LiveInferenceConfig::from_env().context("Invalid configuration")?;
    info!(
        "Consumer {} in group {}, EV threshold {:.3}, drawdown threshold {:.2}",
        config.consumer_name, config.consumer_group, config.ev_threshold, config.drawdown_threshold
    );

    let bus = Arc::new(
        RedisBus::connect(&config.redis_url)
            .await
            .context("Failed to connect to Redis")?,
    );

    let model: Arc<dyn LiveProbabilityModel> = Arc::new(PoissonLiveModel::default());
    let shadows: Vec<Arc<dyn LiveProbabilityModel>> = config
        .shadow_models
        .iter()
        .map(|&(home, away)| Arc::new(PoissonLiveModel::new(home, away)) as Arc<dyn LiveProbabilityModel>)
        .collect();
    if !shadows.is_empty() {
        info!("Running {} shadow model(s)", shadows.len());
    }

    let log: Arc<dyn EventLog> = bus.clone();
    let coordinator = Arc::new(StreamCoordinator::new(config.clone(), log, model).with_shadow_models(shadows));
    coordinator.setup().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let control = spawn_control_listener(
        bus.clone(),
        config.risk_control_channel.clone(),
        coordinator.breaker().clone(),
        coordinator.portfolio(),
        config.supervisor_backoff(),
        shutdown_rx.clone(),
    );

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let loop_shutdown = shutdown_rx.clone();
    let result = supervise(
        "live inference consumer",
        config.supervisor_max_restarts,
        config.supervisor_backoff(),
        shutdown_rx,
        || {
            let coordinator = coordinator.clone();
            let shutdown = loop_shutdown.clone();
            async move {
                coordinator.setup().await?;
                coordinator.run(shutdown).await
            }
        },
    )
    .await;

    control.abort();
    let stats = coordinator.stats();
    info!(
        "Live inference stopped: {} events, {} odds, {} predictions, {} signals, {} risk blocks, {} dead-lettered",
        stats.events_processed,
        stats.odds_processed,
        stats.predictions_published,
        stats.signals_published,
        stats.risk_blocks,
        stats.dead_lettered
    );
    result
}
