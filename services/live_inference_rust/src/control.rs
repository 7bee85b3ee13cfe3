//! External risk control over Redis pub/sub
//!
//! Operators publish JSON commands on the control channel to halt or re-arm
//! the circuit breaker, or to report the portfolio drawdown the risk gate
//! checks against.

use anyhow::{bail, Result};
use futures_util::StreamExt;
use live_edge_core::backoff::BackoffConfig;
use live_edge_core::circuit_breaker::CircuitBreaker;
use live_edge_core::redis::RedisBus;
use live_edge_core::risk::PortfolioSnapshot;
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ControlCommand {
    /// Re-arm a tripped breaker
    Reset,
    /// Trip the breaker manually
    Halt,
    /// Report the current portfolio drawdown
    Drawdown { value: f64 },
}

impl ControlCommand {
    pub fn parse(payload: &str) -> Result<Self> {
        let command: ControlCommand = serde_json::from_str(payload)?;
        if let ControlCommand::Drawdown { value } = command {
            if !value.is_finite() || value < 0.0 {
                bail!("drawdown must be a non-negative number, got {}", value);
            }
        }
        Ok(command)
    }
}

pub fn apply_command(
    command: &ControlCommand,
    breaker: &CircuitBreaker,
    portfolio: &RwLock<PortfolioSnapshot>,
) {
    match command {
        ControlCommand::Reset => {
            breaker.reset();
            warn!("Circuit breaker reset via control channel");
        }
        ControlCommand::Halt => {
            breaker.halt();
            error!("Circuit breaker HALTED via control channel");
        }
        ControlCommand::Drawdown { value } => {
            portfolio.write().drawdown = *value;
            info!("Portfolio drawdown set to {:.2}%", value * 100.0);
        }
    }
}

/// Listen for control commands until shutdown, resubscribing with backoff
/// whenever the subscription drops.
pub fn spawn_control_listener(
    bus: Arc<RedisBus>,
    channel: String,
    breaker: Arc<CircuitBreaker>,
    portfolio: Arc<RwLock<PortfolioSnapshot>>,
    backoff: BackoffConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return;
            }

            match bus.subscribe(&channel).await {
                Ok(mut pubsub) => {
                    attempt = 0;
                    info!("Risk control listening on {}", channel);

                    let mut stream = pubsub.on_message();
                    loop {
                        let msg = tokio::select! {
                            msg = stream.next() => msg,
                            _ = shutdown.changed() => {
                                info!("Risk control listener stopping");
                                return;
                            }
                        };
                        let Some(msg) = msg else {
                            warn!("Risk control subscription on {} closed", channel);
                            break;
                        };

                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(e) => {
                                warn!("Failed to read control message: {}", e);
                                continue;
                            }
                        };
                        match ControlCommand::parse(&payload) {
                            Ok(command) => apply_command(&command, &breaker, &portfolio),
                            Err(e) => warn!("Ignoring control message {:?}: {:#}", payload, e),
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to subscribe to {}: {:#}", channel, e);
                }
            }

            attempt += 1;
            let delay = backoff.calculate_delay(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }
    })
}
