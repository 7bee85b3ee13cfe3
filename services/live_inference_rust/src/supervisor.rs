//! Restarts a failing task with exponential backoff.

use anyhow::{anyhow, Result};
use live_edge_core::backoff::BackoffConfig;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// A run that stays up this long clears the failure count.
const HEALTHY_RUN: Duration = Duration::from_secs(300);

/// Run `task` until it returns `Ok` or shutdown is signalled.
///
/// Each failure is followed by a backoff delay. More than `max_restarts`
/// consecutive failures is fatal and returned to the caller.
pub async fn supervise<F, Fut>(
    name: &str,
    max_restarts: u32,
    backoff: BackoffConfig,
    mut shutdown: watch::Receiver<bool>,
    mut task: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut failures: u32 = 0;

    loop {
        let started = Instant::now();
        let err = match task().await {
            Ok(()) => {
                info!("{} finished", name);
                return Ok(());
            }
            Err(e) => e,
        };

        if started.elapsed() >= HEALTHY_RUN {
            failures = 0;
        }
        failures += 1;

        if failures > max_restarts {
            error!(
                "CRITICAL: {} failed {} times in a row, giving up: {:#}",
                name, failures, err
            );
            return Err(anyhow!("{} exceeded {} restarts: {:#}", name, max_restarts, err));
        }

        let delay = backoff.calculate_delay(failures);
        warn!(
            "{} crashed (failure {}/{}): {:#}. Restarting in {:?}",
            name, failures, max_restarts, err, delay
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Shutdown during {} restart backoff", name);
                    return Ok(());
                }
            }
        }
        if *shutdown.borrow() {
            return Ok(());
        }
    }
}
