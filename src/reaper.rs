//! Periodic physical removal of soft-deleted records

use crate::storage::UrlStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default reap period: ten minutes
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(600);

/// Call `reap` every `period` until `cancel` fires.
///
/// The first pass happens one full period after start. A failed pass is
/// logged and the loop keeps going. A zero period falls back to
/// [`DEFAULT_REAP_INTERVAL`].
pub async fn run_reaper(store: Arc<dyn UrlStore>, period: Duration, cancel: CancellationToken) {
    let period = if period.is_zero() {
        warn!(default_secs = DEFAULT_REAP_INTERVAL.as_secs(), "Zero reap period, using default");
        DEFAULT_REAP_INTERVAL
    } else {
        period
    };

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(backend = store.name(), period_secs = period.as_secs(), "Reaper started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match store.reap().await {
            Ok(0) => debug!("Nothing to reap"),
            Ok(removed) => info!(removed, "Reaped deleted urls"),
            Err(e) => error!(error = %e, "failed to drop deleted URLs"),
        }
    }

    info!("Reaper stopped");
}

/// Run [`run_reaper`] on its own task.
pub fn spawn_reaper(
    store: Arc<dyn UrlStore>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_reaper(store, period, cancel))
}
