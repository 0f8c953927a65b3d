//! Background job: drop products that have gone quiet.
//!
//! Runs every minute. A product whose newest event is older than the idle
//! TTL is removed from the activity store and the baseline tracker.
//! Dispatcher suppression entries are dropped for those products and for
//! any product whose last alert is older than the cooldown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::engine::{AlertDispatcher, AnomalyEngine};
use crate::metrics::Metrics;

pub const PRUNE_PERIOD: Duration = Duration::from_secs(60);

/// Spawn the prune task. Call this once at startup.
pub fn spawn(
    engine: Arc<AnomalyEngine>,
    dispatcher: Arc<AlertDispatcher>,
    metrics: Arc<Metrics>,
    idle_ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(PRUNE_PERIOD);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    run_prune(&engine, &dispatcher, &metrics, idle_ttl);
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("prune job stopped");
    })
}

/// Returns the number of products removed.
pub fn run_prune(
    engine: &AnomalyEngine,
    dispatcher: &AlertDispatcher,
    metrics: &Metrics,
    idle_ttl: Duration,
) -> usize {
    let removed = engine.prune_idle(idle_ttl);
    for key in &removed {
        dispatcher.forget(key);
    }
    let expired = dispatcher.expire();
    metrics.set_tracked_products(engine.tracked());
    if !removed.is_empty() || expired > 0 {
        tracing::info!(
            removed = removed.len(),
            expired_suppressions = expired,
            tracked = engine.tracked(),
            "pruned idle products"
        );
    }
    removed.len()
}
