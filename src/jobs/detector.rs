//! Background job: periodic z-score detection.
//!
//! Every tick samples each product's live counter into its baseline, scores
//! it, and emits whatever triggers. A no-op when the configured strategy
//! does not include the z-score detector.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::engine::{AlertDispatcher, AnomalyEngine};

/// Spawn the detector task. It exits when `shutdown` flips to `true`.
pub fn spawn(
    engine: Arc<AnomalyEngine>,
    dispatcher: Arc<AlertDispatcher>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so the first sample
        // covers a full period.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    run_tick(&engine, &dispatcher);
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("detector job stopped");
    })
}

/// One detection cycle. Returns how many alerts were accepted for delivery.
pub fn run_tick(engine: &AnomalyEngine, dispatcher: &AlertDispatcher) -> usize {
    let alerts = engine.tick();
    let mut emitted = 0;
    for alert in alerts {
        let product_id = alert.product_id.clone();
        let current_count = alert.current_count;
        let z_score = alert.z_score;
        let trigger_type = alert.trigger_type;
        if dispatcher.emit(alert) {
            emitted += 1;
            tracing::info!(
                product_id = %product_id,
                current_count,
                z_score,
                trigger_type = %trigger_type,
                "🚨 herd behavior detected"
            );
        }
    }
    emitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorConfig, StrategyKind, WindowConfig};
    use crate::engine::{DispatchPolicy, ManualClock};
    use crate::metrics::Metrics;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_run_tick_emits_zscore_alert_once() {
        let mut cfg = DetectorConfig {
            strategy: StrategyKind::ZScore,
            windows: vec![WindowConfig::new("tick_5s", 5)],
            ..Default::default()
        };
        cfg.zscore.window = "tick_5s".into();

        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        let engine = AnomalyEngine::new(&cfg, clock.clone()).unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let (dispatcher, mut rx) = AlertDispatcher::channel(
            DispatchPolicy::new(cfg.cooldown, cfg.merge_window),
            16,
            clock.clone(),
            metrics,
        );

        for _ in 0..10 {
            clock.advance(Duration::from_secs(6));
            engine.record_burst("p1", 5);
            assert_eq!(run_tick(&engine, &dispatcher), 0);
        }
        clock.advance(Duration::from_secs(6));
        engine.record_burst("p1", 30);
        assert_eq!(run_tick(&engine, &dispatcher), 1);

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.product_id, "p1");
        assert_eq!(alert.current_count, 30);

        clock.advance(Duration::from_secs(6));
        assert_eq!(run_tick(&engine, &dispatcher), 0);
        assert!(rx.try_recv().is_err());
    }
}
