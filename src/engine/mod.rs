//! Herd-behavior detection core.
//!
//! [`AnomalyEngine`] owns the keyed state (activity, baselines, live-counter
//! resets) and runs whichever strategies the configuration selects:
//!
//! - **Heuristic** on every recorded event, from window counts.
//! - **Z-score** on the detector tick, from the rolling
//!   baseline of short-window counts.
//!
//! Both read copies of the activity record, so evaluation never holds a
//! store lock and never does I/O. Emission goes through
//! [`dispatcher::AlertDispatcher`].

pub mod activity;
pub mod baseline;
pub mod clock;
pub mod dispatcher;
pub mod scorer;
pub mod window;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::{DetectorConfig, StrategyKind};
use crate::errors::ConfigError;
use crate::models::Alert;

pub use activity::ActivityStore;
pub use baseline::{BaselineStats, BaselineTracker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{AlertDispatcher, DispatchPolicy};
pub use scorer::{HeuristicScorer, ZScoreScorer};
pub use window::{WindowAggregator, WindowCounts, WindowSpec};

/// Diagnostic view of one product.
#[derive(Debug, Clone, Serialize)]
pub struct ProductReport {
    pub product_id: String,
    pub events_held: usize,
    pub last_event_at: Option<DateTime<Utc>>,
    pub windows: WindowCounts,
    /// Z-score live counter (events since the last reset).
    pub live_count: u64,
    pub baseline: Option<BaselineStats>,
    pub baseline_samples: Vec<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

pub struct AnomalyEngine {
    strategy: StrategyKind,
    clock: Arc<dyn Clock>,
    activity: ActivityStore,
    windows: WindowAggregator,
    baselines: BaselineTracker,
    /// Z-score live-counter reset markers.
    resets: DashMap<String, DateTime<Utc>>,
    /// Present only when the strategy runs the heuristic.
    heuristic: Option<HeuristicScorer>,
    zscore: ZScoreScorer,
    /// Present only when the strategy runs the z-score detector.
    zscore_window: Option<WindowSpec>,
}

impl AnomalyEngine {
    pub fn new(config: &DetectorConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let windows = WindowAggregator::from_config(&config.windows)?;
        let heuristic = if config.strategy.runs_heuristic() {
            Some(HeuristicScorer::new(config.heuristic.clone(), &windows)?)
        } else {
            None
        };
        let zscore_window = if config.strategy.runs_zscore() {
            let window = windows
                .window(&config.zscore.window)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownWindow {
                    role: "z-score",
                    name: config.zscore.window.clone(),
                })?;
            Some(window)
        } else {
            None
        };

        Ok(Self {
            strategy: config.strategy,
            clock,
            activity: ActivityStore::new(config.activity_cap),
            windows,
            baselines: BaselineTracker::new(config.baseline_cap, config.baseline_min_samples),
            resets: DashMap::new(),
            heuristic,
            zscore: ZScoreScorer::new(config.zscore.clone()),
            zscore_window,
        })
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn activity(&self) -> &ActivityStore {
        &self.activity
    }

    pub fn baselines(&self) -> &BaselineTracker {
        &self.baselines
    }

    pub fn windows(&self) -> &WindowAggregator {
        &self.windows
    }

    /// Number of products currently held in memory.
    pub fn tracked(&self) -> usize {
        self.activity.len()
    }

    /// Record one event at the current instant and, when the heuristic runs,
    /// evaluate the key.
    pub fn record(&self, product_id: &str) -> Option<Alert> {
        self.record_burst(product_id, 1)
    }

    /// Record `n` events at the current instant, then evaluate once.
    pub fn record_burst(&self, product_id: &str, n: usize) -> Option<Alert> {
        let now = self.clock.now();
        self.activity.record_many(product_id, now, n);
        if self.strategy.runs_heuristic() {
            self.evaluate_heuristic(product_id, now)
        } else {
            None
        }
    }

    /// Record an event with an explicit timestamp, without evaluating.
    pub fn record_at(&self, product_id: &str, at: DateTime<Utc>) {
        self.activity.record(product_id, at);
    }

    pub fn counts(&self, product_id: &str) -> WindowCounts {
        let snapshot = self.activity.snapshot(product_id);
        self.windows.counts(&snapshot, self.clock.now())
    }

    /// Pure evaluation of one key against current state. Repeated calls
    /// without new events or clock movement return the same result.
    pub fn evaluate(&self, product_id: &str) -> Option<Alert> {
        let now = self.clock.now();
        if self.strategy.runs_heuristic() {
            if let Some(alert) = self.evaluate_heuristic(product_id, now) {
                return Some(alert);
            }
        }
        if self.strategy.runs_zscore() {
            return self.peek_zscore(product_id, now);
        }
        None
    }

    /// Heuristic evaluation over an explicit snapshot. `None` when the
    /// heuristic is not configured.
    pub fn evaluate_snapshot(
        &self,
        product_id: &str,
        snapshot: &[DateTime<Utc>],
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let heuristic = self.heuristic.as_ref()?;
        let counts = self.windows.counts(snapshot, now);
        heuristic.evaluate(product_id, snapshot.len(), &counts, now)
    }

    fn evaluate_heuristic(&self, product_id: &str, now: DateTime<Utc>) -> Option<Alert> {
        let snapshot = self.activity.snapshot(product_id);
        self.evaluate_snapshot(product_id, &snapshot, now)
    }

    /// Z-score live counter: events in the z-score window newer than the
    /// key's last reset. Always zero when the z-score detector is off.
    pub fn live_count(&self, product_id: &str, now: DateTime<Utc>) -> u64 {
        let Some(window) = &self.zscore_window else {
            return 0;
        };
        let snapshot = self.activity.snapshot(product_id);
        let floor = self.resets.get(product_id).map(|r| *r);
        window.count_since(&snapshot, now, floor)
    }

    /// Z-score evaluation without touching the baseline: the whole current history
    /// acts as the reference.
    fn peek_zscore(&self, product_id: &str, now: DateTime<Utc>) -> Option<Alert> {
        let current = self.live_count(product_id, now);
        let history = self.baselines.history(product_id);
        let stats = self.baselines.stats(&history);
        self.zscore.evaluate(product_id, current, stats, now)
    }

    /// One z-score detection cycle over every tracked key.
    ///
    /// Appends one baseline sample per key. A key that triggers has its live
    /// counter reset, so the same elevated window cannot re-trigger on the
    /// next tick.
    pub fn tick(&self) -> Vec<Alert> {
        if !self.strategy.runs_zscore() {
            return Vec::new();
        }
        let now = self.clock.now();
        let mut keys = self.activity.keys();
        keys.sort_unstable();

        let mut alerts = Vec::new();
        for key in keys {
            let current = self.live_count(&key, now);
            let history = self.baselines.update(&key, current);
            let stats = self.baselines.stats(&history);
            if let Some(alert) = self.zscore.evaluate(&key, current, stats, now) {
                self.resets.insert(key, now);
                alerts.push(alert);
            }
        }
        alerts
    }

    /// Query interface: re-evaluate every tracked key without mutating state.
    pub fn scan(&self) -> Vec<Alert> {
        let mut keys = self.activity.keys();
        keys.sort_unstable();
        keys.iter().filter_map(|k| self.evaluate(k)).collect()
    }

    pub fn report(&self, product_id: &str) -> Option<ProductReport> {
        if !self.activity.contains(product_id) {
            return None;
        }
        let now = self.clock.now();
        let snapshot = self.activity.snapshot(product_id);
        let baseline_samples = self.baselines.history(product_id);
        Some(ProductReport {
            product_id: product_id.to_string(),
            events_held: snapshot.len(),
            last_event_at: snapshot.last().copied(),
            windows: self.windows.counts(&snapshot, now),
            live_count: self.live_count(product_id, now),
            baseline: self.baselines.stats(&baseline_samples),
            baseline_samples,
            reset_at: self.resets.get(product_id).map(|r| *r),
        })
    }

    /// Drop every key whose newest event is older than `idle_ttl`.
    pub fn prune_idle(&self, idle_ttl: Duration) -> Vec<String> {
        let Ok(ttl) = chrono::Duration::from_std(idle_ttl) else {
            return Vec::new();
        };
        let cutoff = self.clock.now() - ttl;
        let removed = self.activity.remove_idle(cutoff);
        for key in &removed {
            self.baselines.remove(key);
            self.resets.remove(key);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{WindowConfig, ZScoreConfig};
    use crate::models::TriggerType;
    use chrono::Duration as ChronoDuration;

    fn engine_with(config: DetectorConfig) -> (AnomalyEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = AnomalyEngine::new(&config, clock.clone()).unwrap();
        (engine, clock)
    }

    #[test]
    fn test_sparse_keys_never_alert() {
        let (engine, _clock) = engine_with(DetectorConfig {
            strategy: StrategyKind::Both,
            ..DetectorConfig::default()
        });
        for _ in 0..19 {
            assert!(engine.record("sparse").is_none());
        }
        assert!(engine.evaluate("sparse").is_none());
        assert!(engine.tick().is_empty());
        assert!(engine.scan().is_empty());
    }

    #[test]
    fn test_absolute_trigger_on_synthetic_burst() {
        let (engine, clock) = engine_with(DetectorConfig::default());
        let now = clock.now();
        for i in (0..20).rev() {
            engine.record_at("sku", now - ChronoDuration::seconds(i));
        }
        let alert = engine.record_burst("sku", 15).unwrap();
        assert_eq!(alert.trigger_type, TriggerType::Absolute);
        assert_eq!(alert.current_count, 35);
        assert_eq!(alert.product_id, "sku");
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let (engine, clock) = engine_with(DetectorConfig::default());
        let now = clock.now();
        for i in (0..20).rev() {
            engine.record_at("sku", now - ChronoDuration::seconds(i));
        }
        engine.activity().record_many("sku", now, 15);
        let first = engine.evaluate("sku");
        assert!(first.is_some());
        assert_eq!(first, engine.evaluate("sku"));
        assert_eq!(engine.scan(), vec![first.unwrap()]);
    }

    fn zscore_config() -> DetectorConfig {
        DetectorConfig {
            strategy: StrategyKind::ZScore,
            windows: vec![WindowConfig::new("tick_5s", 5)],
            zscore: ZScoreConfig {
                window: "tick_5s".into(),
                ..ZScoreConfig::default()
            },
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn test_zscore_triggers_and_resets_live_counter() {
        let (engine, clock) = engine_with(zscore_config());
        for _ in 0..10 {
            engine.activity().record_many("sku", clock.now(), 5);
            assert!(engine.tick().is_empty());
            clock.advance(std::time::Duration::from_secs(6));
        }

        engine.activity().record_many("sku", clock.now(), 30);
        let alerts = engine.tick();
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.current_count, 30);
        assert!(alert.z_score > 3.0);
        assert_eq!(alert.baseline_mean, Some(5.0));

        // the spike is still inside the window, but the counter was reset
        assert_eq!(engine.live_count("sku", clock.now()), 0);
        clock.advance(std::time::Duration::from_secs(1));
        assert_eq!(engine.live_count("sku", clock.now()), 0);
        assert!(engine.tick().is_empty());
        assert_eq!(engine.baselines().history("sku").last(), Some(&0));
    }

    #[test]
    fn test_heuristic_only_engine_does_not_tick() {
        let (engine, clock) = engine_with(DetectorConfig::default());
        engine.activity().record_many("sku", clock.now(), 50);
        assert!(engine.tick().is_empty());
        assert!(engine.baselines().is_empty());
    }

    #[test]
    fn test_report_and_prune() {
        let (engine, clock) = engine_with(DetectorConfig::default());
        engine.record("sku");
        let report = engine.report("sku").unwrap();
        assert_eq!(report.events_held, 1);
        assert_eq!(report.windows.get("recent_30s"), Some(1));
        assert!(engine.report("other").is_none());

        clock.advance(std::time::Duration::from_secs(31 * 60));
        let removed = engine.prune_idle(std::time::Duration::from_secs(30 * 60));
        assert_eq!(removed, vec!["sku".to_string()]);
        assert_eq!(engine.tracked(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DetectorConfig {
            windows: vec![WindowConfig::new("recent_30s", 0)],
            ..DetectorConfig::default()
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        assert!(AnomalyEngine::new(&config, clock).is_err());
    }
}
