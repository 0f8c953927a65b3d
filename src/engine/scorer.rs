//! Trigger logic. Both scorers are pure: the same inputs always give the
//! same decision, and "no alert" is `None`, not an error.

use chrono::{DateTime, Utc};

use super::baseline::BaselineStats;
use super::window::{WindowAggregator, WindowCounts};
use crate::config::{HeuristicConfig, ZScoreConfig};
use crate::errors::ConfigError;
use crate::models::{Alert, TriggerType};

/// Multi-window heuristic.
#[derive(Debug, Clone)]
pub struct HeuristicScorer {
    cfg: HeuristicConfig,
    /// Length of the long baseline window in minutes, used to turn its count
    /// into a per-minute rate.
    long_minutes: f64,
}

impl HeuristicScorer {
    pub fn new(cfg: HeuristicConfig, windows: &WindowAggregator) -> Result<Self, ConfigError> {
        for (role, name) in [
            ("recent", &cfg.recent_window),
            ("trend", &cfg.trend_window),
            ("baseline", &cfg.baseline_window),
        ] {
            if windows.window(name).is_none() {
                return Err(ConfigError::UnknownWindow {
                    role,
                    name: name.clone(),
                });
            }
        }
        let long = windows
            .window(&cfg.long_window)
            .ok_or_else(|| ConfigError::UnknownWindow {
                role: "long baseline",
                name: cfg.long_window.clone(),
            })?;
        let long_minutes = long.minutes();
        Ok(Self { cfg, long_minutes })
    }

    pub fn config(&self) -> &HeuristicConfig {
        &self.cfg
    }

    /// `history_len` is the size of the snapshot the counts came from.
    ///
    /// Triggers are checked in the order ratio, velocity, absolute. The
    /// velocity trigger also requires the long window to hold events older
    /// than the trend window (`long > trend`). Without that, a history
    /// younger than the trend window compares the trend count against a
    /// fraction of itself and every burst reads as velocity.
    pub fn evaluate(
        &self,
        product_id: &str,
        history_len: usize,
        counts: &WindowCounts,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        if history_len < self.cfg.min_history {
            return None;
        }

        let recent = counts.get(&self.cfg.recent_window).unwrap_or(0);
        let trend = counts.get(&self.cfg.trend_window).unwrap_or(0);
        let baseline = counts.get(&self.cfg.baseline_window).unwrap_or(0);
        let long = counts.get(&self.cfg.long_window).unwrap_or(0);

        if baseline < self.cfg.min_baseline || recent < self.cfg.min_recent {
            return None;
        }

        let denom = baseline.max(1) as f64;
        let ratio = recent as f64 / denom;
        let z_score = (recent as f64 - baseline as f64) / denom.sqrt();
        let velocity_1m = trend;
        let velocity_5m = long as f64 / self.long_minutes;

        let ratio_trigger = ratio >= self.cfg.ratio_threshold;
        // Without activity older than the trend window the long rate is just
        // the trend window divided down, and the comparison is vacuous.
        let velocity_trigger =
            long > trend && velocity_1m as f64 >= velocity_5m * self.cfg.velocity_multiplier;
        let absolute_trigger = recent >= self.cfg.absolute_floor;

        let trigger_type = if ratio_trigger {
            TriggerType::Ratio
        } else if velocity_trigger {
            TriggerType::Velocity
        } else if absolute_trigger {
            TriggerType::Absolute
        } else {
            return None;
        };

        let confidence = (z_score * 15.0 + 50.0).clamp(0.0, 100.0);

        Some(Alert {
            product_id: product_id.to_string(),
            current_count: recent,
            z_score: round_to(z_score, 2),
            mean: round_to(baseline as f64, 1),
            ratio: Some(round_to(ratio, 2)),
            velocity_1m: Some(velocity_1m),
            velocity_5m: Some(round_to(velocity_5m, 1)),
            confidence: Some(round_to(confidence, 1)),
            baseline_mean: None,
            baseline_std: None,
            trigger_type,
            detected_at: now,
        })
    }
}

/// Z-score of the live short-window count against the rolling
/// baseline.
#[derive(Debug, Clone)]
pub struct ZScoreScorer {
    cfg: ZScoreConfig,
}

impl ZScoreScorer {
    pub fn new(cfg: ZScoreConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ZScoreConfig {
        &self.cfg
    }

    /// `stats` is `None` while the baseline has too few samples.
    pub fn evaluate(
        &self,
        product_id: &str,
        current: u64,
        stats: Option<BaselineStats>,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let stats = stats?;
        if current < self.cfg.min_count {
            return None;
        }

        let curr = current as f64;
        let z = (curr - stats.mean) / (stats.stddev + self.cfg.epsilon);

        let trigger_type = if z > self.cfg.z_threshold {
            TriggerType::ZScore
        } else if stats.stddev < 1.0 && curr >= stats.mean * 3.0 {
            TriggerType::FlatBaseline
        } else {
            return None;
        };

        Some(Alert {
            product_id: product_id.to_string(),
            current_count: current,
            z_score: z,
            mean: stats.mean,
            ratio: None,
            velocity_1m: None,
            velocity_5m: None,
            confidence: None,
            baseline_mean: Some(stats.mean),
            baseline_std: Some(stats.stddev),
            trigger_type,
            detected_at: now,
        })
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
