//! Process configuration.
//!
//! Everything is read from the environment (after loading `.env`), validated
//! once, and handed to the engine by value. Invalid values are fatal: unlike
//! the notifier URLs, a typo in a threshold must not silently fall back to a
//! default.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::errors::ConfigError;

/// Which trigger strategy the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Multi-window heuristic, evaluated on every event.
    Heuristic,
    /// Rolling-baseline z-score, evaluated on the detector tick.
    ZScore,
    /// Both, merged by the dispatcher.
    Both,
}

impl StrategyKind {
    pub fn runs_heuristic(self) -> bool {
        matches!(self, StrategyKind::Heuristic | StrategyKind::Both)
    }

    pub fn runs_zscore(self) -> bool {
        matches!(self, StrategyKind::ZScore | StrategyKind::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Heuristic => "heuristic",
            StrategyKind::ZScore => "zscore",
            StrategyKind::Both => "both",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" | "multi_window" => Ok(StrategyKind::Heuristic),
            "zscore" | "z_score" => Ok(StrategyKind::ZScore),
            "both" => Ok(StrategyKind::Both),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// A named trailing window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    pub name: String,
    pub duration: Duration,
}

impl WindowConfig {
    pub fn new(name: impl Into<String>, secs: u64) -> Self {
        Self {
            name: name.into(),
            duration: Duration::from_secs(secs),
        }
    }
}

/// Heuristic thresholds. Window roles refer to entries of
/// [`DetectorConfig::windows`] by name.
#[derive(Debug, Clone)]
pub struct HeuristicConfig {
    pub recent_window: String,
    pub trend_window: String,
    pub baseline_window: String,
    pub long_window: String,
    /// Minimum number of stored events before the key is evaluated at all.
    pub min_history: usize,
    pub min_baseline: u64,
    pub min_recent: u64,
    pub ratio_threshold: f64,
    pub velocity_multiplier: f64,
    pub absolute_floor: u64,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            recent_window: "recent_30s".into(),
            trend_window: "recent_1m".into(),
            baseline_window: "baseline_2m".into(),
            long_window: "baseline_5m".into(),
            min_history: 20,
            min_baseline: 3,
            min_recent: 10,
            ratio_threshold: 2.5,
            velocity_multiplier: 3.0,
            absolute_floor: 15,
        }
    }
}

/// Z-score thresholds.
#[derive(Debug, Clone)]
pub struct ZScoreConfig {
    /// Window whose count is the live per-key counter.
    pub window: String,
    pub min_count: u64,
    pub z_threshold: f64,
    pub epsilon: f64,
}

impl Default for ZScoreConfig {
    fn default() -> Self {
        Self {
            window: "recent_1m".into(),
            min_count: 5,
            z_threshold: 3.0,
            epsilon: 1e-6,
        }
    }
}

/// Everything the detection core needs.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub strategy: StrategyKind,
    pub windows: Vec<WindowConfig>,
    /// Per-key event history cap. Must exceed the peak event count expected
    /// inside the longest window or that window undercounts.
    pub activity_cap: usize,
    pub baseline_cap: usize,
    /// Fewer baseline samples than this means "insufficient data".
    pub baseline_min_samples: usize,
    pub heuristic: HeuristicConfig,
    pub zscore: ZScoreConfig,
    pub tick: Duration,
    /// Quiet period after an accepted alert for the same product.
    pub cooldown: Duration,
    /// Minimum gap between two z-score alerts for the same product.
    pub merge_window: Duration,
    /// Keys with no events for this long are dropped by the prune job.
    pub idle_ttl: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Heuristic,
            windows: default_windows(),
            activity_cap: 100,
            baseline_cap: 60,
            baseline_min_samples: 5,
            heuristic: HeuristicConfig::default(),
            zscore: ZScoreConfig::default(),
            tick: Duration::from_secs(5),
            cooldown: Duration::from_secs(60),
            merge_window: Duration::from_secs(5),
            idle_ttl: Duration::from_secs(30 * 60),
        }
    }
}

pub fn default_windows() -> Vec<WindowConfig> {
    vec![
        WindowConfig::new("recent_30s", 30),
        WindowConfig::new("recent_1m", 60),
        WindowConfig::new("baseline_2m", 120),
        WindowConfig::new("baseline_5m", 300),
    ]
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for w in &self.windows {
            if w.duration.is_zero() {
                return Err(ConfigError::NonPositiveWindow {
                    name: w.name.clone(),
                });
            }
            if !seen.insert(w.name.as_str()) {
                return Err(ConfigError::DuplicateWindow {
                    name: w.name.clone(),
                });
            }
        }

        let mut roles = Vec::new();
        if self.strategy.runs_heuristic() {
            roles.extend([
                ("recent", &self.heuristic.recent_window),
                ("trend", &self.heuristic.trend_window),
                ("baseline", &self.heuristic.baseline_window),
                ("long baseline", &self.heuristic.long_window),
            ]);
        }
        if self.strategy.runs_zscore() {
            roles.push(("z-score", &self.zscore.window));
        }
        for (role, name) in roles {
            if !seen.contains(name.as_str()) {
                return Err(ConfigError::UnknownWindow {
                    role,
                    name: name.clone(),
                });
            }
        }

        if self.activity_cap == 0 {
            return Err(ConfigError::Zero { field: "activity_cap" });
        }
        if self.baseline_cap == 0 {
            return Err(ConfigError::Zero { field: "baseline_cap" });
        }
        if self.baseline_min_samples == 0 {
            return Err(ConfigError::Zero {
                field: "baseline_min_samples",
            });
        }
        if self.tick.is_zero() {
            return Err(ConfigError::Zero { field: "tick" });
        }

        let thresholds = [
            ("ratio_threshold", self.heuristic.ratio_threshold),
            ("velocity_multiplier", self.heuristic.velocity_multiplier),
            ("z_threshold", self.zscore.z_threshold),
            ("epsilon", self.zscore.epsilon),
        ];
        for (field, value) in thresholds {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::BadThreshold { field, value });
            }
        }
        if self.zscore.epsilon == 0.0 {
            return Err(ConfigError::Zero { field: "epsilon" });
        }

        Ok(())
    }
}

/// Upstream WebSocket sources and their reconnect policy.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub event_url: Option<String>,
    pub alert_url: Option<String>,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            event_url: None,
            alert_url: None,
            max_retries: 10,
            retry_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub slack_webhook_url: Option<String>,
    /// Generic webhook targets, notified with a signed `herd_alert` event.
    pub webhook_urls: Vec<String>,
    pub webhook_secret: Option<String>,
    /// Upper bound for one sink delivery.
    pub timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            slack_webhook_url: None,
            webhook_urls: Vec::new(),
            webhook_secret: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub detector: DetectorConfig,
    pub sources: SourceConfig,
    pub notify: NotifyConfig,
    /// Alerts kept for `/alerts/history`.
    pub history_limit: usize,
    /// Bounded hand-off between the dispatcher and the delivery task.
    pub alert_channel_capacity: usize,
    pub simulate_enabled: bool,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            detector: DetectorConfig::default(),
            sources: SourceConfig::default(),
            notify: NotifyConfig::default(),
            history_limit: 200,
            alert_channel_capacity: 1024,
            simulate_enabled: true,
            log_json: false,
        }
    }
}

pub fn load() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a [`Config`] from any key lookup. `load()` passes the process
/// environment; tests pass a map.
pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();
    let d = &defaults.detector;

    let windows = match lookup("HERD_WINDOWS") {
        Some(raw) => parse_windows(&raw)?,
        None => d.windows.clone(),
    };

    let detector = DetectorConfig {
        strategy: match lookup("HERD_STRATEGY") {
            Some(raw) => raw.parse()?,
            None => d.strategy,
        },
        windows,
        activity_cap: parse_or(&lookup, "HERD_ACTIVITY_CAP", d.activity_cap)?,
        baseline_cap: parse_or(&lookup, "HERD_BASELINE_CAP", d.baseline_cap)?,
        baseline_min_samples: parse_or(&lookup, "HERD_MIN_SAMPLES", d.baseline_min_samples)?,
        heuristic: HeuristicConfig {
            recent_window: lookup("HERD_RECENT_WINDOW").unwrap_or(d.heuristic.recent_window.clone()),
            trend_window: lookup("HERD_TREND_WINDOW").unwrap_or(d.heuristic.trend_window.clone()),
            baseline_window: lookup("HERD_BASELINE_WINDOW")
                .unwrap_or(d.heuristic.baseline_window.clone()),
            long_window: lookup("HERD_LONG_WINDOW").unwrap_or(d.heuristic.long_window.clone()),
            min_history: parse_or(&lookup, "HERD_MIN_HISTORY", d.heuristic.min_history)?,
            min_baseline: parse_or(&lookup, "HERD_MIN_BASELINE", d.heuristic.min_baseline)?,
            min_recent: parse_or(&lookup, "HERD_MIN_RECENT", d.heuristic.min_recent)?,
            ratio_threshold: parse_or(&lookup, "HERD_RATIO_THRESHOLD", d.heuristic.ratio_threshold)?,
            velocity_multiplier: parse_or(
                &lookup,
                "HERD_VELOCITY_MULTIPLIER",
                d.heuristic.velocity_multiplier,
            )?,
            absolute_floor: parse_or(&lookup, "HERD_ABSOLUTE_FLOOR", d.heuristic.absolute_floor)?,
        },
        zscore: ZScoreConfig {
            window: lookup("HERD_ZSCORE_WINDOW").unwrap_or(d.zscore.window.clone()),
            min_count: parse_or(&lookup, "HERD_MIN_COUNT", d.zscore.min_count)?,
            z_threshold: parse_or(&lookup, "HERD_Z_THRESHOLD", d.zscore.z_threshold)?,
            epsilon: d.zscore.epsilon,
        },
        tick: secs_or(&lookup, "HERD_TICK_SECS", d.tick)?,
        cooldown: secs_or(&lookup, "HERD_COOLDOWN_SECS", d.cooldown)?,
        merge_window: secs_or(&lookup, "HERD_MERGE_WINDOW_SECS", d.merge_window)?,
        idle_ttl: secs_or(&lookup, "HERD_IDLE_TTL_SECS", d.idle_ttl)?,
    };
    detector.validate()?;

    let sources = SourceConfig {
        event_url: non_empty(lookup("HERD_EVENT_SOURCE_URL")),
        alert_url: non_empty(lookup("HERD_ALERT_SOURCE_URL")),
        max_retries: parse_or(&lookup, "HERD_SOURCE_MAX_RETRIES", defaults.sources.max_retries)?,
        retry_delay: secs_or(&lookup, "HERD_SOURCE_RETRY_SECS", defaults.sources.retry_delay)?,
    };

    let notify = NotifyConfig {
        slack_webhook_url: non_empty(
            lookup("HERD_SLACK_WEBHOOK_URL").or_else(|| lookup("SLACK_WEBHOOK_URL")),
        ),
        webhook_urls: lookup("HERD_WEBHOOK_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        webhook_secret: non_empty(lookup("HERD_WEBHOOK_SECRET")),
        timeout: secs_or(&lookup, "HERD_NOTIFY_TIMEOUT_SECS", defaults.notify.timeout)?,
    };

    let alert_channel_capacity =
        parse_or(&lookup, "HERD_ALERT_CHANNEL_CAPACITY", defaults.alert_channel_capacity)?;
    if alert_channel_capacity == 0 {
        return Err(ConfigError::Zero {
            field: "alert_channel_capacity",
        });
    }

    Ok(Config {
        port: parse_or(&lookup, "HERD_PORT", defaults.port)?,
        detector,
        sources,
        notify,
        history_limit: parse_or(&lookup, "HERD_HISTORY_LIMIT", defaults.history_limit)?,
        alert_channel_capacity,
        simulate_enabled: !flag(&lookup, "HERD_DISABLE_SIMULATE"),
        log_json: flag(&lookup, "HERD_LOG_JSON"),
    })
}

/// Parse `name=secs,name=secs,...` into an ordered window list.
pub fn parse_windows(raw: &str) -> Result<Vec<WindowConfig>, ConfigError> {
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, secs) = part
            .split_once('=')
            .ok_or_else(|| ConfigError::invalid("HERD_WINDOWS", part, "expected name=seconds"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::invalid("HERD_WINDOWS", part, "empty window name"));
        }
        let secs: i64 = secs
            .trim()
            .parse()
            .map_err(|e| ConfigError::invalid("HERD_WINDOWS", part, e))?;
        if secs <= 0 {
            return Err(ConfigError::NonPositiveWindow {
                name: name.to_string(),
            });
        }
        out.push(WindowConfig::new(name, secs as u64));
    }
    if out.is_empty() {
        return Err(ConfigError::invalid("HERD_WINDOWS", raw, "no windows defined"));
    }
    Ok(out)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::invalid(key, &raw, e)),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => {
            let secs: f64 = raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(key, &raw, e))?;
            Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::invalid(key, &raw, e))
        }
        None => Ok(default),
    }
}

fn flag<F>(lookup: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    matches!(
        lookup(key).as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes")
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.detector.strategy, StrategyKind::Heuristic);
        assert_eq!(cfg.detector.windows.len(), 4);
        assert_eq!(cfg.detector.activity_cap, 100);
        assert_eq!(cfg.detector.baseline_cap, 60);
        assert_eq!(cfg.sources.max_retries, 10);
        assert!(cfg.simulate_enabled);
    }

    #[test]
    fn test_parse_windows_keeps_order() {
        let windows = parse_windows("fast=10, slow=600").unwrap();
        assert_eq!(windows[0], WindowConfig::new("fast", 10));
        assert_eq!(windows[1], WindowConfig::new("slow", 600));
    }

    #[test]
    fn test_non_positive_window_is_fatal() {
        let err = parse_windows("recent_30s=0").unwrap_err();
        assert!(matches!(err, ConfigError::NonPositiveWindow { .. }));
        let err = parse_windows("recent_30s=-5").unwrap_err();
        assert!(matches!(err, ConfigError::NonPositiveWindow { .. }));
    }

    #[test]
    fn test_window_roles_must_exist() {
        let err = from_lookup(lookup_from(&[("HERD_WINDOWS", "a=10,b=20")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownWindow { .. }));
    }

    #[test]
    fn test_only_active_strategy_roles_are_checked() {
        let zscore_only = [
            ("HERD_STRATEGY", "zscore"),
            ("HERD_WINDOWS", "tick_5s=5"),
            ("HERD_ZSCORE_WINDOW", "tick_5s"),
        ];
        let cfg = from_lookup(lookup_from(&zscore_only)).unwrap();
        assert_eq!(cfg.detector.windows.len(), 1);

        let both = [
            ("HERD_STRATEGY", "both"),
            ("HERD_WINDOWS", "tick_5s=5"),
            ("HERD_ZSCORE_WINDOW", "tick_5s"),
        ];
        let err = from_lookup(lookup_from(&both)).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownWindow { role: "recent", .. }));
    }

    #[test]
    fn test_bad_number_is_fatal() {
        let err = from_lookup(lookup_from(&[("HERD_ACTIVITY_CAP", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        let err = from_lookup(lookup_from(&[("HERD_ACTIVITY_CAP", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Zero { .. }));
    }

    #[test]
    fn test_strategy_parsing() {
        let cfg = from_lookup(lookup_from(&[("HERD_STRATEGY", "Both")])).unwrap();
        assert_eq!(cfg.detector.strategy, StrategyKind::Both);
        assert!(from_lookup(lookup_from(&[("HERD_STRATEGY", "magic")])).is_err());
    }

    #[test]
    fn test_slack_url_falls_back_to_legacy_name() {
        let cfg = from_lookup(lookup_from(&[("SLACK_WEBHOOK_URL", "https://hooks.example/x")]))
            .unwrap();
        assert_eq!(
            cfg.notify.slack_webhook_url.as_deref(),
            Some("https://hooks.example/x")
        );
    }

    #[test]
    fn test_webhook_urls_split_and_trimmed() {
        let cfg = from_lookup(lookup_from(&[("HERD_WEBHOOK_URLS", " https://a , ,https://b")]))
            .unwrap();
        assert_eq!(cfg.notify.webhook_urls, vec!["https://a", "https://b"]);
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let err = from_lookup(lookup_from(&[("HERD_Z_THRESHOLD", "-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::BadThreshold { .. }));
    }
}
