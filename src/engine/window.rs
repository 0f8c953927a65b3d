//! Trailing-window counts over an activity snapshot.

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::WindowConfig;
use crate::errors::ConfigError;

/// One named trailing window. A timestamp `t` falls inside it when
/// `now - t <= span`; timestamps ahead of `now` count as age zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    name: String,
    span: chrono::Duration,
}

impl WindowSpec {
    pub fn new(name: impl Into<String>, duration: std::time::Duration) -> Result<Self, ConfigError> {
        let name = name.into();
        if duration.is_zero() {
            return Err(ConfigError::NonPositiveWindow { name });
        }
        let span = chrono::Duration::from_std(duration)
            .map_err(|e| ConfigError::invalid("window", &name, e))?;
        Ok(Self { name, span })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> chrono::Duration {
        self.span
    }

    pub fn minutes(&self) -> f64 {
        self.span.num_milliseconds() as f64 / 60_000.0
    }

    #[inline]
    pub fn contains(&self, now: DateTime<Utc>, t: DateTime<Utc>) -> bool {
        now.signed_duration_since(t) <= self.span
    }

    pub fn count(&self, snapshot: &[DateTime<Utc>], now: DateTime<Utc>) -> u64 {
        self.count_since(snapshot, now, None)
    }

    /// Like [`count`](Self::count) but ignores entries at or before `floor`.
    pub fn count_since(
        &self,
        snapshot: &[DateTime<Utc>],
        now: DateTime<Utc>,
        floor: Option<DateTime<Utc>>,
    ) -> u64 {
        snapshot
            .iter()
            .filter(|t| self.contains(now, **t))
            .filter(|t| floor.map_or(true, |f| **t > f))
            .count() as u64
    }
}

/// Counts per window, in configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowCounts(Vec<(String, u64)>);

impl WindowCounts {
    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, c)| *c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(n, c)| (n.as_str(), *c))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, u64)> for WindowCounts {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for WindowCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, count) in &self.0 {
            map.serialize_entry(name, count)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone)]
pub struct WindowAggregator {
    windows: Vec<WindowSpec>,
}

impl WindowAggregator {
    pub fn new(windows: Vec<WindowSpec>) -> Self {
        Self { windows }
    }

    pub fn from_config(windows: &[WindowConfig]) -> Result<Self, ConfigError> {
        windows
            .iter()
            .map(|w| WindowSpec::new(w.name.clone(), w.duration))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    pub fn window(&self, name: &str) -> Option<&WindowSpec> {
        self.windows.iter().find(|w| w.name == name)
    }

    pub fn windows(&self) -> &[WindowSpec] {
        &self.windows
    }

    /// Single linear pass per window; snapshots are bounded by the activity
    /// cap so no index is needed.
    pub fn counts(&self, snapshot: &[DateTime<Utc>], now: DateTime<Utc>) -> WindowCounts {
        self.windows
            .iter()
            .map(|w| (w.name.clone(), w.count(snapshot, now)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_windows;
    use chrono::Duration;

    fn aggregator() -> WindowAggregator {
        WindowAggregator::from_config(&default_windows()).unwrap()
    }

    #[test]
    fn test_default_window_counts() {
        let now = Utc::now();
        // ages: 10s, 45s, 90s, 200s, 400s
        let snapshot: Vec<_> = [400, 200, 90, 45, 10]
            .iter()
            .map(|s| now - Duration::seconds(*s))
            .collect();
        let counts = aggregator().counts(&snapshot, now);
        assert_eq!(counts.get("recent_30s"), Some(1));
        assert_eq!(counts.get("recent_1m"), Some(2));
        assert_eq!(counts.get("baseline_2m"), Some(3));
        assert_eq!(counts.get("baseline_5m"), Some(4));
        assert_eq!(counts.get("missing"), None);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let now = Utc::now();
        let snapshot = vec![now - Duration::seconds(30)];
        let counts = aggregator().counts(&snapshot, now);
        assert_eq!(counts.get("recent_30s"), Some(1));
    }

    #[test]
    fn test_future_timestamps_count_as_now() {
        let now = Utc::now();
        let snapshot = vec![now + Duration::seconds(3)];
        assert_eq!(aggregator().counts(&snapshot, now).get("recent_30s"), Some(1));
    }

    #[test]
    fn test_count_since_excludes_floor() {
        let now = Utc::now();
        let w = WindowSpec::new("w", std::time::Duration::from_secs(60)).unwrap();
        let snapshot = vec![now - Duration::seconds(20), now - Duration::seconds(10), now];
        assert_eq!(w.count_since(&snapshot, now, Some(now - Duration::seconds(10))), 1);
        assert_eq!(w.count_since(&snapshot, now, None), 3);
    }

    #[test]
    fn test_counts_serialize_in_order() {
        let counts = aggregator().counts(&[], Utc::now());
        let json = serde_json::to_string(&counts).unwrap();
        assert_eq!(
            json,
            r#"{"recent_30s":0,"recent_1m":0,"baseline_2m":0,"baseline_5m":0}"#
        );
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(WindowSpec::new("zero", std::time::Duration::ZERO).is_err());
        assert_eq!(
            WindowSpec::new("five", std::time::Duration::from_secs(300))
                .unwrap()
                .minutes(),
            5.0
        );
    }
}
