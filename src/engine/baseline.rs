//! Rolling baseline of short-window counts, one sample per detection tick.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BaselineStats {
    pub mean: f64,
    /// Population standard deviation (divides by N).
    pub stddev: f64,
    pub samples: usize,
}

pub struct BaselineTracker {
    cap: usize,
    min_samples: usize,
    samples: DashMap<String, VecDeque<u64>>,
}

impl BaselineTracker {
    pub fn new(cap: usize, min_samples: usize) -> Self {
        Self {
            cap: cap.max(1),
            min_samples: min_samples.max(1),
            samples: DashMap::new(),
        }
    }

    /// Append `current` to the key's history and return the samples that
    /// preceded it. The returned history never includes `current`.
    pub fn update(&self, key: &str, current: u64) -> Vec<u64> {
        let mut ring = self
            .samples
            .entry(key.to_owned())
            .or_insert_with(|| VecDeque::with_capacity(self.cap));
        let prior: Vec<u64> = ring.iter().copied().collect();
        ring.push_back(current);
        while ring.len() > self.cap {
            ring.pop_front();
        }
        prior
    }

    /// Read-only copy of the key's history.
    pub fn history(&self, key: &str) -> Vec<u64> {
        self.samples
            .get(key)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    /// `None` means insufficient data, never a degenerate zero-variance stat.
    pub fn stats(&self, history: &[u64]) -> Option<BaselineStats> {
        if history.len() < self.min_samples {
            return None;
        }
        let (mean, stddev) = mean_stddev(history);
        Some(BaselineStats {
            mean,
            stddev,
            samples: history.len(),
        })
    }

    pub fn remove(&self, key: &str) {
        self.samples.remove(key);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Mean and population standard deviation.
pub fn mean_stddev(values: &[u64]) -> (f64, f64) {
    let n = values.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }

    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;

    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_stddev_constant() {
        let (mean, stddev) = mean_stddev(&[10, 10, 10, 10, 10]);
        assert!((mean - 10.0).abs() < f64::EPSILON);
        assert!(stddev.abs() < f64::EPSILON);
    }

    #[test]
    fn test_mean_stddev_is_population() {
        // population variance of [2,4,4,4,5,5,7,9] is exactly 4
        let (mean, stddev) = mean_stddev(&[2, 4, 4, 4, 5, 5, 7, 9]);
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((stddev - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean_stddev_empty() {
        assert_eq!(mean_stddev(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_update_returns_prior_history() {
        let tracker = BaselineTracker::new(60, 5);
        assert!(tracker.update("a", 3).is_empty());
        assert_eq!(tracker.update("a", 4), vec![3]);
        assert_eq!(tracker.update("a", 5), vec![3, 4]);
        assert_eq!(tracker.history("a"), vec![3, 4, 5]);
    }

    #[test]
    fn test_update_evicts_oldest() {
        let tracker = BaselineTracker::new(3, 1);
        for v in 1..=5 {
            tracker.update("a", v);
        }
        assert_eq!(tracker.history("a"), vec![3, 4, 5]);
    }

    #[test]
    fn test_stats_requires_min_samples() {
        let tracker = BaselineTracker::new(60, 5);
        assert!(tracker.stats(&[1, 2, 3, 4]).is_none());
        let stats = tracker.stats(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(stats.samples, 5);
        assert!((stats.mean - 3.0).abs() < 1e-12);
    }
}
