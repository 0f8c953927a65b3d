//! Per-product event history.
//!
//! Each key owns a ring of at most `cap` timestamps, oldest first. Producers
//! only ever append "now", so insertion order is chronological order and
//! FIFO eviction drops the oldest event.
//!
//! The cap bounds both memory and evaluation cost. It has to cover the peak
//! number of events expected inside the longest window, otherwise that
//! window undercounts once a burst pushes older entries out.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

pub struct ActivityStore {
    cap: usize,
    records: DashMap<String, VecDeque<DateTime<Utc>>>,
}

impl ActivityStore {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            records: DashMap::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Append one event timestamp for `key`.
    pub fn record(&self, key: &str, at: DateTime<Utc>) {
        self.record_many(key, at, 1);
    }

    /// Append `n` events that share one timestamp, under a single entry lock.
    pub fn record_many(&self, key: &str, at: DateTime<Utc>, n: usize) {
        if n == 0 {
            return;
        }
        // Fast path avoids allocating the key for products we already track.
        if let Some(mut ring) = self.records.get_mut(key) {
            push_bounded(&mut ring, at, n, self.cap);
            return;
        }
        let mut ring = self
            .records
            .entry(key.to_owned())
            .or_insert_with(|| VecDeque::with_capacity(self.cap.min(64)));
        push_bounded(&mut ring, at, n, self.cap);
    }

    /// Copy of the key's history, oldest first. Empty for unknown keys.
    ///
    /// The shard lock is held only for the copy; window computation runs on
    /// the returned vector.
    pub fn snapshot(&self, key: &str) -> Vec<DateTime<Utc>> {
        self.records
            .get(key)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, key: &str) -> Option<DateTime<Utc>> {
        self.records.get(key).and_then(|ring| ring.back().copied())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.records.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn remove(&self, key: &str) {
        self.records.remove(key);
    }

    /// Drop keys whose newest event is older than `cutoff`. Returns the
    /// removed keys.
    pub fn remove_idle(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut removed = Vec::new();
        self.records.retain(|key, ring| {
            let keep = ring.back().map_or(false, |last| *last >= cutoff);
            if !keep {
                removed.push(key.clone());
            }
            keep
        });
        removed
    }
}

fn push_bounded(ring: &mut VecDeque<DateTime<Utc>>, at: DateTime<Utc>, n: usize, cap: usize) {
    for _ in 0..n.min(cap) {
        ring.push_back(at);
    }
    while ring.len() > cap {
        ring.pop_front();
    }
}
