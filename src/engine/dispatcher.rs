//! Alert de-duplication and hand-off.
//!
//! The dispatcher decides whether an alert is a repeat of a spike that was
//! already reported, then pushes accepted alerts onto a bounded channel.
//! Delivery to sinks happens on the other end of that channel, so a slow
//! consumer can never stall ingestion or the detector tick.
//!
//! Suppression is measured on the dispatcher's own clock at admission time.
//! An alert's `detected_at` may come from an upstream producer and is never
//! trusted for ordering.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::Clock;
use crate::metrics::Metrics;
use crate::models::{Alert, TriggerFamily};

#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    /// Minimum gap after any accepted alert, except z-score after z-score.
    pub cooldown: chrono::Duration,
    /// Minimum gap between two z-score alerts. Those are already guarded by
    /// the live-counter reset, so this only merges near-simultaneous ones.
    pub merge_window: chrono::Duration,
}

impl DispatchPolicy {
    pub fn new(cooldown: Duration, merge_window: Duration) -> Self {
        Self {
            cooldown: chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::zero()),
            merge_window: chrono::Duration::from_std(merge_window)
                .unwrap_or(chrono::Duration::zero()),
        }
    }

    fn min_gap(&self, previous: TriggerFamily, incoming: TriggerFamily) -> chrono::Duration {
        match (previous, incoming) {
            (TriggerFamily::ZScore, TriggerFamily::ZScore) => self.merge_window,
            _ => self.cooldown,
        }
    }

    /// Longest gap any pair of alerts can be held to.
    fn horizon(&self) -> chrono::Duration {
        self.cooldown.max(self.merge_window)
    }
}

#[derive(Debug, Clone, Copy)]
struct LastAlert {
    at: DateTime<Utc>,
    family: TriggerFamily,
}

pub struct AlertDispatcher {
    policy: DispatchPolicy,
    last: DashMap<String, LastAlert>,
    tx: mpsc::Sender<Alert>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl AlertDispatcher {
    /// Build a dispatcher and the receiving end for the delivery task.
    pub fn channel(
        policy: DispatchPolicy,
        capacity: usize,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                policy,
                last: DashMap::new(),
                tx,
                clock,
                metrics,
            },
            rx,
        )
    }

    /// Record the alert if it is not a repeat. The check-and-set is atomic
    /// per product.
    pub fn admit(&self, alert: &Alert) -> bool {
        let incoming = LastAlert {
            at: self.clock.now(),
            family: alert.family(),
        };
        match self.last.entry(alert.product_id.clone()) {
            Entry::Occupied(mut e) => {
                let prev = *e.get();
                let gap = incoming.at.signed_duration_since(prev.at);
                if gap < self.policy.min_gap(prev.family, incoming.family) {
                    return false;
                }
                e.insert(incoming);
                true
            }
            Entry::Vacant(e) => {
                e.insert(incoming);
                true
            }
        }
    }

    /// Hand an alert to the delivery task. Returns `true` when it was
    /// accepted and queued; never blocks.
    pub fn emit(&self, alert: Alert) -> bool {
        let trigger = alert.trigger_type.as_str();
        if !self.admit(&alert) {
            tracing::debug!(
                product_id = %alert.product_id,
                trigger_type = trigger,
                "suppressed repeat alert"
            );
            self.metrics.alert(trigger, "suppressed");
            return false;
        }

        match self.tx.try_send(alert) {
            Ok(()) => {
                self.metrics.alert(trigger, "emitted");
                true
            }
            Err(TrySendError::Full(alert)) => {
                tracing::warn!(
                    product_id = %alert.product_id,
                    trigger_type = trigger,
                    "alert channel full, dropping alert"
                );
                self.metrics.alert(trigger, "dropped");
                false
            }
            Err(TrySendError::Closed(alert)) => {
                tracing::warn!(
                    product_id = %alert.product_id,
                    "alert channel closed, dropping alert"
                );
                self.metrics.alert(trigger, "dropped");
                false
            }
        }
    }

    /// Forget suppression state for a key the engine no longer tracks.
    pub fn forget(&self, key: &str) {
        self.last.remove(key);
    }

    /// Drop suppression entries that can no longer suppress anything. This
    /// covers products only ever seen through the upstream alert stream,
    /// which the engine never tracks. Returns the number removed.
    pub fn expire(&self) -> usize {
        let cutoff = self.clock.now() - self.policy.horizon();
        let before = self.last.len();
        self.last.retain(|_, last| last.at >= cutoff);
        before.saturating_sub(self.last.len())
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    pub fn last_alert_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.last.get(key).map(|l| l.at)
    }
}
