//! WebSocket fan-out and recent-alert history.
//!
//! The hub is the broadcaster sink: every delivered alert is serialized once
//! and pushed to all connected `/ws` clients through a
//! `tokio::sync::broadcast` channel. Slow clients lag and skip messages
//! instead of holding anything up.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::models::Alert;
use crate::notification::AlertSink;

pub struct AlertHub {
    tx: broadcast::Sender<String>,
    history: Mutex<VecDeque<Alert>>,
    history_cap: usize,
}

impl AlertHub {
    pub fn new(buffer: usize, history_cap: usize) -> Self {
        let (tx, _rx) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_cap.min(1024))),
            history_cap,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Push a raw payload to every subscriber. Returns how many received it.
    pub fn broadcast_raw(&self, payload: String) -> usize {
        // Err only means nobody is listening.
        self.tx.send(payload).unwrap_or(0)
    }

    /// Store the alert in history and broadcast it.
    pub fn publish(&self, alert: &Alert) -> usize {
        if self.history_cap > 0 {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push_back(alert.clone());
            while history.len() > self.history_cap {
                history.pop_front();
            }
        }
        self.broadcast_raw(alert.to_json())
    }

    /// Most recent alerts, newest first.
    pub fn history(&self, limit: usize) -> Vec<Alert> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.iter().rev().take(limit).cloned().collect()
    }
}

#[async_trait]
impl AlertSink for AlertHub {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        let receivers = self.publish(alert);
        tracing::debug!(
            product_id = %alert.product_id,
            receivers,
            "broadcast alert to websocket clients"
        );
        Ok(())
    }
}
