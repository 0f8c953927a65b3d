//! Event ingestion.
//!
//! Every transport (HTTP `/track`, upstream WebSocket, replay) funnels raw
//! messages through [`Ingestor`], which parses, records, runs per-event
//! detection, and hands alerts to the dispatcher. Malformed messages are
//! dropped one at a time; nothing here is fatal.

pub mod upstream;

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::engine::{AlertDispatcher, AnomalyEngine};
use crate::metrics::Metrics;
use crate::models::event::parse_timestamp;
use crate::models::{Alert, Event, TriggerType};

/// Decode one raw event message. `None` for non-JSON payloads and for
/// events without a usable product id.
pub fn parse_event(raw: &[u8]) -> Option<Event> {
    let value: serde_json::Value = match serde_json::from_slice(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Received non-json event, skipping");
            return None;
        }
    };
    let event = Event::from_value(&value);
    if event.is_none() {
        tracing::debug!("Received event without product_id, skipping");
    }
    event
}

/// Alert as produced by an upstream stream-processing job. Field names and
/// timestamp formats vary between producers, so everything but the product
/// id is optional here.
#[derive(Debug, Deserialize)]
struct UpstreamAlert {
    product_id: String,
    #[serde(default)]
    current_count: f64,
    #[serde(default)]
    z_score: f64,
    mean: Option<f64>,
    baseline_mean: Option<f64>,
    baseline_std: Option<f64>,
    ratio: Option<f64>,
    velocity_1m: Option<u64>,
    velocity_5m: Option<f64>,
    confidence: Option<f64>,
    trigger_type: Option<TriggerType>,
    detected_at: Option<String>,
}

/// Decode one pre-computed alert message into the normalized [`Alert`].
pub fn parse_upstream_alert(raw: &[u8]) -> Option<Alert> {
    let upstream: UpstreamAlert = match serde_json::from_slice(raw) {
        Ok(a) => a,
        Err(e) => {
            tracing::debug!(error = %e, "Received malformed alert, skipping");
            return None;
        }
    };
    if upstream.product_id.trim().is_empty() {
        tracing::debug!("Received alert without product_id, skipping");
        return None;
    }

    let is_heuristic = upstream.ratio.is_some() || upstream.velocity_1m.is_some();
    let trigger_type = upstream.trigger_type.unwrap_or(if is_heuristic {
        TriggerType::Absolute
    } else {
        TriggerType::ZScore
    });
    let detected_at = upstream
        .detected_at
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    Some(Alert {
        product_id: upstream.product_id,
        current_count: upstream.current_count.max(0.0).round() as u64,
        z_score: upstream.z_score,
        mean: upstream.mean.or(upstream.baseline_mean).unwrap_or(0.0),
        ratio: upstream.ratio,
        velocity_1m: upstream.velocity_1m,
        velocity_5m: upstream.velocity_5m,
        confidence: upstream.confidence,
        baseline_mean: upstream.baseline_mean,
        baseline_std: upstream.baseline_std,
        trigger_type,
        detected_at,
    })
}

pub struct Ingestor {
    engine: Arc<AnomalyEngine>,
    dispatcher: Arc<AlertDispatcher>,
    metrics: Arc<Metrics>,
}

impl Ingestor {
    pub fn new(
        engine: Arc<AnomalyEngine>,
        dispatcher: Arc<AlertDispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            engine,
            dispatcher,
            metrics,
        }
    }

    /// Parse and ingest one raw message.
    pub fn ingest_raw(&self, raw: &[u8]) -> Option<Alert> {
        match parse_event(raw) {
            Some(event) => self.ingest(&event),
            None => {
                self.metrics.event("dropped");
                None
            }
        }
    }

    /// Record the event and run per-event detection. Returns the detected
    /// alert, whether or not the dispatcher suppressed it as a repeat.
    pub fn ingest(&self, event: &Event) -> Option<Alert> {
        self.ingest_burst(&event.product_id, 1)
    }

    /// Record `n` events for one product at once (spike simulation).
    pub fn ingest_burst(&self, product_id: &str, n: usize) -> Option<Alert> {
        if product_id.trim().is_empty() {
            self.metrics.event("dropped");
            return None;
        }
        for _ in 0..n {
            self.metrics.event("recorded");
        }
        let alert = self.engine.record_burst(product_id, n)?;
        if self.dispatcher.emit(alert.clone()) {
            tracing::info!(
                product_id = %alert.product_id,
                current_count = alert.current_count,
                z_score = alert.z_score,
                trigger_type = %alert.trigger_type,
                "🚨 herd behavior detected"
            );
        }
        Some(alert)
    }

    /// Offer a pre-computed upstream alert to the dispatcher.
    pub fn ingest_alert_raw(&self, raw: &[u8]) -> bool {
        let Some(alert) = parse_upstream_alert(raw) else {
            return false;
        };
        tracing::info!(
            product_id = %alert.product_id,
            "alert received from upstream stream processor"
        );
        self.dispatcher.emit(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_drops_garbage() {
        assert!(parse_event(b"not json").is_none());
        assert!(parse_event(br#"{"event_type":"view"}"#).is_none());
        let ev = parse_event(br#"{"event_type":"view","product_id":"p1","extra":1}"#).unwrap();
        assert_eq!(ev.product_id, "p1");
    }

    #[test]
    fn test_parse_stream_processor_alert() {
        let raw = br#"{"product_id":"p1","current_count":30,"baseline_mean":5.0,
            "baseline_std":0.0,"z_score":25000000.0,"detected_at":"2025-01-27T10:30:00.123456"}"#;
        let alert = parse_upstream_alert(raw).unwrap();
        assert_eq!(alert.trigger_type, TriggerType::ZScore);
        assert_eq!(alert.current_count, 30);
        assert_eq!(alert.mean, 5.0);
        assert_eq!(alert.baseline_std, Some(0.0));
        assert_eq!(alert.detected_at.to_rfc3339(), "2025-01-27T10:30:00.123456+00:00");
    }

    #[test]
    fn test_parse_heuristic_alert_keeps_trigger() {
        let raw = br#"{"product_id":"p1","current_count":16,"z_score":1.5,"mean":12.0,
            "ratio":1.33,"velocity_1m":16,"velocity_5m":3.2,"confidence":72.5,
            "trigger_type":"velocity","detected_at":"2025-01-27T10:30:00Z"}"#;
        let alert = parse_upstream_alert(raw).unwrap();
        assert_eq!(alert.trigger_type, TriggerType::Velocity);
        assert_eq!(alert.velocity_1m, Some(16));
    }

    #[test]
    fn test_parse_upstream_alert_rejects_missing_product() {
        assert!(parse_upstream_alert(br#"{"current_count":3}"#).is_none());
        assert!(parse_upstream_alert(br#"{"product_id":" "}"#).is_none());
        assert!(parse_upstream_alert(b"\xff").is_none());
    }
}
