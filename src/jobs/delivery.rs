//! Background job: fan accepted alerts out to every sink.
//!
//! Sinks run concurrently per alert and each call is bounded by a timeout,
//! so one slow webhook cannot hold back the WebSocket broadcast. Failures
//! are logged and counted, never retried here (sinks retry internally if
//! they want to). The task ends once every dispatcher handle is dropped and
//! the channel is drained.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::metrics::Metrics;
use crate::models::Alert;
use crate::notification::AlertSink;

pub fn spawn(
    mut rx: mpsc::Receiver<Alert>,
    sinks: Vec<Arc<dyn AlertSink>>,
    timeout: Duration,
    metrics: Arc<Metrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(alert) = rx.recv().await {
            deliver_one(&alert, &sinks, timeout, &metrics).await;
        }
        tracing::debug!("alert channel closed, delivery job stopped");
    })
}

/// Deliver one alert to all sinks. Returns how many sinks succeeded.
pub async fn deliver_one(
    alert: &Alert,
    sinks: &[Arc<dyn AlertSink>],
    timeout: Duration,
    metrics: &Metrics,
) -> usize {
    let calls = sinks.iter().map(|sink| async move {
        let outcome = tokio::time::timeout(timeout, sink.deliver(alert)).await;
        (sink.name(), outcome)
    });

    let mut delivered = 0;
    for (name, outcome) in join_all(calls).await {
        match outcome {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(e)) => {
                tracing::warn!(
                    sink = name,
                    product_id = %alert.product_id,
                    error = %e,
                    "alert delivery failed"
                );
                metrics.sink_failure(name);
            }
            Err(_) => {
                tracing::warn!(
                    sink = name,
                    product_id = %alert.product_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "alert delivery timed out"
                );
                metrics.sink_failure(name);
            }
        }
    }
    delivered
}
