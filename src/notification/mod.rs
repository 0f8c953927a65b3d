//! Alert sinks: everything an accepted alert is delivered to.

pub mod slack;
pub mod webhook;

use async_trait::async_trait;

use crate::models::Alert;

/// A downstream consumer of accepted alerts.
///
/// Failures are reported to the delivery task, which logs them; they never
/// reach the detection core.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()>;
}
