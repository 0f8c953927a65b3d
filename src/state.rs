use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::engine::{AlertDispatcher, AnomalyEngine, Clock, DispatchPolicy};
use crate::hub::AlertHub;
use crate::ingest::Ingestor;
use crate::metrics::Metrics;
use crate::models::Alert;
use crate::notification::slack::SlackNotifier;
use crate::notification::webhook::WebhookNotifier;
use crate::notification::AlertSink;

/// WebSocket broadcast buffer per subscriber.
const HUB_BUFFER: usize = 256;

/// Shared application state passed to handlers and background jobs.
pub struct AppState {
    pub config: Config,
    pub engine: Arc<AnomalyEngine>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub ingestor: Arc<Ingestor>,
    pub hub: Arc<AlertHub>,
    pub notifier: Arc<SlackNotifier>,
    pub webhook: Arc<WebhookNotifier>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire the engine, dispatcher and sinks together. The returned receiver
    /// belongs to the delivery job.
    pub fn build(
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<(Arc<Self>, mpsc::Receiver<Alert>)> {
        let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
        let engine = Arc::new(AnomalyEngine::new(&config.detector, clock.clone())?);
        let (dispatcher, rx) = AlertDispatcher::channel(
            DispatchPolicy::new(config.detector.cooldown, config.detector.merge_window),
            config.alert_channel_capacity,
            clock,
            metrics.clone(),
        );
        let dispatcher = Arc::new(dispatcher);
        let ingestor = Arc::new(Ingestor::new(
            engine.clone(),
            dispatcher.clone(),
            metrics.clone(),
        ));
        let hub = Arc::new(AlertHub::new(HUB_BUFFER, config.history_limit));
        let notifier = Arc::new(SlackNotifier::with_timeout(
            config.notify.slack_webhook_url.clone(),
            config.notify.timeout,
        ));
        let webhook = Arc::new(WebhookNotifier::new(
            config.notify.webhook_urls.clone(),
            config.notify.webhook_secret.clone(),
        ));

        let state = Arc::new(Self {
            config,
            engine,
            dispatcher,
            ingestor,
            hub,
            notifier,
            webhook,
            metrics,
        });
        Ok((state, rx))
    }

    /// Every sink the delivery job fans out to. The hub is always present;
    /// Slack and webhooks only when configured.
    pub fn sinks(&self) -> Vec<Arc<dyn AlertSink>> {
        let mut sinks: Vec<Arc<dyn AlertSink>> = vec![self.hub.clone()];
        if self.notifier.is_configured() {
            sinks.push(self.notifier.clone());
        }
        if !self.webhook.urls().is_empty() {
            sinks.push(self.webhook.clone());
        }
        sinks
    }

    /// Names of the configured upstream sources, for the status endpoint.
    pub fn source_names(&self) -> Vec<&'static str> {
        let mut names = vec!["http"];
        if self.config.sources.event_url.is_some() {
            names.push("events");
        }
        if self.config.sources.alert_url.is_some() {
            names.push("alerts");
        }
        names
    }
}
