use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use super::AlertSink;
use crate::models::Alert;

#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self::with_timeout(webhook_url, Duration::from_secs(10))
    }

    pub fn with_timeout(webhook_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("failed to build slack HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            webhook_url,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    pub async fn send_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        let url = match &self.webhook_url {
            Some(u) => u,
            None => {
                tracing::debug!("No Slack webhook URL configured, skipping notification");
                return Ok(());
            }
        };

        let message = SlackMessage::for_alert(alert);

        let resp = self
            .client
            .post(url)
            .json(&message)
            .send()
            .await
            .context("failed to send slack notification")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("slack returned error: status={}, body={}", status, body);
        }

        tracing::info!(product_id = %alert.product_id, "Sent Slack alert");
        Ok(())
    }
}

#[async_trait]
impl AlertSink for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        self.send_alert(alert).await
    }
}

#[derive(Debug, Serialize)]
struct SlackMessage {
    text: String,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    title: String,
    text: String,
}

impl SlackMessage {
    fn for_alert(alert: &Alert) -> Self {
        Self {
            text: format!(
                "🚨 Herd behavior detected for *{}*\nViews: {} | z: {:.2} | trigger: {}",
                alert.product_id, alert.current_count, alert.z_score, alert.trigger_type
            ),
            attachments: vec![SlackAttachment {
                title: "Herd Alerter".to_string(),
                text: alert.to_json(),
            }],
        }
    }
}
