use anyhow::Result;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::AlertSink;
use crate::models::Alert;

// ── Webhook Event Types ───────────────────────────────────────

/// A structured event payload sent to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Event type identifier. Always "herd_alert" for now.
    pub event_type: String,
    /// ISO-8601 timestamp of when the event was created.
    pub timestamp: String,
    pub product_id: String,
    /// The alert record as broadcast to WebSocket clients.
    pub details: serde_json::Value,
}

impl WebhookEvent {
    pub fn herd_alert(alert: &Alert) -> Self {
        Self {
            event_type: "herd_alert".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            product_id: alert.product_id.clone(),
            details: serde_json::to_value(alert).unwrap_or(serde_json::Value::Null),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`, as "sha256=<hex>".
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    let bytes = mac.finalize().into_bytes();
    format!("sha256={}", hex::encode(bytes))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Dispatches alert events to the configured webhook URLs.
/// Supports:
/// - HMAC-SHA256 signing (X-Herd-Signature header)
/// - Retries with back-off (default 1s → 5s → 25s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
    signing_secret: Option<String>,
    backoff: Vec<Duration>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, signing_secret: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("HerdAlerter-Webhook/1.0")
            .build()
            .unwrap_or_else(|e| {
                warn!("failed to build webhook HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            urls,
            signing_secret,
            backoff: [0, 1, 5, 25].into_iter().map(Duration::from_secs).collect(),
        }
    }

    /// Replace the retry schedule. The first entry is the delay before the
    /// first attempt (normally zero).
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        if !backoff.is_empty() {
            self.backoff = backoff;
        }
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Send a signed event to a single URL, retrying on failure.
    /// Returns `Ok(())` if delivery succeeded on any attempt.
    pub async fn send(&self, url: &str, event: &WebhookEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self
            .signing_secret
            .as_deref()
            .map(|s| hmac_sha256_hex(s, &payload));

        for (attempt, &delay) in self.backoff.iter().enumerate() {
            if !delay.is_zero() {
                debug!(
                    url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-herd-delivery-id", &delivery_id)
                .header("x-herd-timestamp", &timestamp)
                .header("x-herd-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-herd-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        product_id = %event.product_id,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivered successfully"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "webhook delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        warn!(
            url,
            delivery_id = %delivery_id,
            "webhook delivery failed after all retries"
        );
        Err(anyhow::anyhow!(
            "webhook delivery failed after {} attempts: {}",
            self.backoff.len(),
            url
        ))
    }

    /// Deliver to every URL. Each URL is tried independently; the first
    /// error is returned after all have been attempted.
    pub async fn send_all(&self, event: &WebhookEvent) -> Result<()> {
        let mut first_err = None;
        for url in &self.urls {
            if let Err(e) = self.send(url, event).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl AlertSink for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    /// Runs the whole retry schedule in place; the delivery job's per-sink
    /// timeout bounds it.
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        if self.urls.is_empty() {
            debug!("no webhook targets, skipping");
            return Ok(());
        }
        self.send_all(&WebhookEvent::herd_alert(alert)).await
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerType;

    fn alert() -> Alert {
        Alert {
            product_id: "sku-1".into(),
            current_count: 30,
            z_score: 7.5,
            mean: 5.0,
            ratio: None,
            velocity_1m: None,
            velocity_5m: None,
            confidence: None,
            baseline_mean: Some(5.0),
            baseline_std: Some(1.2),
            trigger_type: TriggerType::ZScore,
            detected_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_herd_alert_event() {
        let event = WebhookEvent::herd_alert(&alert());
        assert_eq!(event.event_type, "herd_alert");
        assert_eq!(event.product_id, "sku-1");
        assert_eq!(event.details["trigger_type"], "zscore");
        assert_eq!(event.details["current_count"], 30);
    }

    #[test]
    fn test_hmac_signature_deterministic() {
        let sig1 = hmac_sha256_hex("secret123", b"payload");
        let sig2 = hmac_sha256_hex("secret123", b"payload");
        assert_eq!(sig1, sig2);
        assert!(sig1.starts_with("sha256="));
        assert_eq!(sig1.len(), "sha256=".len() + 64);
    }

    #[test]
    fn test_hmac_signature_different_secret() {
        assert_ne!(
            hmac_sha256_hex("secret1", b"payload"),
            hmac_sha256_hex("secret2", b"payload")
        );
    }

    #[tokio::test]
    async fn test_no_urls_is_noop() {
        let notifier = WebhookNotifier::new(vec![], None);
        notifier.send_all(&WebhookEvent::herd_alert(&alert())).await.unwrap();
        notifier.deliver(&alert()).await.unwrap();
    }
}
