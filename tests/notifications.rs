//! Notification sinks against mock HTTP endpoints (wiremock), plus the full
//! ingest → dispatch → deliver path.

use std::time::Duration;

use herd::models::{Alert, TriggerType};
use herd::notification::slack::SlackNotifier;
use herd::notification::webhook::{WebhookEvent, WebhookNotifier};
use herd::notification::AlertSink;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn alert() -> Alert {
    Alert {
        product_id: "sneaker-x".into(),
        current_count: 30,
        z_score: 25_000_000.0,
        mean: 5.0,
        ratio: None,
        velocity_1m: None,
        velocity_5m: None,
        confidence: None,
        baseline_mean: Some(5.0),
        baseline_std: Some(0.0),
        trigger_type: TriggerType::ZScore,
        detected_at: chrono::Utc::now(),
    }
}

fn fast_backoff() -> Vec<Duration> {
    vec![Duration::ZERO, Duration::from_millis(10), Duration::from_millis(10)]
}

mod slack_tests {
    use super::*;

    #[tokio::test]
    async fn test_slack_delivers_formatted_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/slack"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let slack = SlackNotifier::new(Some(format!("{}/slack", server.uri())));
        slack.deliver(&alert()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let text = body["text"].as_str().unwrap();
        assert!(text.contains("*sneaker-x*"));
        assert!(text.contains("trigger: zscore"));
        assert_eq!(body["attachments"][0]["title"], "Herd Alerter");
    }

    #[tokio::test]
    async fn test_slack_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("invalid_payload"))
            .mount(&server)
            .await;

        let slack = SlackNotifier::new(Some(server.uri()));
        let err = slack.send_alert(&alert()).await.unwrap_err();
        assert!(err.to_string().contains("invalid_payload"));
    }
}

mod webhook_tests {
    use super::*;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    #[tokio::test]
    async fn test_webhook_is_signed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_exists("x-herd-signature"))
            .and(header_exists("x-herd-delivery-id"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/hook", server.uri());
        let notifier = WebhookNotifier::new(vec![url.clone()], Some("s3cret".into()));
        notifier.send(&url, &WebhookEvent::herd_alert(&alert())).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let req = &requests[0];
        let mut mac = Hmac::<Sha256>::new_from_slice(b"s3cret").unwrap();
        mac.update(&req.body);
        let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert_eq!(req.headers.get("x-herd-signature").unwrap().to_str().unwrap(), expected);

        let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body["event_type"], "herd_alert");
        assert_eq!(body["details"]["trigger_type"], "zscore");
    }

    #[tokio::test]
    async fn test_webhook_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fail"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let url = format!("{}/fail", server.uri());
        let notifier = WebhookNotifier::new(vec![url.clone()], None).with_backoff(fast_backoff());
        assert_err!(notifier.send(&url, &WebhookEvent::herd_alert(&alert())).await);
    }

    #[tokio::test]
    async fn test_webhook_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(vec![server.uri()], None).with_backoff(fast_backoff());
        assert_ok!(notifier.send_all(&WebhookEvent::herd_alert(&alert())).await);
    }
}

mod delivery_tests {
    use super::*;
    use herd::config::Config;
    use herd::engine::SystemClock;
    use herd::metrics::Metrics;
    use herd::{jobs, AppState};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_detected_alert_reaches_every_sink() {
        let slack = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&slack)
            .await;
        let hooks = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&hooks)
            .await;

        let mut config = Config::default();
        config.notify.slack_webhook_url = Some(slack.uri());
        config.notify.webhook_urls = vec![hooks.uri()];
        let (state, rx) = AppState::build(config, Arc::new(SystemClock)).unwrap();
        let delivery = jobs::delivery::spawn(
            rx,
            state.sinks(),
            Duration::from_secs(5),
            state.metrics.clone(),
        );
        let mut feed = state.hub.subscribe();

        assert!(state.ingestor.ingest_burst("sneaker-x", 15).is_none());
        let alert = state.ingestor.ingest_burst("sneaker-x", 15).unwrap();

        let broadcast = tokio::time::timeout(Duration::from_secs(5), feed.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(broadcast.contains("\"product_id\":\"sneaker-x\""));
        assert_eq!(state.hub.history(10), vec![alert]);

        drop(state);
        tokio::time::timeout(Duration::from_secs(5), delivery)
            .await
            .unwrap()
            .unwrap();
        // The webhook call finished before the delivery job drained.
        assert_eq!(hooks.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_webhook_is_counted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let metrics = Metrics::new().unwrap();
        let webhook = WebhookNotifier::new(vec![server.uri()], None).with_backoff(fast_backoff());
        let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(webhook)];

        let delivered =
            jobs::delivery::deliver_one(&alert(), &sinks, Duration::from_secs(5), &metrics).await;
        assert_eq!(delivered, 0);
        assert!(metrics
            .render()
            .contains(r#"herd_sink_failures_total{sink="webhook"} 1"#));
    }

    #[tokio::test]
    async fn test_slow_webhook_hits_delivery_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let metrics = Metrics::new().unwrap();
        let webhook = WebhookNotifier::new(vec![server.uri()], None).with_backoff(fast_backoff());
        let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(webhook)];

        let delivered =
            jobs::delivery::deliver_one(&alert(), &sinks, Duration::from_millis(100), &metrics)
                .await;
        assert_eq!(delivered, 0);
        assert!(metrics
            .render()
            .contains(r#"herd_sink_failures_total{sink="webhook"} 1"#));
    }
}
