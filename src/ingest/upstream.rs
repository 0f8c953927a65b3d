//! Upstream WebSocket sources.
//!
//! Each source is one long-lived task: connect, pump messages into the
//! ingestor, reconnect after a fixed delay when the stream drops. A source
//! that cannot connect `max_retries` times in a row halts on its own; the
//! rest of the service keeps running.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::Ingestor;
use crate::config::SourceConfig;

type Upstream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{source_name} source gave up on {url} after {attempts} failed connection attempts")]
    RetriesExhausted {
        source_name: &'static str,
        url: String,
        attempts: u32,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl From<&SourceConfig> for RetryPolicy {
    fn from(cfg: &SourceConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            delay: cfg.retry_delay,
        }
    }
}

enum PumpExit {
    Disconnected,
    Shutdown,
}

fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Connect, retrying with a fixed delay. `Ok(None)` when shutdown was
/// requested while waiting.
pub async fn connect_with_retry(
    source_name: &'static str,
    url: &str,
    policy: RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<Upstream>, SourceError> {
    let mut failures: u32 = 0;
    loop {
        if is_shutdown(shutdown) {
            return Ok(None);
        }

        let attempt = tokio::select! {
            res = connect_async(url) => res,
            _ = shutdown.changed() => return Ok(None),
        };

        match attempt {
            Ok((stream, _response)) => {
                tracing::info!(source = source_name, url, "connected to upstream");
                return Ok(Some(stream));
            }
            Err(e) => {
                failures += 1;
                if failures > policy.max_retries {
                    tracing::error!(
                        source = source_name,
                        url,
                        attempts = failures,
                        error = %e,
                        "upstream unavailable, giving up"
                    );
                    return Err(SourceError::RetriesExhausted {
                        source_name,
                        url: url.to_string(),
                        attempts: failures,
                    });
                }
                tracing::warn!(
                    source = source_name,
                    url,
                    attempt = failures,
                    max_retries = policy.max_retries,
                    error = %e,
                    "upstream connection failed, retrying in {:?}",
                    policy.delay
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(policy.delay) => {}
            _ = shutdown.changed() => return Ok(None),
        }
    }
}

async fn pump<F>(
    source_name: &'static str,
    stream: &mut Upstream,
    handle: &mut F,
    shutdown: &mut watch::Receiver<bool>,
) -> PumpExit
where
    F: FnMut(&[u8]),
{
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => handle(text.as_bytes()),
                Some(Ok(Message::Binary(bytes))) => handle(bytes.as_slice()),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(source = source_name, ?frame, "upstream closed the stream");
                    return PumpExit::Disconnected;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(source = source_name, error = %e, "upstream read error");
                    return PumpExit::Disconnected;
                }
                None => return PumpExit::Disconnected,
            },
            _ = shutdown.changed() => {
                let _ = stream.close(None).await;
                return PumpExit::Shutdown;
            }
        }
    }
}

/// Generic source loop: every message is handed to `handle`.
pub async fn run_source<F>(
    source_name: &'static str,
    url: String,
    policy: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
    mut handle: F,
) -> Result<(), SourceError>
where
    F: FnMut(&[u8]) + Send,
{
    loop {
        let Some(mut stream) = connect_with_retry(source_name, &url, policy, &mut shutdown).await?
        else {
            break;
        };

        match pump(source_name, &mut stream, &mut handle, &mut shutdown).await {
            PumpExit::Shutdown => break,
            PumpExit::Disconnected => {
                tracing::warn!(source = source_name, url = %url, "upstream disconnected, reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(policy.delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    tracing::info!(source = source_name, "source stopped");
    Ok(())
}

/// Raw view events: parsed, recorded and evaluated per message.
pub async fn run_event_source(
    url: String,
    policy: RetryPolicy,
    ingestor: Arc<Ingestor>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), SourceError> {
    run_source("events", url, policy, shutdown, move |raw| {
        ingestor.ingest_raw(raw);
    })
    .await
}

/// Pre-computed alerts from a stream processor: normalized and dispatched.
pub async fn run_alert_source(
    url: String,
    policy: RetryPolicy,
    ingestor: Arc<Ingestor>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), SourceError> {
    run_source("alerts", url, policy, shutdown, move |raw| {
        ingestor.ingest_alert_raw(raw);
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;
    use tokio::net::TcpListener;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            delay: Duration::from_millis(10),
        }
    }

    async fn unused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let url = unused_url().await;
        let (_tx, rx) = watch::channel(false);
        let err = run_source("events", url, fast_policy(2), rx, |_| {})
            .await
            .unwrap_err();
        match err {
            SourceError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
        }
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_retry_wait() {
        let url = unused_url().await;
        let (tx, rx) = watch::channel(false);
        let policy = RetryPolicy {
            max_retries: 100,
            delay: Duration::from_secs(60),
        };
        let task = tokio::spawn(run_source("events", url, policy, rx, |_| {}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let res = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn test_messages_reach_handler() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            for i in 0..3 {
                let msg = format!(r#"{{"event_type":"view","product_id":"p{}"}}"#, i);
                ws.send(Message::Text(msg)).await.unwrap();
            }
            ws.close(None).await.ok();
        });

        let (tx, rx) = watch::channel(false);
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        let task = tokio::spawn(run_source("events", url, fast_policy(0), rx, move |raw| {
            let _ = seen_tx.send(raw.to_vec());
        }));

        for i in 0..3 {
            let raw = seen_rx.recv().await.unwrap();
            let ev = crate::ingest::parse_event(&raw).unwrap();
            assert_eq!(ev.product_id, format!("p{}", i));
        }
        tx.send(true).unwrap();
        // The server is gone after one session, so the loop ends either on
        // shutdown or on exhausted retries.
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap();
    }
}
