use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herd::config::{self, Config};
use herd::engine::{AnomalyEngine, SystemClock};
use herd::ingest::upstream::{self, RetryPolicy};
use herd::{api, jobs, replay, AppState};

mod cli;

/// How long the delivery job gets to drain queued alerts on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let cfg = config::load()?;
    init_tracing(cfg.log_json);

    let result = match args.command {
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Replay { file, strategy }) => {
            let mut detector = cfg.detector;
            if let Some(s) = strategy {
                detector.strategy = s.parse()?;
            }
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            replay::run(&file, detector, &mut out).map(|report| {
                tracing::info!(
                    file = %file.display(),
                    alerts = report.alerts,
                    "replay complete"
                );
            })
        }
        Some(cli::Commands::CheckConfig) => check_config(&cfg),
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Logging: `RUST_LOG` filter, plain or JSON fmt layer on stderr (stdout
/// carries replay output), and an OTLP exporter when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing(json: bool) {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "herd-alerter"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(e) => {
                eprintln!("failed to install OpenTelemetry tracer, continuing without it: {}", e);
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "herd=debug,tower_http=info".into()),
        ))
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(telemetry_layer)
        .init();
}

fn check_config(cfg: &Config) -> anyhow::Result<()> {
    AnomalyEngine::new(&cfg.detector, Arc::new(SystemClock))?;
    let windows: Vec<String> = cfg
        .detector
        .windows
        .iter()
        .map(|w| format!("{}={}s", w.name, w.duration.as_secs()))
        .collect();
    println!("configuration OK");
    println!("  port:      {}", cfg.port);
    println!("  strategy:  {}", cfg.detector.strategy.as_str());
    println!("  windows:   {}", windows.join(","));
    println!(
        "  sources:   events={} alerts={}",
        cfg.sources.event_url.as_deref().unwrap_or("-"),
        cfg.sources.alert_url.as_deref().unwrap_or("-")
    );
    println!(
        "  sinks:     slack={} webhooks={}",
        cfg.notify.slack_webhook_url.is_some(),
        cfg.notify.webhook_urls.len()
    );
    Ok(())
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let (state, alert_rx) = AppState::build(cfg, Arc::new(SystemClock))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let delivery = jobs::delivery::spawn(
        alert_rx,
        state.sinks(),
        state.config.notify.timeout,
        state.metrics.clone(),
    );

    let mut tasks: Vec<JoinHandle<()>> = vec![
        jobs::detector::spawn(
            state.engine.clone(),
            state.dispatcher.clone(),
            state.config.detector.tick,
            shutdown_rx.clone(),
        ),
        jobs::prune::spawn(
            state.engine.clone(),
            state.dispatcher.clone(),
            state.metrics.clone(),
            state.config.detector.idle_ttl,
            shutdown_rx.clone(),
        ),
    ];
    tracing::info!(
        strategy = state.config.detector.strategy.as_str(),
        tick_secs = state.config.detector.tick.as_secs(),
        "background jobs started"
    );

    let policy = RetryPolicy::from(&state.config.sources);
    if let Some(url) = state.config.sources.event_url.clone() {
        let ingestor = state.ingestor.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = upstream::run_event_source(url, policy, ingestor, rx).await {
                tracing::error!(error = %e, "event source halted");
            }
        }));
    }
    if let Some(url) = state.config.sources.alert_url.clone() {
        let ingestor = state.ingestor.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = upstream::run_alert_source(url, policy, ingestor, rx).await {
                tracing::error!(error = %e, "alert source halted");
            }
        }));
    }
    drop(shutdown_rx);

    let app = api::router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Herd alerter listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "background task ended abnormally");
        }
    }

    // Last dispatcher handle goes with the state; delivery then drains.
    drop(state);
    if tokio::time::timeout(DRAIN_TIMEOUT, delivery).await.is_err() {
        tracing::warn!("alert delivery did not drain in time");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
