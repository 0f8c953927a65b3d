//! Offline replay of a recorded event stream.
//!
//! Input is newline-delimited JSON, one event per line. The engine runs on a
//! [`ManualClock`] that follows each event's `observed_at`, and detector
//! ticks fire on every tick boundary the stream crosses, so a replay makes
//! exactly the decisions the live service would have made.
//!
//! Long quiet gaps are fast-forwarded. Once every window is empty, a tick
//! can only push a zero sample into the baselines, so only the last
//! `baseline_cap` ticks before the next event are simulated.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::DetectorConfig;
use crate::engine::{AlertDispatcher, AnomalyEngine, Clock, DispatchPolicy, ManualClock};
use crate::ingest::{parse_event, Ingestor};
use crate::jobs::detector;
use crate::metrics::Metrics;
use crate::models::Alert;

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReplayReport {
    pub events: usize,
    pub skipped: usize,
    pub ticks: usize,
    /// Quiet ticks skipped by fast-forwarding.
    pub skipped_ticks: u64,
    pub alerts: usize,
}

/// Replay a file, writing one JSON alert per line to `out`.
pub fn run<W: Write>(path: &Path, config: DetectorConfig, out: &mut W) -> anyhow::Result<ReplayReport> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    run_reader(BufReader::new(file), config, out)
}

pub fn run_reader<R: BufRead, W: Write>(
    input: R,
    config: DetectorConfig,
    out: &mut W,
) -> anyhow::Result<ReplayReport> {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = Arc::new(AnomalyEngine::new(&config, clock.clone())?);
    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
    let (dispatcher, mut rx) = AlertDispatcher::channel(
        DispatchPolicy::new(config.cooldown, config.merge_window),
        1024,
        clock.clone(),
        metrics.clone(),
    );
    let dispatcher = Arc::new(dispatcher);
    let ingestor = Ingestor::new(engine.clone(), dispatcher.clone(), metrics);
    let tick = chrono::Duration::from_std(config.tick).context("tick period out of range")?;
    let longest = config
        .windows
        .iter()
        .map(|w| w.duration)
        .max()
        .unwrap_or_default();
    let quiet_after = chrono::Duration::from_std(longest + config.tick)
        .context("window span out of range")?;
    let horizon = chrono::Duration::from_std(
        config
            .tick
            .saturating_mul(u32::try_from(config.baseline_cap).unwrap_or(u32::MAX)),
    )
    .context("baseline horizon out of range")?;

    let mut report = ReplayReport::default();
    let mut next_tick: Option<DateTime<Utc>> = None;
    let mut last_event: Option<DateTime<Utc>> = None;

    for (lineno, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", lineno + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let Some(event) = parse_event(line.as_bytes()) else {
            tracing::debug!(line = lineno + 1, "skipping unparseable replay line");
            report.skipped += 1;
            continue;
        };

        // Events without a timestamp, or out of order, happen "now".
        let at = event
            .observed_at
            .filter(|t| *t >= clock.now() || next_tick.is_none())
            .unwrap_or_else(|| clock.now());

        let boundary = next_tick.get_or_insert(at + tick);
        while *boundary <= at {
            if let Some(last) = last_event {
                report.skipped_ticks +=
                    fast_forward(boundary, last + quiet_after, at - horizon, tick);
            }
            clock.set(*boundary);
            detector::run_tick(&engine, &dispatcher);
            report.ticks += 1;
            *boundary += tick;
            drain(&mut rx, out, &mut report)?;
        }

        clock.set(at);
        last_event = Some(at);
        ingestor.ingest(&event);
        report.events += 1;
        drain(&mut rx, out, &mut report)?;
    }

    // Close the last partial period so a spike at the very end still counts.
    if let Some(boundary) = next_tick {
        clock.set(boundary);
        detector::run_tick(&engine, &dispatcher);
        report.ticks += 1;
        drain(&mut rx, out, &mut report)?;
    }

    tracing::info!(
        events = report.events,
        skipped = report.skipped,
        ticks = report.ticks,
        alerts = report.alerts,
        "replay finished"
    );
    Ok(report)
}

/// Move `boundary` forward by whole ticks while it stays inside
/// `(quiet_from, resume_at]`. Returns the number of ticks skipped.
fn fast_forward(
    boundary: &mut DateTime<Utc>,
    quiet_from: DateTime<Utc>,
    resume_at: DateTime<Utc>,
    tick: chrono::Duration,
) -> u64 {
    if *boundary <= quiet_from || *boundary >= resume_at {
        return 0;
    }
    let tick_ms = tick.num_milliseconds().max(1);
    let skip = (resume_at - *boundary).num_milliseconds() / tick_ms;
    if skip <= 0 {
        return 0;
    }
    *boundary += chrono::Duration::milliseconds(skip * tick_ms);
    skip as u64
}

fn drain<W: Write>(
    rx: &mut mpsc::Receiver<Alert>,
    out: &mut W,
    report: &mut ReplayReport,
) -> anyhow::Result<()> {
    while let Ok(alert) = rx.try_recv() {
        writeln!(out, "{}", alert.to_json()).context("failed to write alert")?;
        report.alerts += 1;
    }
    Ok(())
}
