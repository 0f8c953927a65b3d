//! Prometheus metrics for the alerter.
//!
//! Exposed on `/metrics`. Uses a per-instance registry rather than the
//! global default one so that several engines (tests, replay) can coexist
//! in one process.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    events_total: IntCounterVec,
    alerts_total: IntCounterVec,
    sink_failures_total: IntCounterVec,
    tracked_products: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let events_total = IntCounterVec::new(
            Opts::new("herd_events_total", "Events received, by outcome"),
            &["outcome"],
        )?;
        let alerts_total = IntCounterVec::new(
            Opts::new("herd_alerts_total", "Alerts offered to the dispatcher"),
            &["trigger_type", "outcome"],
        )?;
        let sink_failures_total = IntCounterVec::new(
            Opts::new("herd_sink_failures_total", "Failed or timed-out alert deliveries"),
            &["sink"],
        )?;
        let tracked_products = IntGauge::new(
            "herd_tracked_products",
            "Products with activity currently held in memory",
        )?;

        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(alerts_total.clone()))?;
        registry.register(Box::new(sink_failures_total.clone()))?;
        registry.register(Box::new(tracked_products.clone()))?;

        Ok(Self {
            registry,
            events_total,
            alerts_total,
            sink_failures_total,
            tracked_products,
        })
    }

    /// `outcome` is one of `recorded`, `dropped`.
    pub fn event(&self, outcome: &str) {
        self.events_total.with_label_values(&[outcome]).inc();
    }

    /// `outcome` is one of `emitted`, `suppressed`, `dropped`.
    pub fn alert(&self, trigger_type: &str, outcome: &str) {
        self.alerts_total
            .with_label_values(&[trigger_type, outcome])
            .inc();
    }

    pub fn sink_failure(&self, sink: &str) {
        self.sink_failures_total.with_label_values(&[sink]).inc();
    }

    pub fn set_tracked_products(&self, n: usize) {
        self.tracked_products.set(n as i64);
    }

    pub fn events(&self, outcome: &str) -> u64 {
        self.events_total.with_label_values(&[outcome]).get()
    }

    pub fn alerts(&self, trigger_type: &str, outcome: &str) -> u64 {
        self.alerts_total
            .with_label_values(&[trigger_type, outcome])
            .get()
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::error!("failed to encode metrics: {}", e);
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
