use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::ProductReport;
use crate::errors::AppError;
use crate::models::{Alert, Event};
use crate::state::AppState;

/// `/alerts/trending` only lists keys above this z-score.
const TRENDING_Z: f64 = 3.0;
/// Events appended by `/simulate/spike`.
const SPIKE_EVENTS: usize = 15;

// ── Status ───────────────────────────────────────────────────

pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "Herd Alerter Running",
        "strategy": state.engine.strategy().as_str(),
        "sources": state.source_names(),
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "herd-alerter" }))
}

pub async fn readiness() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.set_tracked_products(state.engine.tracked());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

// ── Ingestion ────────────────────────────────────────────────

/// POST /track: record one view event and run per-event detection.
pub async fn track_event(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let value: Value = serde_json::from_slice(&body).map_err(|e| {
        state.metrics.event("dropped");
        AppError::InvalidEvent(e.to_string())
    })?;

    let Some(event) = Event::from_value(&value) else {
        tracing::debug!("track: event without product_id, ignoring");
        state.metrics.event("dropped");
        return Ok(Json(json!({ "status": "ignored" })));
    };

    if let Some(alert) = state.ingestor.ingest(&event) {
        tracing::debug!(
            product_id = %alert.product_id,
            trigger_type = %alert.trigger_type,
            "alert detected via http"
        );
    }
    Ok(Json(json!({ "status": "accepted" })))
}

/// POST /simulate/spike/:product_id: append a burst of events now.
pub async fn simulate_spike(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !state.config.simulate_enabled {
        return Err(AppError::Disabled);
    }
    if product_id.trim().is_empty() {
        return Err(AppError::InvalidEvent("product_id must not be empty".into()));
    }

    tracing::info!(product_id = %product_id, events = SPIKE_EVENTS, "simulating spike");
    match state.ingestor.ingest_burst(&product_id, SPIKE_EVENTS) {
        Some(alert) => Ok(Json(json!({ "status": "spike_created", "alert": alert }))),
        None => Ok(Json(json!({ "status": "no_alert_triggered" }))),
    }
}

// ── Alert queries ────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ActiveAlert {
    pub product: String,
    pub trend: &'static str,
    pub views: u64,
    pub z_score: f64,
    pub mean: f64,
    pub trigger_type: String,
}

impl From<&Alert> for ActiveAlert {
    fn from(alert: &Alert) -> Self {
        Self {
            product: alert.product_id.clone(),
            trend: "up",
            views: alert.current_count,
            z_score: alert.z_score,
            mean: alert.mean,
            trigger_type: alert.trigger_type.to_string(),
        }
    }
}

/// GET /alerts, /alerts/active: keys that would alert right now.
pub async fn active_alerts(State(state): State<Arc<AppState>>) -> Json<Value> {
    let alerts: Vec<ActiveAlert> = state.engine.scan().iter().map(ActiveAlert::from).collect();
    Json(json!({ "alerts": alerts }))
}

/// GET /alerts/trending: active alerts with z-score above 3.
pub async fn trending_alerts(State(state): State<Arc<AppState>>) -> Json<Value> {
    let trending: Vec<ActiveAlert> = state
        .engine
        .scan()
        .iter()
        .filter(|a| a.z_score > TRENDING_Z)
        .map(ActiveAlert::from)
        .collect();
    Json(json!({ "trending_alerts": trending }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub product: String,
    pub timestamp: String,
    pub views: u64,
    pub z_score: f64,
    pub trigger_type: String,
}

/// GET /alerts/history?limit=: most recent delivered alerts, newest first.
pub async fn alert_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Json<Value> {
    let limit = params
        .limit
        .unwrap_or(state.config.history_limit)
        .min(state.config.history_limit);
    let history: Vec<HistoryEntry> = state
        .hub
        .history(limit)
        .into_iter()
        .map(|a| HistoryEntry {
            timestamp: a.detected_at.to_rfc3339(),
            views: a.current_count,
            z_score: a.z_score,
            trigger_type: a.trigger_type.to_string(),
            product: a.product_id,
        })
        .collect();
    Json(json!({ "history": history }))
}

/// GET /products/:product_id: window counts and baseline for one key.
pub async fn product_report(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
) -> Result<Json<ProductReport>, AppError> {
    state
        .engine
        .report(&product_id)
        .map(Json)
        .ok_or(AppError::ProductNotFound(product_id))
}
