use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod handlers;
pub mod ws;

/// Event payloads are tiny; anything larger is not a view event.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the public HTTP router: tracking, alert queries, diagnostics and
/// the WebSocket feed.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::status))
        .route("/health", get(handlers::health))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(handlers::readiness))
        .route("/track", post(handlers::track_event))
        .route("/alerts", get(handlers::active_alerts))
        .route("/alerts/active", get(handlers::active_alerts))
        .route("/alerts/trending", get(handlers::trending_alerts))
        .route("/alerts/history", get(handlers::alert_history))
        .route("/simulate/spike/:product_id", post(handlers::simulate_spike))
        .route("/products/:product_id", get(handlers::product_report))
        .route("/ws", get(ws::ws_handler))
        .route("/metrics", get(handlers::metrics))
        .fallback(fallback_404)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        // Dashboards are served from anywhere.
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: injects a unique X-Request-Id into every response so clients
/// can correlate errors with server logs.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");
    resp
}
