use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Startup configuration problems. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("window '{name}' must have a positive duration")]
    NonPositiveWindow { name: String },

    #[error("window '{name}' is defined more than once")]
    DuplicateWindow { name: String },

    #[error("{role} window '{name}' is not among the configured windows")]
    UnknownWindow { role: &'static str, name: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be a finite, non-negative number (got {value})")]
    BadThreshold { field: &'static str, value: f64 },

    #[error("unknown strategy '{0}' (expected heuristic, zscore or both)")]
    UnknownStrategy(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: &str, reason: impl ToString) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors surfaced by the HTTP API.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid event payload: {0}")]
    InvalidEvent(String),

    #[error("product not tracked: {0}")]
    ProductNotFound(String),

    #[error("endpoint disabled")]
    Disabled,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::InvalidEvent(e) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_event",
                e.clone(),
            ),
            AppError::ProductNotFound(id) => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "product_not_found",
                format!("no activity recorded for '{}'", id),
            ),
            AppError::Disabled => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "endpoint_disabled",
                "this endpoint is disabled".to_string(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
