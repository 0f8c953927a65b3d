//! Herd Alerter: library crate.
//!
//! The binary in `main.rs` is a thin shell over these modules; integration
//! tests in `tests/` drive them directly.

pub mod api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod hub;
pub mod ingest;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod replay;
pub mod state;

pub use state::AppState;
