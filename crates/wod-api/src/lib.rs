//! Axum HTTP API for the exercise video analysis pipeline.
//!
//! This crate provides:
//! - Multipart video upload that queues an analysis task
//! - Per-session analysis result queries
//! - Health, readiness and Prometheus endpoints

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
