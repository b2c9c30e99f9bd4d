//! Axum HTTP API server.
//!
//! This crate provides:
//! - Job admission (`POST /upload`): spool, store, enqueue
//! - Status resolution (`GET /jobs/:job_id`) derived from the result artifact
//! - Liveness and Prometheus metrics endpoints

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{AdmissionError, AdmissionService, StatusResolver};
pub use state::AppState;
