//! Liveness handlers.

use axum::Json;
use chrono::Utc;
use serde::Serialize;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Liveness check. Does not touch any dependency.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct RootResponse {
    pub ok: bool,
    pub msg: String,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        ok: true,
        msg: "QuickClip Upload API".to_string(),
    })
}
