//! Health check endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::{services::AuditQueueStats, AppState};

/// Basic health response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Audit queue depth and delivery counters; absent when auditing is off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditQueueStats>,
}

/// Liveness check
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        audit: state.audit.as_ref().map(|queue| queue.stats()),
    })
}
