//! API routes and handlers
//!
//! This module defines all management endpoints and their routing. Every
//! endpoint except the health check is protected by the request guard.

use axum::{routing::get, Router};

use crate::AppState;

mod api_keys;
mod audit_logs;
mod health;

pub use api_keys::KEYS_ADMIN_SCOPE;
pub use audit_logs::AUDIT_READ_SCOPE;
pub use health::*;

/// Management API routes, mounted under `/api/v1`
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api-keys", api_keys::routes(state))
        .nest("/audit", audit_logs::routes(state))
}

/// Complete application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes(&state))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
