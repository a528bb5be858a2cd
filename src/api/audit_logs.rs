//! Audit log API endpoints

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

use crate::{
    middleware::guarded,
    models::{
        AccessRuleOptions, AuditKind, AuditQuery, AuditRecord, KeyStrategyConfig, RequireOptions,
        RouteAccess,
    },
    utils::AppError,
    AppState,
};

pub const AUDIT_READ_SCOPE: &str = "audit:read";

const MAX_LIMIT: u32 = 1000;

fn reader_access(name: &str) -> RouteAccess {
    RouteAccess::new(
        AccessRuleOptions::default()
            .require(RequireOptions {
                api_key: true,
                scopes: vec![AUDIT_READ_SCOPE.to_string()],
                combined: vec![],
            })
            .key_strategy(KeyStrategyConfig::Store),
    )
    .named(name)
}

pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/traffic",
            guarded(get(list_traffic), state, reader_access("audit.traffic")),
        )
        .route(
            "/access",
            guarded(get(list_access), state, reader_access("audit.access")),
        )
}

async fn list_traffic(
    State(state): State<AppState>,
    Query(mut query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditRecord>>, AppError> {
    query.kind = Some(AuditKind::Traffic);
    // Traffic entries carry no decision
    query.decision = None;
    list(&state, query).await
}

async fn list_access(
    State(state): State<AppState>,
    Query(mut query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditRecord>>, AppError> {
    query.kind = Some(AuditKind::Access);
    list(&state, query).await
}

async fn list(state: &AppState, mut query: AuditQuery) -> Result<Json<Vec<AuditRecord>>, AppError> {
    query.limit = Some(
        query
            .limit
            .unwrap_or(AuditQuery::DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT),
    );

    let logs = state.audit_sink.query(&query).await.map_err(|e| {
        tracing::error!("Failed to query audit logs: {}", e);
        AppError::internal("Failed to query audit logs")
    })?;

    Ok(Json(logs))
}
