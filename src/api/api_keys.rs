//! API key management endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    middleware::guarded,
    models::{
        AccessRuleOptions, ApiKeyRecord, CreateApiKeyRequest, CreateApiKeyResponse,
        InvalidateOutcome, KeyStrategyConfig, RequireOptions, RouteAccess,
    },
    utils::{validation::validate_scope, AppError},
    AppState,
};

/// Scope required for every key management call
pub const KEYS_ADMIN_SCOPE: &str = "keys:admin";

fn admin_access(name: &str) -> RouteAccess {
    RouteAccess::new(
        AccessRuleOptions::default()
            .require(RequireOptions {
                api_key: true,
                scopes: vec![KEYS_ADMIN_SCOPE.to_string()],
                combined: vec![],
            })
            .key_strategy(KeyStrategyConfig::Store),
    )
    .named(name)
}

pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            guarded(
                get(list_api_keys).post(create_api_key),
                state,
                admin_access("api-keys"),
            ),
        )
        .route(
            "/{id}",
            guarded(delete(invalidate_api_key), state, admin_access("api-keys.invalidate")),
        )
}

async fn list_api_keys(State(state): State<AppState>) -> Result<Json<Vec<ApiKeyRecord>>, AppError> {
    let keys = state.api_keys.list().await.map_err(|e| {
        tracing::error!("Failed to list api keys: {}", e);
        AppError::internal("Failed to list api keys")
    })?;

    Ok(Json(keys))
}

async fn create_api_key(
    State(state): State<AppState>,
    Json(payload): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreateApiKeyResponse>), AppError> {
    payload.validate()?;
    if let Some(scope) = payload.scopes.iter().find(|s| !validate_scope(s)) {
        return Err(AppError::ValidationError(format!("Invalid scope: '{}'", scope)));
    }

    let created = state.api_keys.create(&payload).await.map_err(|e| {
        tracing::error!("Failed to create api key: {}", e);
        AppError::internal("Failed to create api key")
    })?;

    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Serialize)]
struct InvalidateResponse {
    id: Uuid,
    outcome: InvalidateOutcome,
}

/// Invalidation is idempotent: repeating it reports `not_found_or_inactive`
async fn invalidate_api_key(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvalidateResponse>, AppError> {
    let outcome = state.api_keys.invalidate(id).await.map_err(|e| {
        tracing::error!("Failed to invalidate api key: {}", e);
        AppError::internal("Failed to invalidate api key")
    })?;

    Ok(Json(InvalidateResponse { id, outcome }))
}
