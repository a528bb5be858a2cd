//! Request guard middleware
//!
//! Runs the access-decision engine in front of a route. Route rules arrive as
//! a [`RouteAccess`] request extension; a request without one is judged by
//! the global policy alone.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::HttpBody,
    extract::{ConnectInfo, OriginalUri, Request, State},
    http::{header::CONTENT_LENGTH, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
    Extension, Json,
};

use crate::{
    middleware::client_info::derive_client_info,
    models::{Decision, RouteAccess},
    services::{GuardRequest, TrafficFacts},
    utils::ErrorResponse,
    AppState,
};

/// Denial codes answered with 401 instead of 403
const CREDENTIAL_CODES: &[&str] = &["api_key_missing", "api_key_invalid", "api_key_expired"];

pub async fn guard_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let config = &state.config.guard;

    let access = request.extensions().get::<RouteAccess>().cloned();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = derive_client_info(
        peer,
        request.headers(),
        config.trust_proxy,
        &config.client_mac_header,
    );
    let api_key = request
        .headers()
        .get(&config.api_key_header)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let headers = header_snapshot(request.headers());
    // Inside a nested router `uri()` has the prefix stripped
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let outcome = state
        .guard
        .check(GuardRequest {
            client,
            api_key,
            method: request.method().to_string(),
            path,
            access,
        })
        .await;

    let response = if outcome.allowed() {
        request.extensions_mut().insert(outcome.identity.clone());
        next.run(request).await
    } else {
        denial_response(&outcome.decision)
    };

    let response_size = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or_else(|| response.body().size_hint().exact());

    state.guard.record_traffic(
        &outcome,
        TrafficFacts {
            status: response.status().as_u16(),
            duration: started.elapsed(),
            response_size,
            headers,
        },
    );

    response
}

/// Map a denial to 401 (credential problems) or 403 (everything else)
pub fn denial_response(decision: &Decision) -> Response {
    let code = decision.code.as_deref().unwrap_or("access_denied");
    let (status, error) = if CREDENTIAL_CODES.contains(&code) {
        (StatusCode::UNAUTHORIZED, "unauthorized")
    } else {
        (StatusCode::FORBIDDEN, "forbidden")
    };

    let mut body = ErrorResponse::new(
        error,
        decision.reason.as_deref().unwrap_or("Access denied"),
    )
    .with_code(code);
    if !decision.metadata.is_empty() {
        body = body.with_details(serde_json::Value::Object(decision.metadata.clone()));
    }

    (status, Json(body)).into_response()
}

fn header_snapshot(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Attach route rules and the guard to one route
pub fn guarded(
    route: MethodRouter<AppState>,
    state: &AppState,
    access: RouteAccess,
) -> MethodRouter<AppState> {
    // Layers added last run first, so the extension is in place for the guard
    route
        .layer::<_, Infallible>(middleware::from_fn_with_state(
            state.clone(),
            guard_middleware,
        ))
        .layer::<_, Infallible>(Extension(access))
}
