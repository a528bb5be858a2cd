//! Test application setup utilities
//!
//! Provides utilities for setting up test instances of the application
//! with an in-memory database and the full guard middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::ConnectInfo,
    http::Request,
    Router,
};
use tower::ServiceExt;

use access_guard::{
    api,
    config::{AppConfig, DatabaseConfig, HashConfig},
    db::{self, SqliteAuditSink, SqliteKeyStore},
    models::{CreateApiKeyRequest, CreateApiKeyResponse, OwnerType},
    AppState, AppStateBuilder,
};

/// Socket peer used for every request unless a test overrides it
pub const DEFAULT_PEER: &str = "127.0.0.1:40000";

/// Test application wrapper for integration testing
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    /// Create a new test application with in-memory SQLite database
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        Self::with_builder(config, |builder| builder).await
    }

    /// Create a test application, letting the caller register strategies,
    /// predicates or hooks before the state is built
    pub async fn with_builder<F>(config: AppConfig, customize: F) -> Self
    where
        F: FnOnce(AppStateBuilder) -> AppStateBuilder,
    {
        let pool = db::init_pool(&config.database)
            .await
            .expect("Failed to initialize test database");

        let builder = AppState::builder(config)
            .key_store(Arc::new(SqliteKeyStore::new(pool.clone())))
            .audit_sink(Arc::new(SqliteAuditSink::new(pool)));
        let state = customize(builder)
            .build()
            .expect("Failed to build application state");

        let router = api::router(state.clone());

        Self { router, state }
    }

    /// Replace the router, e.g. to mount extra guarded routes
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Issue a key directly through the service and return its plaintext
    pub async fn create_key(&self, name: &str, scopes: &[&str]) -> CreateApiKeyResponse {
        self.state
            .api_keys
            .create(&CreateApiKeyRequest {
                name: name.to_string(),
                owner_type: OwnerType::User,
                owner_id: format!("{}-owner", name),
                scopes: scopes.iter().map(|s| s.to_string()).collect(),
                expires_at: None,
            })
            .await
            .expect("Failed to create test api key")
    }

    /// Make a GET request to the test application
    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Make a GET request presenting an API key
    pub async fn get_with_key(&self, uri: &str, key: &str) -> TestResponse {
        self.request(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("x-api-key", key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Make a POST request with JSON body and an API key
    pub async fn post_json_with_key(
        &self,
        uri: &str,
        body: serde_json::Value,
        key: &str,
    ) -> TestResponse {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .header("x-api-key", key)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Make a DELETE request with an API key
    pub async fn delete_with_key(&self, uri: &str, key: &str) -> TestResponse {
        self.request(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .header("x-api-key", key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Make an arbitrary request from [`DEFAULT_PEER`]
    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        self.request_from(DEFAULT_PEER, request).await
    }

    /// Make an arbitrary request as if it arrived from `peer`
    pub async fn request_from(&self, peer: &str, mut request: Request<Body>) -> TestResponse {
        let peer: SocketAddr = peer.parse().expect("Invalid peer address");
        request.extensions_mut().insert(ConnectInfo(peer));

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Push every queued audit entry into the database
    pub async fn flush_audit(&self) {
        if let Some(queue) = &self.state.audit {
            queue.flush_all().await;
        }
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: axum::http::StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    /// Get the response body as a string
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Parse the response body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to parse response as JSON")
    }

    /// Assert the response status
    pub fn assert_status(&self, expected: axum::http::StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {}, got {}. Body: {}",
            expected,
            self.status,
            self.text()
        );
        self
    }

    pub fn assert_ok(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::OK)
    }

    pub fn assert_created(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::CREATED)
    }

    pub fn assert_unauthorized(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::UNAUTHORIZED)
    }

    pub fn assert_forbidden(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::FORBIDDEN)
    }

    /// Assert the denial code carried in the error body
    pub fn assert_code(&self, code: &str) -> &Self {
        let json: serde_json::Value = self.json();
        assert_eq!(json["code"], code, "Body: {}", self.text());
        self
    }
}

/// Test configuration: in-memory SQLite and a cheap key hash
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.database = DatabaseConfig {
        // A single connection keeps the in-memory database alive and shared
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        connect_timeout_secs: 5,
    };
    config.api_keys.hash = HashConfig {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_creation() {
        let app = TestApp::new().await;
        assert!(app.state.audit.is_some());
    }

    #[tokio::test]
    async fn test_response_json_parsing() {
        let app = TestApp::new().await;
        let response = app.get("/api/v1/health").await;
        let json: serde_json::Value = response.json();
        assert!(json.get("status").is_some());
    }
}
