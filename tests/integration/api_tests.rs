//! API integration tests
//!
//! Drives the management API through the guard with real requests.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;

use crate::common::*;

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let app = TestApp::new().await;
    let response = app.get("/api/v1/health").await;

    response.assert_ok();

    let json: serde_json::Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["audit"]["traffic_dropped"], 0);
}

#[tokio::test]
async fn test_api_keys_require_a_key() {
    let app = TestApp::new().await;

    app.get("/api/v1/api-keys")
        .await
        .assert_unauthorized()
        .assert_code("api_key_missing");
}

#[tokio::test]
async fn test_unknown_key_is_unauthorized() {
    let app = TestApp::new().await;

    let response = app.get_with_key("/api/v1/api-keys", "agk_not-a-real-key").await;
    response.assert_unauthorized().assert_code("api_key_invalid");

    let json: serde_json::Value = response.json();
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn test_missing_scope_is_forbidden() {
    let app = TestApp::new().await;
    let reader = app.create_key("reader", scopes::READ_ONLY).await;

    let response = app.get_with_key("/api/v1/api-keys", &reader.key).await;
    response.assert_forbidden().assert_code("scope_missing");

    let json: serde_json::Value = response.json();
    assert_eq!(json["details"]["missingScopes"], json!(["keys:admin"]));
}

#[tokio::test]
async fn test_create_list_and_use_key() {
    let app = TestApp::new().await;
    let admin = app.create_key("admin", scopes::ADMIN).await;

    let response = app
        .post_json_with_key(
            "/api/v1/api-keys",
            create_key_payload("billing-export", scopes::AUDITOR),
            &admin.key,
        )
        .await;
    response.assert_created();

    let created: serde_json::Value = response.json();
    let plaintext = created["key"].as_str().unwrap().to_string();
    assert!(plaintext.starts_with("agk_"));
    assert_eq!(created["name"], "billing-export");
    assert_eq!(created["owner_type"], "service");
    assert!(created.get("hashed_key").is_none());

    let listed: Vec<serde_json::Value> = app
        .get_with_key("/api/v1/api-keys", &admin.key)
        .await
        .assert_ok()
        .json();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|k| k.get("key").is_none()));

    // The new key reads audit logs but cannot manage keys
    app.get_with_key("/api/v1/audit/access", &plaintext)
        .await
        .assert_ok();
    app.get_with_key("/api/v1/api-keys", &plaintext)
        .await
        .assert_forbidden();
}

#[tokio::test]
async fn test_create_rejects_invalid_payload() {
    let app = TestApp::new().await;
    let admin = app.create_key("admin", scopes::ADMIN).await;

    app.post_json_with_key(
        "/api/v1/api-keys",
        json!({"name": "", "owner_id": "x"}),
        &admin.key,
    )
    .await
    .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    app.post_json_with_key(
        "/api/v1/api-keys",
        create_key_payload("bad-scope", &["has space"]),
        &admin.key,
    )
    .await
    .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_invalidate_is_idempotent() {
    let app = TestApp::new().await;
    let admin = app.create_key("admin", scopes::ADMIN).await;
    let victim = app.create_key("victim", scopes::AUDITOR).await;
    let uri = format!("/api/v1/api-keys/{}", victim.api_key.id);

    let first: serde_json::Value = app.delete_with_key(&uri, &admin.key).await.assert_ok().json();
    assert_eq!(first["outcome"], "invalidated");

    let second: serde_json::Value = app.delete_with_key(&uri, &admin.key).await.assert_ok().json();
    assert_eq!(second["outcome"], "not_found_or_inactive");

    app.get_with_key("/api/v1/audit/access", &victim.key)
        .await
        .assert_unauthorized()
        .assert_code("api_key_invalid");
}

#[tokio::test]
async fn test_invalidate_unknown_id() {
    let app = TestApp::new().await;
    let admin = app.create_key("admin", scopes::ADMIN).await;

    let json: serde_json::Value = app
        .delete_with_key(&format!("/api/v1/api-keys/{}", uuid::Uuid::new_v4()), &admin.key)
        .await
        .assert_ok()
        .json();
    assert_eq!(json["outcome"], "not_found_or_inactive");
}

#[tokio::test]
async fn test_expired_key_is_unauthorized() {
    let app = TestApp::new().await;
    let created = app
        .state
        .api_keys
        .create(&access_guard::models::CreateApiKeyRequest {
            name: "old".to_string(),
            owner_type: Default::default(),
            owner_id: "alice".to_string(),
            scopes: vec!["keys:admin".to_string()],
            expires_at: Some(chrono::Utc::now() - chrono::Duration::hours(1)),
        })
        .await
        .unwrap();

    app.get_with_key("/api/v1/api-keys", &created.key)
        .await
        .assert_unauthorized()
        .assert_code("api_key_expired");
}

#[tokio::test]
async fn test_successful_use_updates_last_used() {
    let app = TestApp::new().await;
    let admin = app.create_key("admin", scopes::ADMIN).await;
    assert!(admin.api_key.last_used_at.is_none());

    app.get_with_key("/api/v1/api-keys", &admin.key).await.assert_ok();

    let record = app.state.api_keys.get(admin.api_key.id).await.unwrap().unwrap();
    assert!(record.last_used_at.is_some());
}

#[tokio::test]
async fn test_audit_endpoints_return_guard_records() {
    let app = TestApp::new().await;
    let auditor = app.create_key("auditor", scopes::AUDITOR).await;

    app.get("/api/v1/api-keys").await.assert_unauthorized();
    app.get_with_key("/api/v1/audit/traffic", &auditor.key)
        .await
        .assert_ok();
    app.flush_audit().await;

    let denied: Vec<serde_json::Value> = app
        .get_with_key("/api/v1/audit/access?decision=deny", &auditor.key)
        .await
        .assert_ok()
        .json();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0]["kind"], "access");
    assert_eq!(denied[0]["code"], "api_key_missing");
    assert_eq!(denied[0]["path"], "/api/v1/api-keys");
    assert_eq!(denied[0]["client"]["ip"], "127.0.0.1");

    let traffic: Vec<serde_json::Value> = app
        .get_with_key("/api/v1/audit/traffic?limit=1", &auditor.key)
        .await
        .assert_ok()
        .json();
    assert_eq!(traffic.len(), 1);
    assert_eq!(traffic[0]["kind"], "traffic");
    // Newest first: the traffic listing itself
    assert_eq!(traffic[0]["path"], "/api/v1/audit/traffic");
    assert_eq!(traffic[0]["status"], 200);
    assert_eq!(traffic[0]["headers"]["x-api-key"], "[REDACTED]");
}

#[tokio::test]
async fn test_audit_query_rejects_bad_parameters() {
    let app = TestApp::new().await;
    let auditor = app.create_key("auditor", scopes::AUDITOR).await;

    let response = app
        .request(
            Request::builder()
                .uri("/api/v1/audit/access?decision=maybe")
                .header("x-api-key", &auditor.key)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert!(response.status.is_client_error());
}
