//! Guard middleware integration tests
//!
//! Mounts extra guarded routes next to the management API and checks the
//! decisions the middleware turns into responses.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::get,
    Extension, Router,
};
use rstest::rstest;

use access_guard::{
    guarded,
    models::{
        AccessEventEntry, AccessRuleOptions, Decision, KeyStrategyConfig, RouteAccess,
        StaticKeyConfig, TrafficLogEntry,
    },
    services::{
        predicate_fn, strategy_fn, AccessEventHook, GuardHooks, Identity, TrafficLogHook,
        ValidationContext,
    },
    AppState,
};

use crate::common::*;

async fn whoami(Extension(identity): Extension<Identity>) -> String {
    identity
        .api_key_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Mount `/reports` behind the given route rules
fn with_reports(app: TestApp, access: RouteAccess) -> TestApp {
    let state: AppState = app.state.clone();
    let router = Router::new()
        .route("/reports", guarded(get(whoami), &state, access))
        .with_state(state);
    app.with_router(router)
}

fn get_reports() -> Request<Body> {
    Request::builder().uri("/reports").body(Body::empty()).unwrap()
}

fn get_reports_with(header: &str, value: &str) -> Request<Body> {
    Request::builder()
        .uri("/reports")
        .header(header, value)
        .body(Body::empty())
        .unwrap()
}

#[rstest]
#[case("10.1.2.3:5000", StatusCode::OK)]
#[case("10.255.255.254:5000", StatusCode::OK)]
#[case("192.168.1.1:5000", StatusCode::FORBIDDEN)]
#[case("[::1]:5000", StatusCode::FORBIDDEN)]
#[tokio::test]
async fn test_cidr_allow_list(#[case] peer: &str, #[case] expected: StatusCode) {
    let app = with_reports(
        TestApp::new().await,
        RouteAccess::new(AccessRuleOptions::default().allow(["10.0.0.0/8"])),
    );

    app.request_from(peer, get_reports()).await.assert_status(expected);
}

#[tokio::test]
async fn test_ip_not_allowed_code() {
    let app = with_reports(
        TestApp::new().await,
        RouteAccess::new(AccessRuleOptions::default().allow(["10.0.0.0/8"])),
    );

    app.request_from("192.168.1.1:5000", get_reports())
        .await
        .assert_forbidden()
        .assert_code("ip_not_allowed");
}

#[tokio::test]
async fn test_deny_wins_over_allow() {
    let app = with_reports(
        TestApp::new().await,
        RouteAccess::new(
            AccessRuleOptions::default()
                .allow(["10.0.0.0/8"])
                .deny(["10.0.0.5"]),
        ),
    );

    let response = app.request_from("10.0.0.5:5000", get_reports()).await;
    response.assert_forbidden().assert_code("ip_blacklisted");
    let json: serde_json::Value = response.json();
    assert_eq!(json["details"]["matchedPattern"], "10.0.0.5");

    app.request_from("10.0.0.6:5000", get_reports())
        .await
        .assert_ok();
}

#[tokio::test]
async fn test_forwarded_for_needs_trust_proxy() {
    let access = RouteAccess::new(AccessRuleOptions::default().allow(["10.0.0.0/8"]));

    let untrusted = with_reports(TestApp::new().await, access.clone());
    untrusted
        .request(get_reports_with("x-forwarded-for", "10.0.0.7, 172.16.0.1"))
        .await
        .assert_forbidden();

    let mut config = test_config();
    config.guard.trust_proxy = true;
    let trusted = with_reports(TestApp::with_config(config).await, access);
    trusted
        .request(get_reports_with("x-forwarded-for", "10.0.0.7, 172.16.0.1"))
        .await
        .assert_ok();
    trusted
        .request(get_reports_with("x-real-ip", "10.9.9.9"))
        .await
        .assert_ok();
    // Garbage falls back to the socket peer
    trusted
        .request(get_reports_with("x-forwarded-for", "not-an-ip"))
        .await
        .assert_forbidden();
}

#[tokio::test]
async fn test_mac_rule_uses_client_mac_header() {
    let app = with_reports(
        TestApp::new().await,
        RouteAccess::new(AccessRuleOptions::default().allow(["mac:aa:bb:cc:dd:ee:ff"])),
    );

    app.request(get_reports_with("x-client-mac", "AA-BB-CC-DD-EE-FF"))
        .await
        .assert_ok();
    app.request(get_reports_with("x-client-mac", "aa:bb:cc:dd:ee:00"))
        .await
        .assert_forbidden();
    app.request(get_reports()).await.assert_forbidden();
}

#[tokio::test]
async fn test_global_policy_applies_to_every_guarded_route() {
    let mut config = test_config();
    config.guard.global_policy = AccessRuleOptions::default().deny(["127.0.0.0/8"]);
    let app = with_reports(TestApp::with_config(config).await, RouteAccess::default());

    app.request(get_reports())
        .await
        .assert_forbidden()
        .assert_code("ip_blacklisted");
    app.request_from("10.0.0.1:5000", get_reports())
        .await
        .assert_ok();
}

#[tokio::test]
async fn test_skip_guard_route() {
    let mut config = test_config();
    config.guard.global_policy = AccessRuleOptions::default().deny(["*"]);
    let app = with_reports(
        TestApp::with_config(config).await,
        RouteAccess::new(AccessRuleOptions::default().skip_guard(true)),
    );

    app.request(get_reports()).await.assert_ok();
}

#[tokio::test]
async fn test_skip_global_guards_disables_checks() {
    let mut config = test_config();
    config.guard.skip_global_guards = true;
    let app = TestApp::with_config(config).await;

    app.get("/api/v1/api-keys").await.assert_ok();
}

#[tokio::test]
async fn test_static_key_strategy() {
    let access = RouteAccess::new(
        AccessRuleOptions::default()
            .require(require_key(&[]))
            .key_strategy(KeyStrategyConfig::Static(StaticKeyConfig {
                keys: vec!["Partner-Key".to_string()],
                case_sensitive: false,
                partial_match: false,
            })),
    );
    let app = with_reports(TestApp::new().await, access);

    let response = app.request(get_reports_with("x-api-key", "partner-key")).await;
    response.assert_ok();
    // Static keys have no stored record, so no identity
    assert_eq!(response.text(), "anonymous");

    app.request(get_reports_with("x-api-key", "other"))
        .await
        .assert_unauthorized()
        .assert_code("api_key_invalid");
}

#[tokio::test]
async fn test_static_key_cannot_satisfy_scopes() {
    let access = RouteAccess::new(
        AccessRuleOptions::default()
            .require(require_key(&["read"]))
            .key_strategy(KeyStrategyConfig::Static(StaticKeyConfig {
                keys: vec!["k1".to_string()],
                ..Default::default()
            })),
    );
    let app = with_reports(TestApp::new().await, access);

    app.request(get_reports_with("x-api-key", "k1"))
        .await
        .assert_forbidden()
        .assert_code("scope_missing");
}

#[tokio::test]
async fn test_function_key_strategy() {
    let app = TestApp::with_builder(test_config(), |builder| {
        builder
            .predicate(
                "partner-check",
                predicate_fn(|key| Ok(key.starts_with("partner-"))),
            )
            .predicate(
                "broken",
                predicate_fn(|_| Err(anyhow::anyhow!("upstream unavailable"))),
            )
    })
    .await;

    let app = with_reports(
        app,
        RouteAccess::new(
            AccessRuleOptions::default()
                .require(require_key(&[]))
                .key_strategy(KeyStrategyConfig::Function {
                    name: "partner-check".to_string(),
                }),
        ),
    );
    app.request(get_reports_with("x-api-key", "partner-42"))
        .await
        .assert_ok();
    app.request(get_reports_with("x-api-key", "someone-else"))
        .await
        .assert_unauthorized();

    let broken = with_reports(
        app,
        RouteAccess::new(
            AccessRuleOptions::default()
                .require(require_key(&[]))
                .key_strategy(KeyStrategyConfig::Function {
                    name: "broken".to_string(),
                }),
        ),
    );
    broken
        .request(get_reports_with("x-api-key", "partner-42"))
        .await
        .assert_forbidden()
        .assert_code("key_validation_failed");
}

#[tokio::test]
async fn test_store_outage_fails_closed() {
    let store = Arc::new(MockKeyStore::new());
    let store_handle = store.clone();
    let app = TestApp::with_builder(test_config(), move |builder| builder.key_store(store)).await;

    let created = app.create_key("admin", scopes::ADMIN).await;
    app.get_with_key("/api/v1/api-keys", &created.key)
        .await
        .assert_ok();

    store_handle.set_error_mode(true);
    app.get_with_key("/api/v1/api-keys", &created.key)
        .await
        .assert_forbidden()
        .assert_code("key_validation_failed");
}

#[tokio::test]
async fn test_route_strategy_and_fallback() {
    let app = TestApp::with_builder(test_config(), |builder| {
        builder.strategy(strategy_fn("business-hours", |ctx| {
            if ctx.method == "GET" {
                Decision::deny_with_reason("closed for maintenance")
            } else {
                Decision::allow()
            }
        }))
    })
    .await;

    let custom = with_reports(
        app,
        RouteAccess::default().with_strategy("business-hours"),
    );
    let response = custom.request(get_reports()).await;
    response.assert_forbidden().assert_code("custom");
    let json: serde_json::Value = response.json();
    assert_eq!(json["message"], "closed for maintenance");

    // Unknown names fall back to the default strategy
    let fallback = with_reports(custom, RouteAccess::default().with_strategy("nope"));
    fallback.request(get_reports()).await.assert_ok();
}

#[tokio::test]
async fn test_panicking_strategy_is_denied() {
    let app = TestApp::with_builder(test_config(), |builder| {
        builder.strategy(strategy_fn("explodes", |_| panic!("strategy bug")))
    })
    .await;
    let app = with_reports(app, RouteAccess::default().with_strategy("explodes"));

    app.request(get_reports())
        .await
        .assert_forbidden()
        .assert_code("evaluation_failed");
}

#[tokio::test]
async fn test_identity_reaches_handler() {
    let app = TestApp::new().await;
    let created = app.create_key("reporter", &["reports:read"]).await;
    let app = with_reports(
        app,
        RouteAccess::new(AccessRuleOptions::default().require(require_key(&["reports:read"]))),
    );

    let response = app
        .request(get_reports_with("x-api-key", &created.key))
        .await;
    response.assert_ok();
    assert_eq!(response.text(), created.api_key.id.to_string());
}

#[tokio::test]
async fn test_hooks_observe_decisions_and_traffic() {
    let access_events = Arc::new(AtomicUsize::new(0));
    let traffic_events = Arc::new(AtomicUsize::new(0));

    let counter = access_events.clone();
    let on_access_event: AccessEventHook = Arc::new(move |_: &AccessEventEntry| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = traffic_events.clone();
    let on_traffic_log: TrafficLogHook = Arc::new(move |entry: &TrafficLogEntry| {
        if entry.status == 403 {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let hooks = GuardHooks {
        identify: None,
        on_access_event: Some(on_access_event),
        on_traffic_log: Some(on_traffic_log),
    };

    let app = TestApp::with_builder(test_config(), |builder| builder.hooks(hooks)).await;
    let app = with_reports(
        app,
        RouteAccess::new(AccessRuleOptions::default().deny(["127.0.0.1"])),
    );

    app.request(get_reports()).await.assert_forbidden();
    assert_eq!(access_events.load(Ordering::SeqCst), 1);
    assert_eq!(traffic_events.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_custom_identity_resolver() {
    let hooks = GuardHooks {
        identify: Some(Arc::new(|ctx: &ValidationContext| Identity {
            user_id: Some(format!("user@{}", ctx.client.ip)),
            ..Identity::default()
        })),
        ..GuardHooks::default()
    };

    let app = TestApp::with_builder(test_config(), |builder| builder.hooks(hooks)).await;
    let state = app.state.clone();
    let router = Router::new()
        .route(
            "/me",
            guarded(
                get(|Extension(identity): Extension<Identity>| async move {
                    identity.user_id.unwrap_or_default()
                }),
                &state,
                RouteAccess::default(),
            ),
        )
        .with_state(state);
    let app = app.with_router(router);

    let response = app
        .request(Request::builder().uri("/me").body(Body::empty()).unwrap())
        .await;
    response.assert_ok();
    assert_eq!(response.text(), "user@127.0.0.1");
}
