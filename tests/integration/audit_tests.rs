//! Audit queue integration tests
//!
//! Exercise the queue against the SQLite sink and against failing sinks.

use std::sync::{atomic::Ordering, Arc};

use chrono::{Duration, Utc};

use access_guard::{
    config::AuditConfig,
    db::{self, SqliteAuditSink},
    models::{AccessDecision, AuditKind, AuditQuery, AuditRecord},
    services::{AuditQueue, AuditSink, MemoryAuditSink},
};

use crate::common::*;

async fn sqlite_queue(config: AuditConfig) -> (Arc<AuditQueue>, Arc<SqliteAuditSink>) {
    let pool = db::init_pool(&test_config().database)
        .await
        .expect("Failed to initialize test database");
    let sink = Arc::new(SqliteAuditSink::new(pool));
    let queue = Arc::new(AuditQueue::new(sink.clone(), config));
    (queue, sink)
}

#[tokio::test]
async fn test_queue_delivers_to_sqlite() {
    let (queue, sink) = sqlite_queue(AuditConfig {
        batch_size: 2,
        ..AuditConfig::default()
    })
    .await;

    let now = Utc::now();
    for i in 0..3 {
        queue.enqueue_traffic(traffic_entry("10.0.0.1", "/reports", now - Duration::seconds(i)));
    }
    queue.enqueue_access(access_entry("10.0.0.1", true, now));
    queue.enqueue_access(access_entry("10.0.0.2", false, now - Duration::seconds(5)));

    assert_eq!(queue.flush_all().await, 5);
    let stats = queue.stats();
    assert_eq!(stats.delivered, 5);
    assert_eq!(stats.traffic_queued + stats.access_queued, 0);

    let all = sink.query(&AuditQuery::default()).await.unwrap();
    assert_eq!(all.len(), 5);
    assert!(all
        .windows(2)
        .all(|pair| pair[0].created_at() >= pair[1].created_at()));

    let denied = sink
        .query(&AuditQuery {
            decision: Some(AccessDecision::Deny),
            ..AuditQuery::of_kind(AuditKind::Access)
        })
        .await
        .unwrap();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].client_ip(), "10.0.0.2");

    let page = sink
        .query(&AuditQuery {
            limit: Some(2),
            offset: Some(1),
            ..AuditQuery::of_kind(AuditKind::Traffic)
        })
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].created_at().timestamp(), (now - Duration::seconds(1)).timestamp());
}

#[tokio::test]
async fn test_retention_sweep_against_sqlite() {
    let (queue, sink) = sqlite_queue(AuditConfig {
        traffic_retention_days: 90,
        ..AuditConfig::default()
    })
    .await;

    let now = Utc::now();
    queue.enqueue_traffic(traffic_entry("10.0.0.1", "/old", now - Duration::days(91)));
    queue.enqueue_traffic(traffic_entry("10.0.0.1", "/recent", now - Duration::days(89)));
    queue.enqueue_access(access_entry("10.0.0.1", false, now - Duration::days(120)));
    queue.enqueue_access(access_entry("10.0.0.1", true, now));
    queue.flush_all().await;

    assert_eq!(queue.sweep_retention(now).await, 2);

    let remaining = sink.query(&AuditQuery::default()).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|r| r.created_at() > now - Duration::days(90)));
    assert!(remaining
        .iter()
        .any(|r| matches!(r, AuditRecord::Traffic(t) if t.path == "/recent")));

    // Second sweep finds nothing
    assert_eq!(queue.sweep_retention(now).await, 0);
}

#[tokio::test]
async fn test_failing_sink_does_not_affect_requests() {
    let sink = FlakyAuditSink::new(1);
    let sink_handle = sink.clone();
    let app = TestApp::with_builder(test_config(), move |builder| builder.audit_sink(sink)).await;

    app.get("/api/v1/api-keys").await.assert_unauthorized();
    app.flush_audit().await;

    // Traffic is delivered first and hits the failure; the access batch lands
    let queue = app.state.audit.as_ref().unwrap();
    let stats = queue.stats();
    assert_eq!(sink_handle.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.delivered, 1);

    app.get("/api/v1/api-keys").await.assert_unauthorized();
    app.flush_audit().await;
    assert_eq!(queue.stats().delivered, 3);
    assert_eq!(sink_handle.inner.len().await, 3);
}

#[tokio::test]
async fn test_workers_flush_on_shutdown() {
    let sink = Arc::new(MemoryAuditSink::new());
    let queue = Arc::new(AuditQueue::new(
        sink.clone(),
        AuditConfig {
            flush_interval_secs: 3600,
            ..AuditConfig::default()
        },
    ));

    let workers = queue.start();
    queue.enqueue_traffic(traffic_entry("10.0.0.1", "/reports", Utc::now()));
    queue.enqueue_access(access_entry("10.0.0.1", true, Utc::now()));
    assert_eq!(sink.len().await, 0);

    workers.shutdown().await;
    assert_eq!(sink.len().await, 2);
    assert_eq!(queue.stats().delivered, 2);
}

#[tokio::test]
async fn test_guarded_request_is_audited() {
    let app = TestApp::new().await;
    let admin = app.create_key("admin", scopes::ADMIN).await;

    app.get_with_key("/api/v1/api-keys", &admin.key)
        .await
        .assert_ok();
    app.flush_audit().await;

    let sink = &app.state.audit_sink;
    let access = sink
        .query(&AuditQuery::of_kind(AuditKind::Access))
        .await
        .unwrap();
    assert_eq!(access.len(), 1);
    match &access[0] {
        AuditRecord::Access(entry) => {
            assert_eq!(entry.decision, AccessDecision::Allow);
            assert_eq!(entry.api_key_id, Some(admin.api_key.id));
            assert_eq!(entry.user_id.as_deref(), Some("admin-owner"));
            assert_eq!(entry.route.as_deref(), Some("api-keys"));
            assert_eq!(entry.strategy, "default");
            assert_eq!(entry.path, "/api/v1/api-keys");
        }
        other => panic!("unexpected record: {:?}", other),
    }

    let traffic = sink
        .query(&AuditQuery::of_kind(AuditKind::Traffic))
        .await
        .unwrap();
    assert_eq!(traffic.len(), 1);
    match &traffic[0] {
        AuditRecord::Traffic(entry) => {
            assert_eq!(entry.status, 200);
            assert_eq!(entry.method, "GET");
            assert_eq!(entry.path, "/api/v1/api-keys");
            assert_eq!(entry.api_key_id, Some(admin.api_key.id));
            assert_eq!(entry.headers.get("x-api-key").map(String::as_str), Some("[REDACTED]"));
            assert!(entry.response_size.is_some());
        }
        other => panic!("unexpected record: {:?}", other),
    }
}

#[tokio::test]
async fn test_nested_route_records_full_path() {
    let app = TestApp::new().await;
    let admin = app.create_key("admin", scopes::ADMIN).await;
    let victim = app.create_key("victim", scopes::AUDITOR).await;
    let uri = format!("/api/v1/api-keys/{}", victim.api_key.id);

    app.delete_with_key(&uri, &admin.key).await.assert_ok();
    app.flush_audit().await;

    let records = app
        .state
        .audit_sink
        .query(&AuditQuery::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        match record {
            AuditRecord::Access(entry) => assert_eq!(entry.path, uri),
            AuditRecord::Traffic(entry) => assert_eq!(entry.path, uri),
        }
    }
}
