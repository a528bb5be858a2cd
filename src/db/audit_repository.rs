//! Audit log repository

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use crate::db::{format_db_timestamp, parse_db_timestamp, DbPool};
use crate::models::{
    AccessEventEntry, AuditKind, AuditQuery, AuditRecord, ClientInfo, TrafficLogEntry,
};
use crate::services::audit_sink::AuditSink;

#[derive(Debug, sqlx::FromRow)]
struct TrafficRow {
    id: String,
    method: String,
    path: String,
    status: i64,
    duration_ms: i64,
    client_ip: String,
    client_mac: Option<String>,
    api_key_id: Option<String>,
    user_id: Option<String>,
    service_id: Option<String>,
    headers: String,
    response_size: Option<i64>,
    route: Option<String>,
    created_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct AccessRow {
    id: String,
    decision: String,
    reason: Option<String>,
    code: Option<String>,
    strategy: String,
    client_ip: String,
    client_mac: Option<String>,
    api_key_id: Option<String>,
    user_id: Option<String>,
    service_id: Option<String>,
    method: String,
    path: String,
    route: Option<String>,
    metadata: String,
    created_at: String,
}

/// [`AuditSink`] backed by the `traffic_log` and `access_log` tables
#[derive(Clone)]
pub struct SqliteAuditSink {
    pool: DbPool,
}

impl SqliteAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert_traffic(tx: &mut Transaction<'_, Sqlite>, entry: &TrafficLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO traffic_log (id, method, path, status, duration_ms, client_ip, ip_version, client_mac,
                                     api_key_id, user_id, service_id, headers, response_size, route, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(entry.status as i64)
        .bind(entry.duration_ms as i64)
        .bind(&entry.client.ip)
        .bind(entry.client.ip_version.map(|v| v.to_string()))
        .bind(entry.client.mac.as_deref())
        .bind(entry.api_key_id.map(|id| id.to_string()))
        .bind(entry.user_id.as_deref())
        .bind(entry.service_id.as_deref())
        .bind(serde_json::to_string(&entry.headers)?)
        .bind(entry.response_size.map(|s| s as i64))
        .bind(entry.route.as_deref())
        .bind(format_db_timestamp(entry.created_at))
        .execute(&mut **tx)
        .await
        .context("Failed to insert traffic log entry")?;
        Ok(())
    }

    async fn insert_access(tx: &mut Transaction<'_, Sqlite>, entry: &AccessEventEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO access_log (id, decision, reason, code, strategy, client_ip, ip_version, client_mac,
                                    api_key_id, user_id, service_id, method, path, route, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.decision.as_str())
        .bind(entry.reason.as_deref())
        .bind(entry.code.as_deref())
        .bind(&entry.strategy)
        .bind(&entry.client.ip)
        .bind(entry.client.ip_version.map(|v| v.to_string()))
        .bind(entry.client.mac.as_deref())
        .bind(entry.api_key_id.map(|id| id.to_string()))
        .bind(entry.user_id.as_deref())
        .bind(entry.service_id.as_deref())
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(entry.route.as_deref())
        .bind(entry.metadata.to_string())
        .bind(format_db_timestamp(entry.created_at))
        .execute(&mut **tx)
        .await
        .context("Failed to insert access log entry")?;
        Ok(())
    }

    /// Shared WHERE clause; `decision` only exists on the access table
    fn where_clause(query: &AuditQuery, with_decision: bool) -> String {
        let mut sql = String::from(" WHERE 1 = 1");
        if query.since.is_some() {
            sql.push_str(" AND created_at >= ?");
        }
        if query.until.is_some() {
            sql.push_str(" AND created_at <= ?");
        }
        if query.client_ip.is_some() {
            sql.push_str(" AND client_ip = ?");
        }
        if query.api_key_id.is_some() {
            sql.push_str(" AND api_key_id = ?");
        }
        if with_decision && query.decision.is_some() {
            sql.push_str(" AND decision = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");
        sql
    }

    async fn query_traffic(&self, query: &AuditQuery, fetch: i64) -> Result<Vec<AuditRecord>> {
        let sql = format!(
            "SELECT id, method, path, status, duration_ms, client_ip, client_mac, api_key_id, user_id, service_id, headers, response_size, route, created_at FROM traffic_log{}",
            Self::where_clause(query, false)
        );

        let mut q = sqlx::query_as::<_, TrafficRow>(&sql);
        if let Some(since) = query.since {
            q = q.bind(format_db_timestamp(since));
        }
        if let Some(until) = query.until {
            q = q.bind(format_db_timestamp(until));
        }
        if let Some(ref ip) = query.client_ip {
            q = q.bind(ip);
        }
        if let Some(key_id) = query.api_key_id {
            q = q.bind(key_id.to_string());
        }
        let rows = q
            .bind(fetch)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query traffic log")?;

        rows.into_iter()
            .map(|row| row_to_traffic(row).map(AuditRecord::Traffic))
            .collect()
    }

    async fn query_access(&self, query: &AuditQuery, fetch: i64) -> Result<Vec<AuditRecord>> {
        let sql = format!(
            "SELECT id, decision, reason, code, strategy, client_ip, client_mac, api_key_id, user_id, service_id, method, path, route, metadata, created_at FROM access_log{}",
            Self::where_clause(query, true)
        );

        let mut q = sqlx::query_as::<_, AccessRow>(&sql);
        if let Some(since) = query.since {
            q = q.bind(format_db_timestamp(since));
        }
        if let Some(until) = query.until {
            q = q.bind(format_db_timestamp(until));
        }
        if let Some(ref ip) = query.client_ip {
            q = q.bind(ip);
        }
        if let Some(key_id) = query.api_key_id {
            q = q.bind(key_id.to_string());
        }
        if let Some(decision) = query.decision {
            q = q.bind(decision.as_str());
        }
        let rows = q
            .bind(fetch)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query access log")?;

        rows.into_iter()
            .map(|row| row_to_access(row).map(AuditRecord::Access))
            .collect()
    }
}

fn client_from_row(ip: String, mac: Option<String>) -> ClientInfo {
    ClientInfo::from_raw(&ip, mac.as_deref())
}

fn parse_optional_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value
        .map(|s| Uuid::parse_str(&s).context("Invalid api key id"))
        .transpose()
}

fn row_to_traffic(row: TrafficRow) -> Result<TrafficLogEntry> {
    let headers: BTreeMap<String, String> =
        serde_json::from_str(&row.headers).context("Invalid traffic log headers")?;
    Ok(TrafficLogEntry {
        id: Uuid::parse_str(&row.id).context("Invalid traffic log id")?,
        method: row.method,
        path: row.path,
        status: row.status as u16,
        duration_ms: row.duration_ms as u64,
        client: client_from_row(row.client_ip, row.client_mac),
        api_key_id: parse_optional_uuid(row.api_key_id)?,
        user_id: row.user_id,
        service_id: row.service_id,
        headers,
        response_size: row.response_size.map(|s| s as u64),
        route: row.route,
        created_at: parse_db_timestamp(&row.created_at),
    })
}

fn row_to_access(row: AccessRow) -> Result<AccessEventEntry> {
    Ok(AccessEventEntry {
        id: Uuid::parse_str(&row.id).context("Invalid access log id")?,
        decision: row.decision.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        reason: row.reason,
        code: row.code,
        strategy: row.strategy,
        client: client_from_row(row.client_ip, row.client_mac),
        api_key_id: parse_optional_uuid(row.api_key_id)?,
        user_id: row.user_id,
        service_id: row.service_id,
        method: row.method,
        path: row.path,
        route: row.route,
        metadata: serde_json::from_str(&row.metadata).context("Invalid access log metadata")?,
        created_at: parse_db_timestamp(&row.created_at),
    })
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn append(&self, records: &[AuditRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin audit transaction")?;

        for record in records {
            match record {
                AuditRecord::Traffic(entry) => Self::insert_traffic(&mut tx, entry).await?,
                AuditRecord::Access(entry) => Self::insert_access(&mut tx, entry).await?,
            }
        }

        tx.commit().await.context("Failed to commit audit batch")?;
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let limit = query.limit.unwrap_or(AuditQuery::DEFAULT_LIMIT) as usize;
        let offset = query.offset.unwrap_or(0) as usize;
        // Each table supplies enough rows to cover the requested page
        let fetch = (limit + offset) as i64;

        let mut records = Vec::new();
        if query.kind != Some(AuditKind::Access) && query.decision.is_none() {
            records.extend(self.query_traffic(query, fetch).await?);
        }
        if query.kind != Some(AuditKind::Traffic) {
            records.extend(self.query_access(query, fetch).await?);
        }

        records.sort_by_key(|r| std::cmp::Reverse(r.created_at()));
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff = format_db_timestamp(cutoff);
        let mut purged = 0;
        for table in ["traffic_log", "access_log"] {
            let result = sqlx::query(&format!("DELETE FROM {} WHERE created_at < ?", table))
                .bind(&cutoff)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to purge {}", table))?;
            purged += result.rows_affected();
        }
        Ok(purged)
    }
}
