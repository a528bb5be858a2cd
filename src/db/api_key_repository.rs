//! API key repository

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{format_db_timestamp, parse_db_timestamp, DbPool};
use crate::models::ApiKeyRecord;
use crate::services::key_store::ApiKeyStore;

#[derive(Debug, sqlx::FromRow)]
struct ApiKeyRow {
    id: String,
    name: String,
    key_hash: String,
    owner_type: String,
    owner_id: String,
    scopes: String,
    is_active: bool,
    created_at: String,
    expires_at: Option<String>,
    last_used_at: Option<String>,
}

const SELECT_COLUMNS: &str = "SELECT id, name, key_hash, owner_type, owner_id, scopes, is_active, created_at, expires_at, last_used_at FROM api_keys";

/// [`ApiKeyStore`] backed by the `api_keys` table
#[derive(Clone)]
pub struct SqliteKeyStore {
    pool: DbPool,
}

impl SqliteKeyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: ApiKeyRow) -> Result<ApiKeyRecord> {
        let scopes: BTreeSet<String> =
            serde_json::from_str(&row.scopes).context("Invalid api key scopes")?;

        Ok(ApiKeyRecord {
            id: Uuid::parse_str(&row.id).context("Invalid api key id")?,
            name: row.name,
            hashed_key: row.key_hash,
            owner_type: row
                .owner_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            owner_id: row.owner_id,
            scopes,
            is_active: row.is_active,
            created_at: parse_db_timestamp(&row.created_at),
            expires_at: row.expires_at.as_deref().map(parse_db_timestamp),
            last_used_at: row.last_used_at.as_deref().map(parse_db_timestamp),
        })
    }

    async fn fetch_all(&self, sql: &str) -> Result<Vec<ApiKeyRecord>> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(sql)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list api keys")?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}

#[async_trait]
impl ApiKeyStore for SqliteKeyStore {
    async fn insert(&self, record: &ApiKeyRecord) -> Result<()> {
        let scopes = serde_json::to_string(&record.scopes)?;

        sqlx::query(
            r#"
            INSERT INTO api_keys (id, name, key_hash, owner_type, owner_id, scopes, is_active, created_at, expires_at, last_used_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.name)
        .bind(&record.hashed_key)
        .bind(record.owner_type.to_string())
        .bind(&record.owner_id)
        .bind(scopes)
        .bind(record.is_active)
        .bind(format_db_timestamp(record.created_at))
        .bind(record.expires_at.map(format_db_timestamp))
        .bind(record.last_used_at.map(format_db_timestamp))
        .execute(&self.pool)
        .await
        .context("Failed to create api key")?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ApiKeyRecord>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get api key")?;

        row.map(Self::row_to_record).transpose()
    }

    async fn list(&self) -> Result<Vec<ApiKeyRecord>> {
        self.fetch_all(&format!("{} ORDER BY created_at DESC", SELECT_COLUMNS))
            .await
    }

    async fn list_active(&self) -> Result<Vec<ApiKeyRecord>> {
        self.fetch_all(&format!(
            "{} WHERE is_active = 1 ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .await
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE api_keys SET is_active = 0 WHERE id = ? AND is_active = 1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to deactivate api key")?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(format_db_timestamp(at))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update api key last use")?;

        Ok(())
    }
}
