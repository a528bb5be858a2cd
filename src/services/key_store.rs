//! API key store abstraction
//!
//! The store owns [`ApiKeyRecord`]s exclusively. Records are mutated only by
//! insert, deactivate and touch-last-used.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::ApiKeyRecord;

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert(&self, record: &ApiKeyRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<ApiKeyRecord>>;

    /// All records, newest first
    async fn list(&self) -> Result<Vec<ApiKeyRecord>>;

    async fn list_active(&self) -> Result<Vec<ApiKeyRecord>>;

    /// Mark a key inactive. Returns false when the id is unknown or the key
    /// was already inactive.
    async fn deactivate(&self, id: Uuid) -> Result<bool>;

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

/// In-process key store
#[derive(Default)]
pub struct MemoryKeyStore {
    records: RwLock<HashMap<Uuid, ApiKeyRecord>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyStore for MemoryKeyStore {
    async fn insert(&self, record: &ApiKeyRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            anyhow::bail!("API key {} already exists", record.id);
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ApiKeyRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<ApiKeyRecord>> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn list_active(&self) -> Result<Vec<ApiKeyRecord>> {
        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.is_active)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(record) if record.is_active => {
                record.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(record) = self.records.write().await.get_mut(&id) {
            record.last_used_at = Some(at);
        }
        Ok(())
    }
}
