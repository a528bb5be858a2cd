//! Audit sink abstraction
//!
//! Sinks persist batches handed over by the audit queue. Entries are
//! append-only; `purge_older_than` is the only removal path.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::{AuditQuery, AuditRecord};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, records: &[AuditRecord]) -> Result<()>;

    /// Newest first, paginated per the query
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>>;

    /// Delete entries created before `cutoff`, returning how many were removed
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[derive(Default)]
pub struct MemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Snapshot of everything stored, in append order
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, records: &[AuditRecord]) -> Result<()> {
        self.records.write().await.extend_from_slice(records);
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let limit = query.limit.unwrap_or(AuditQuery::DEFAULT_LIMIT) as usize;
        let offset = query.offset.unwrap_or(0) as usize;

        let mut matched: Vec<AuditRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        matched.sort_by_key(|r| std::cmp::Reverse(r.created_at()));

        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.created_at() >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
