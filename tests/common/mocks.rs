//! Mock stores and sinks for testing
//!
//! Let tests simulate storage outages without a broken database.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use access_guard::{
    models::{ApiKeyRecord, AuditQuery, AuditRecord},
    services::{ApiKeyStore, AuditSink, MemoryAuditSink, MemoryKeyStore},
};

/// Key store that can be switched into a failing mode
#[derive(Default)]
pub struct MockKeyStore {
    inner: MemoryKeyStore,
    /// Simulate errors when set
    pub error_mode: AtomicBool,
}

impl MockKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_error_mode(&self, enabled: bool) {
        self.error_mode.store(enabled, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.error_mode.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStore for MockKeyStore {
    async fn insert(&self, record: &ApiKeyRecord) -> Result<()> {
        self.check()?;
        self.inner.insert(record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<ApiKeyRecord>> {
        self.check()?;
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<ApiKeyRecord>> {
        self.check()?;
        self.inner.list().await
    }

    async fn list_active(&self) -> Result<Vec<ApiKeyRecord>> {
        self.check()?;
        self.inner.list_active().await
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        self.check()?;
        self.inner.deactivate(id).await
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.check()?;
        self.inner.touch_last_used(id, at).await
    }
}

/// Audit sink whose first `failures` appends are rejected
pub struct FlakyAuditSink {
    pub inner: MemoryAuditSink,
    failures: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl FlakyAuditSink {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryAuditSink::new(),
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AuditSink for FlakyAuditSink {
    async fn append(&self, records: &[AuditRecord]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            bail!("disk full");
        }
        self.inner.append(records).await
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        self.inner.query(query).await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.inner.purge_older_than(cutoff).await
    }
}
