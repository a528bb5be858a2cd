//! Asynchronous audit logging
//!
//! Traffic and access entries are buffered in two bounded in-memory queues
//! and delivered to an [`AuditSink`] in batches:
//! - on every tick of the flush task
//! - immediately, when a queue reaches its high-water mark
//! - on shutdown, after in-flight deliveries have finished
//!
//! A separate retention task purges entries older than the configured window.
//! Enqueueing never waits on I/O and sink failures never reach callers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::AuditConfig;
use crate::models::{AccessEventEntry, AuditKind, AuditRecord, TrafficLogEntry};
use crate::services::audit_sink::AuditSink;

struct LogQueue {
    kind: AuditKind,
    entries: Mutex<VecDeque<AuditRecord>>,
    high_water: usize,
    dropped: AtomicU64,
}

impl LogQueue {
    fn new(kind: AuditKind, high_water: usize) -> Self {
        Self {
            kind,
            entries: Mutex::new(VecDeque::new()),
            high_water,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditRecord>> {
        // Pushes and drains cannot leave the deque half-updated
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_batch(&self, batch_size: usize) -> Vec<AuditRecord> {
        let mut entries = self.lock();
        let n = entries.len().min(batch_size);
        entries.drain(..n).collect()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[derive(Default)]
struct DeliveryCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time queue statistics
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuditQueueStats {
    pub traffic_queued: usize,
    pub access_queued: usize,
    pub traffic_dropped: u64,
    pub access_dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

pub struct AuditQueue {
    sink: Arc<dyn AuditSink>,
    config: AuditConfig,
    traffic: LogQueue,
    access: LogQueue,
    counters: Arc<DeliveryCounters>,
    /// High-water deliveries running outside the flush task
    deliveries: TaskTracker,
}

impl AuditQueue {
    pub fn new(sink: Arc<dyn AuditSink>, config: AuditConfig) -> Self {
        Self {
            traffic: LogQueue::new(AuditKind::Traffic, config.traffic_high_water),
            access: LogQueue::new(AuditKind::Access, config.access_high_water),
            sink,
            config,
            counters: Arc::new(DeliveryCounters::default()),
            deliveries: TaskTracker::new(),
        }
    }

    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }

    pub fn enqueue_traffic(&self, entry: TrafficLogEntry) {
        self.push(&self.traffic, AuditRecord::Traffic(entry));
    }

    pub fn enqueue_access(&self, entry: AccessEventEntry) {
        self.push(&self.access, AuditRecord::Access(entry));
    }

    fn push(&self, queue: &LogQueue, record: AuditRecord) {
        let (batch, handle) = {
            let mut entries = queue.lock();
            if entries.len() >= self.config.queue_capacity {
                drop(entries);
                let dropped = queue.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    kind = ?queue.kind,
                    capacity = self.config.queue_capacity,
                    dropped = dropped,
                    "Audit queue full, dropping entry"
                );
                return;
            }
            entries.push_back(record);

            if entries.len() < queue.high_water {
                return;
            }
            // Without a runtime the entries wait for the next explicit flush
            let Ok(handle) = Handle::try_current() else {
                return;
            };
            let n = entries.len().min(self.config.batch_size);
            (entries.drain(..n).collect::<Vec<_>>(), handle)
        };

        debug!(kind = ?queue.kind, count = batch.len(), "Audit queue reached high-water mark");
        let sink = self.sink.clone();
        let counters = self.counters.clone();
        self.deliveries.spawn_on(
            async move {
                deliver(sink.as_ref(), &counters, batch).await;
            },
            &handle,
        );
    }

    /// Deliver at most one batch from each queue. Returns the number of
    /// entries handed to the sink.
    pub async fn flush(&self) -> usize {
        let mut total = 0;
        for queue in [&self.traffic, &self.access] {
            let batch = queue.take_batch(self.config.batch_size);
            if batch.is_empty() {
                continue;
            }
            total += batch.len();
            deliver(self.sink.as_ref(), &self.counters, batch).await;
        }
        total
    }

    /// Drain what both queues hold on entry. Entries enqueued meanwhile are
    /// left for the next flush.
    pub async fn flush_all(&self) -> usize {
        let mut budget = self.traffic.len() + self.access.len();
        let mut total = 0;
        while budget > 0 {
            let count = self.flush().await;
            if count == 0 {
                break;
            }
            total += count;
            budget = budget.saturating_sub(count);
        }
        total
    }

    /// Purge entries older than the retention window, relative to `now`.
    /// Returns the number of purged entries; 0 when retention is disabled or
    /// the sink failed.
    pub async fn sweep_retention(&self, now: DateTime<Utc>) -> u64 {
        if !self.config.retention_enabled() {
            return 0;
        }
        let days = self.config.traffic_retention_days;
        let Some(cutoff) = chrono::Duration::try_days(days).and_then(|w| now.checked_sub_signed(w))
        else {
            error!(retention_days = days, "Audit retention window out of range, skipping sweep");
            return 0;
        };
        match self.sink.purge_older_than(cutoff).await {
            Ok(count) => {
                info!(count = count, cutoff = %cutoff, "Audit retention sweep completed");
                count
            }
            Err(e) => {
                error!(error = %e, "Audit retention sweep failed");
                0
            }
        }
    }

    pub fn stats(&self) -> AuditQueueStats {
        AuditQueueStats {
            traffic_queued: self.traffic.len(),
            access_queued: self.access.len(),
            traffic_dropped: self.traffic.dropped.load(Ordering::Relaxed),
            access_dropped: self.access.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Spawn the flush and retention tasks
    pub fn start(self: &Arc<Self>) -> AuditWorkers {
        let token = CancellationToken::new();
        let mut handles = vec![tokio::spawn(flush_task(self.clone(), token.clone()))];

        if self.config.retention_enabled() {
            handles.push(tokio::spawn(retention_task(self.clone(), token.clone())));
        } else {
            info!("Audit retention disabled");
        }

        info!(
            flush_interval_secs = self.config.flush_interval_secs,
            retention_days = self.config.traffic_retention_days,
            "Audit workers started"
        );

        AuditWorkers {
            queue: self.clone(),
            token,
            handles,
        }
    }
}

async fn deliver(sink: &dyn AuditSink, counters: &DeliveryCounters, batch: Vec<AuditRecord>) {
    let count = batch.len() as u64;
    match sink.append(&batch).await {
        Ok(()) => {
            counters.delivered.fetch_add(count, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(count, Ordering::Relaxed);
            error!(error = %e, count = count, "Failed to write audit batch");
        }
    }
}

async fn flush_task(queue: Arc<AuditQueue>, token: CancellationToken) {
    let mut ticker = interval(Duration::from_secs(queue.config.flush_interval_secs));
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let count = queue.flush().await;
                if count > 0 {
                    debug!(count = count, "Flushed audit entries");
                }
            }
        }
    }
    debug!("Audit flush task stopping");
}

async fn retention_task(queue: Arc<AuditQueue>, token: CancellationToken) {
    let initial_delay = Duration::from_secs(queue.config.retention_initial_delay_secs);
    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(initial_delay) => {}
    }

    let mut ticker = interval(Duration::from_secs(queue.config.retention_interval_secs));
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                queue.sweep_retention(Utc::now()).await;
            }
        }
    }
    debug!("Audit retention task stopping");
}

/// Handle to the running background tasks
pub struct AuditWorkers {
    queue: Arc<AuditQueue>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl AuditWorkers {
    /// Stop the tasks, wait for them and for in-flight deliveries, then
    /// flush whatever is still queued
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Audit worker terminated abnormally");
            }
        }

        self.queue.deliveries.close();
        if !self.queue.deliveries.is_empty() {
            debug!(
                count = self.queue.deliveries.len(),
                "Waiting for in-flight audit deliveries"
            );
        }
        self.queue.deliveries.wait().await;

        let remaining = self.queue.flush_all().await;
        info!(count = remaining, "Audit workers stopped");
    }
}
