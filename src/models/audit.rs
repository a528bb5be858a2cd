//! Audit log models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ClientInfo;

/// One served request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrafficLogEntry {
    pub id: Uuid,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
    pub client: ClientInfo,
    pub api_key_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub service_id: Option<String>,
    /// Request headers with credentials redacted
    pub headers: BTreeMap<String, String>,
    pub response_size: Option<u64>,
    pub route: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessDecision {
    Allow,
    Deny,
}

impl AccessDecision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            AccessDecision::Allow
        } else {
            AccessDecision::Deny
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessDecision::Allow => "allow",
            AccessDecision::Deny => "deny",
        }
    }
}

impl std::str::FromStr for AccessDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(AccessDecision::Allow),
            "deny" => Ok(AccessDecision::Deny),
            _ => Err(format!("Invalid access decision: {}", s)),
        }
    }
}

/// One access decision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessEventEntry {
    pub id: Uuid,
    pub decision: AccessDecision,
    pub reason: Option<String>,
    pub code: Option<String>,
    pub strategy: String,
    pub client: ClientInfo,
    pub api_key_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub service_id: Option<String>,
    pub method: String,
    pub path: String,
    pub route: Option<String>,
    /// Decision metadata (matched pattern, missing scopes, ...)
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditKind {
    Traffic,
    Access,
}

/// Anything the audit queue delivers to a sink
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AuditRecord {
    Traffic(TrafficLogEntry),
    Access(AccessEventEntry),
}

impl AuditRecord {
    pub fn kind(&self) -> AuditKind {
        match self {
            AuditRecord::Traffic(_) => AuditKind::Traffic,
            AuditRecord::Access(_) => AuditKind::Access,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            AuditRecord::Traffic(entry) => entry.created_at,
            AuditRecord::Access(entry) => entry.created_at,
        }
    }

    pub fn client_ip(&self) -> &str {
        match self {
            AuditRecord::Traffic(entry) => &entry.client.ip,
            AuditRecord::Access(entry) => &entry.client.ip,
        }
    }

    pub fn api_key_id(&self) -> Option<Uuid> {
        match self {
            AuditRecord::Traffic(entry) => entry.api_key_id,
            AuditRecord::Access(entry) => entry.api_key_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditQuery {
    pub kind: Option<AuditKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub client_ip: Option<String>,
    pub api_key_id: Option<Uuid>,
    /// Only meaningful for access entries
    pub decision: Option<AccessDecision>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: u32 = 100;

    pub fn of_kind(kind: AuditKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// In-memory filter used by sinks without a query language
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if self.kind.is_some_and(|kind| kind != record.kind()) {
            return false;
        }
        let created_at = record.created_at();
        if self.since.is_some_and(|since| created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| created_at > until) {
            return false;
        }
        if self
            .client_ip
            .as_deref()
            .is_some_and(|ip| ip != record.client_ip())
        {
            return false;
        }
        if self.api_key_id.is_some() && self.api_key_id != record.api_key_id() {
            return false;
        }
        if let Some(decision) = self.decision {
            match record {
                AuditRecord::Access(entry) if entry.decision == decision => {}
                _ => return false,
            }
        }
        true
    }
}
