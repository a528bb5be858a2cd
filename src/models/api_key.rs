//! API key models

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Kind of principal owning a key
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    #[default]
    User,
    Service,
}

impl std::fmt::Display for OwnerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerType::User => write!(f, "user"),
            OwnerType::Service => write!(f, "service"),
        }
    }
}

impl std::str::FromStr for OwnerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(OwnerType::User),
            "service" => Ok(OwnerType::Service),
            _ => Err(format!("Invalid owner type: {}", s)),
        }
    }
}

/// A persisted API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub name: String,
    /// Argon2 PHC string; never leaves the process
    #[serde(skip_serializing, default)]
    pub hashed_key: String,
    pub owner_type: OwnerType,
    pub owner_id: String,
    pub scopes: BTreeSet<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Required scopes not granted by this key, in request order
    pub fn missing_scopes<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|scope| !self.scopes.contains(scope.as_str()))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    pub owner_type: OwnerType,
    #[validate(length(min = 1))]
    pub owner_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Optional expiry (RFC3339 timestamp)
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateApiKeyResponse {
    #[serde(flatten)]
    pub api_key: ApiKeyRecord,
    /// Plaintext API key (only returned on creation)
    pub key: String,
}

/// Result of invalidating a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidateOutcome {
    Invalidated,
    /// Unknown id, or the key was already inactive
    NotFoundOrInactive,
}
