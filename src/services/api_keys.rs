//! API key lifecycle: create, list, invalidate and lookup by plaintext key

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::models::{ApiKeyRecord, CreateApiKeyRequest, CreateApiKeyResponse, InvalidateOutcome};
use crate::services::hashing::{generate_key, KeyHasher};
use crate::services::key_store::ApiKeyStore;

#[derive(Clone)]
pub struct ApiKeyService {
    store: Arc<dyn ApiKeyStore>,
    hasher: KeyHasher,
}

impl ApiKeyService {
    pub fn new(store: Arc<dyn ApiKeyStore>, hasher: KeyHasher) -> Self {
        Self { store, hasher }
    }

    pub fn store(&self) -> &Arc<dyn ApiKeyStore> {
        &self.store
    }

    /// Create a key. The plaintext is only ever returned here.
    pub async fn create(&self, req: &CreateApiKeyRequest) -> Result<CreateApiKeyResponse> {
        let key = generate_key();
        let hashed_key = self.hasher.hash(&key)?;

        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            name: req.name.trim().to_string(),
            hashed_key,
            owner_type: req.owner_type,
            owner_id: req.owner_id.clone(),
            scopes: req.scopes.iter().cloned().collect(),
            is_active: true,
            created_at: Utc::now(),
            expires_at: req.expires_at,
            last_used_at: None,
        };
        self.store
            .insert(&record)
            .await
            .context("Failed to store API key")?;

        info!(
            key_id = %record.id,
            owner_type = %record.owner_type,
            owner_id = %record.owner_id,
            "Created API key"
        );

        Ok(CreateApiKeyResponse {
            api_key: record,
            key,
        })
    }

    pub async fn list(&self) -> Result<Vec<ApiKeyRecord>> {
        self.store.list().await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ApiKeyRecord>> {
        self.store.get(id).await
    }

    /// Deactivate a key permanently. Repeating the call is a no-op.
    pub async fn invalidate(&self, id: Uuid) -> Result<InvalidateOutcome> {
        if self.store.deactivate(id).await? {
            info!(key_id = %id, "Invalidated API key");
            Ok(InvalidateOutcome::Invalidated)
        } else {
            Ok(InvalidateOutcome::NotFoundOrInactive)
        }
    }

    /// Find the active record whose hash matches the presented key.
    ///
    /// Hashes are salted, so this verifies against every active record until
    /// one matches. Verification runs on the blocking pool.
    pub async fn find_by_key(&self, key: &str) -> Result<Option<ApiKeyRecord>> {
        let candidates = self.store.list_active().await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let hasher = self.hasher.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            candidates
                .into_iter()
                .find(|record| hasher.verify(&key, &record.hashed_key))
        })
        .await
        .context("API key verification task failed")
    }
}
