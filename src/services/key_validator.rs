//! API key validation
//!
//! Three strategies, picked per rule or from the global configuration:
//! - `static`: membership in a configured key list
//! - `function`: a named [`KeyPredicate`] registered by the embedding application
//! - `store`: Argon2 lookup against persisted [`ApiKeyRecord`]s (default)
//!
//! Every internal failure (predicate error or panic, store outage) denies with
//! [`ValidationError::KeyValidationFailed`].

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::config::ServiceAuthConfig;
use crate::models::{ApiKeyRecord, KeyStrategyConfig, OwnerType, StaticKeyConfig};
use crate::services::api_keys::ApiKeyService;
use crate::utils::ValidationError;

/// Custom key check. Sync closures and async functions both adapt into this.
#[async_trait]
pub trait KeyPredicate: Send + Sync {
    async fn check(&self, key: &str) -> anyhow::Result<bool>;
}

struct SyncPredicate<F>(F);

#[async_trait]
impl<F> KeyPredicate for SyncPredicate<F>
where
    F: Fn(&str) -> anyhow::Result<bool> + Send + Sync,
{
    async fn check(&self, key: &str) -> anyhow::Result<bool> {
        (self.0)(key)
    }
}

struct AsyncPredicate<F>(F);

#[async_trait]
impl<F, Fut> KeyPredicate for AsyncPredicate<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send,
{
    async fn check(&self, key: &str) -> anyhow::Result<bool> {
        (self.0)(key.to_string()).await
    }
}

/// Wrap a synchronous closure as a [`KeyPredicate`]
pub fn predicate_fn<F>(f: F) -> Arc<dyn KeyPredicate>
where
    F: Fn(&str) -> anyhow::Result<bool> + Send + Sync + 'static,
{
    Arc::new(SyncPredicate(f))
}

/// Wrap an async function as a [`KeyPredicate`]
pub fn predicate_async<F, Fut>(f: F) -> Arc<dyn KeyPredicate>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    Arc::new(AsyncPredicate(f))
}

/// Dispatches key checks to the configured strategy
pub struct ApiKeyValidator {
    keys: ApiKeyService,
    default_strategy: KeyStrategyConfig,
    predicates: HashMap<String, Arc<dyn KeyPredicate>>,
    /// Replaces the store strategy entirely when set
    override_check: Option<Arc<dyn KeyPredicate>>,
    service_auth: ServiceAuthConfig,
}

impl ApiKeyValidator {
    pub fn new(keys: ApiKeyService, default_strategy: KeyStrategyConfig) -> Self {
        Self {
            keys,
            default_strategy,
            predicates: HashMap::new(),
            override_check: None,
            service_auth: ServiceAuthConfig::default(),
        }
    }

    pub fn with_predicate(mut self, name: impl Into<String>, predicate: Arc<dyn KeyPredicate>) -> Self {
        self.predicates.insert(name.into(), predicate);
        self
    }

    /// Install a `validate_api_key` override used instead of the store lookup
    pub fn with_override(mut self, predicate: Arc<dyn KeyPredicate>) -> Self {
        self.override_check = Some(predicate);
        self
    }

    pub fn with_service_auth(mut self, service_auth: ServiceAuthConfig) -> Self {
        self.service_auth = service_auth;
        self
    }

    /// Validate a presented key.
    ///
    /// Returns the matching record when the store strategy authenticated the
    /// key; static and function strategies authenticate without a record.
    pub async fn validate(
        &self,
        key: Option<&str>,
        required_scopes: &[String],
        strategy: Option<&KeyStrategyConfig>,
    ) -> Result<Option<ApiKeyRecord>, ValidationError> {
        let key = match key.map(str::trim) {
            Some(k) if !k.is_empty() => k,
            _ => return Err(ValidationError::ApiKeyMissing),
        };

        match strategy.unwrap_or(&self.default_strategy) {
            KeyStrategyConfig::Static(config) => {
                if !static_match(config, key) {
                    return Err(ValidationError::ApiKeyInvalid);
                }
                require_no_scopes(required_scopes)?;
                Ok(None)
            }
            KeyStrategyConfig::Function { name } => {
                let Some(predicate) = self.predicates.get(name) else {
                    error!(predicate = %name, "Key predicate is not registered");
                    return Err(ValidationError::KeyValidationFailed);
                };
                run_predicate(predicate.as_ref(), name, key).await?;
                require_no_scopes(required_scopes)?;
                Ok(None)
            }
            KeyStrategyConfig::Store => match &self.override_check {
                Some(predicate) => {
                    run_predicate(predicate.as_ref(), "validate_api_key", key).await?;
                    require_no_scopes(required_scopes)?;
                    Ok(None)
                }
                None => self.validate_stored(key, required_scopes).await.map(Some),
            },
        }
    }

    async fn validate_stored(
        &self,
        key: &str,
        required_scopes: &[String],
    ) -> Result<ApiKeyRecord, ValidationError> {
        let record = match self.keys.find_by_key(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(ValidationError::ApiKeyInvalid),
            Err(e) => {
                error!(error = %e, "API key lookup failed");
                return Err(ValidationError::KeyValidationFailed);
            }
        };

        let now = Utc::now();
        if record.is_expired_at(now) {
            debug!(key_id = %record.id, "Rejected expired API key");
            return Err(ValidationError::ApiKeyExpired);
        }

        let mut required: Vec<String> = required_scopes.to_vec();
        if self.service_auth.enabled && record.owner_type == OwnerType::Service {
            for scope in &self.service_auth.required_scopes {
                if !required.contains(scope) {
                    required.push(scope.clone());
                }
            }
        }
        let missing = record.missing_scopes(&required);
        if !missing.is_empty() {
            return Err(ValidationError::ScopeMissing(
                missing.into_iter().map(str::to_string).collect(),
            ));
        }

        if let Err(e) = self.keys.store().touch_last_used(record.id, now).await {
            warn!(key_id = %record.id, error = %e, "Failed to update API key last use");
        }
        Ok(record)
    }
}

fn static_match(config: &StaticKeyConfig, key: &str) -> bool {
    let normalize = |s: &str| {
        if config.case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    };
    let presented = normalize(key);

    config
        .keys
        .iter()
        .filter(|k| !k.is_empty())
        .map(|k| normalize(k))
        .any(|valid| {
            valid == presented
                || (config.partial_match
                    && (valid.contains(&presented) || presented.contains(&valid)))
        })
}

/// Keys authenticated without a record carry no scopes
fn require_no_scopes(required: &[String]) -> Result<(), ValidationError> {
    if required.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::ScopeMissing(required.to_vec()))
    }
}

async fn run_predicate(
    predicate: &dyn KeyPredicate,
    name: &str,
    key: &str,
) -> Result<(), ValidationError> {
    match AssertUnwindSafe(predicate.check(key)).catch_unwind().await {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err(ValidationError::ApiKeyInvalid),
        Ok(Err(e)) => {
            warn!(predicate = %name, error = %e, "Key predicate failed");
            Err(ValidationError::KeyValidationFailed)
        }
        Err(_) => {
            error!(predicate = %name, "Key predicate panicked");
            Err(ValidationError::KeyValidationFailed)
        }
    }
}
