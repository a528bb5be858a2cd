//! Whole-request validation strategies and their registry
//!
//! A strategy turns a [`ValidationContext`] into a [`Decision`]. The registry
//! is built once at startup and resolves one strategy per request, falling
//! back from the route level to the handler level, then the group level, then
//! the configured default.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{ApiKeyRecord, ClientInfo, Decision, EffectiveRules, StrategySelection};
use crate::services::policy::AccessPolicyEvaluator;
use crate::utils::{GuardError, ValidationError};

pub const DEFAULT_STRATEGY: &str = "default";
pub const ALLOW_ALL_STRATEGY: &str = "allow-all";
pub const DENY_ALL_STRATEGY: &str = "deny-all";
pub const ADDRESS_ONLY_STRATEGY: &str = "address-only";

/// Everything a strategy knows about one request
#[derive(Debug)]
pub struct ValidationContext {
    pub client: ClientInfo,
    /// Presented API key, if any
    pub api_key: Option<String>,
    pub rules: EffectiveRules,
    pub method: String,
    pub path: String,
    pub route: Option<String>,
    authenticated_key: OnceLock<ApiKeyRecord>,
}

impl ValidationContext {
    pub fn new(
        client: ClientInfo,
        api_key: Option<String>,
        rules: EffectiveRules,
        method: impl Into<String>,
        path: impl Into<String>,
        route: Option<String>,
    ) -> Self {
        Self {
            client,
            api_key,
            rules,
            method: method.into(),
            path: path.into(),
            route,
            authenticated_key: OnceLock::new(),
        }
    }

    /// Key record matched by the store strategy during this request
    pub fn authenticated_key(&self) -> Option<&ApiKeyRecord> {
        self.authenticated_key.get()
    }

    pub(crate) fn set_authenticated_key(&self, record: ApiKeyRecord) {
        let _ = self.authenticated_key.set(record);
    }
}

#[async_trait]
pub trait ValidationStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(&self, ctx: &ValidationContext) -> Decision;
}

/// Full rule evaluation
pub struct DefaultStrategy {
    evaluator: Arc<AccessPolicyEvaluator>,
}

impl DefaultStrategy {
    pub fn new(evaluator: Arc<AccessPolicyEvaluator>) -> Self {
        Self { evaluator }
    }
}

#[async_trait]
impl ValidationStrategy for DefaultStrategy {
    fn name(&self) -> &str {
        DEFAULT_STRATEGY
    }

    async fn validate(&self, ctx: &ValidationContext) -> Decision {
        self.evaluator.evaluate(ctx, &ctx.rules).await
    }
}

pub struct AllowAllStrategy;

#[async_trait]
impl ValidationStrategy for AllowAllStrategy {
    fn name(&self) -> &str {
        ALLOW_ALL_STRATEGY
    }

    async fn validate(&self, _ctx: &ValidationContext) -> Decision {
        Decision::allow()
    }
}

pub struct DenyAllStrategy;

#[async_trait]
impl ValidationStrategy for DenyAllStrategy {
    fn name(&self) -> &str {
        DENY_ALL_STRATEGY
    }

    async fn validate(&self, _ctx: &ValidationContext) -> Decision {
        Decision::deny(ValidationError::AccessDenied)
    }
}

/// Address rules only; key and combined requirements are ignored
pub struct AddressOnlyStrategy {
    evaluator: Arc<AccessPolicyEvaluator>,
}

impl AddressOnlyStrategy {
    pub fn new(evaluator: Arc<AccessPolicyEvaluator>) -> Self {
        Self { evaluator }
    }
}

#[async_trait]
impl ValidationStrategy for AddressOnlyStrategy {
    fn name(&self) -> &str {
        ADDRESS_ONLY_STRATEGY
    }

    async fn validate(&self, ctx: &ValidationContext) -> Decision {
        self.evaluator.evaluate_addresses(&ctx.client, &ctx.rules)
    }
}

struct FnStrategy<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> ValidationStrategy for FnStrategy<F>
where
    F: Fn(&ValidationContext) -> Decision + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate(&self, ctx: &ValidationContext) -> Decision {
        (self.f)(ctx)
    }
}

/// Build a strategy from a synchronous closure
pub fn strategy_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn ValidationStrategy>
where
    F: Fn(&ValidationContext) -> Decision + Send + Sync + 'static,
{
    Arc::new(FnStrategy {
        name: name.into(),
        f,
    })
}

pub struct StrategyRegistryBuilder {
    strategies: HashMap<String, Arc<dyn ValidationStrategy>>,
    default_name: String,
}

impl StrategyRegistryBuilder {
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            strategies: HashMap::new(),
            default_name: default_name.into(),
        }
    }

    /// Register the four built-in strategies
    pub fn with_builtins(self, evaluator: Arc<AccessPolicyEvaluator>) -> Self {
        self.register(Arc::new(DefaultStrategy::new(evaluator.clone())))
            .register(Arc::new(AllowAllStrategy))
            .register(Arc::new(DenyAllStrategy))
            .register(Arc::new(AddressOnlyStrategy::new(evaluator)))
    }

    /// Register a strategy under its own name, replacing any previous one
    pub fn register(mut self, strategy: Arc<dyn ValidationStrategy>) -> Self {
        let name = strategy.name().to_string();
        if self.strategies.insert(name.clone(), strategy).is_some() {
            warn!(strategy = %name, "Replacing previously registered validation strategy");
        }
        self
    }

    pub fn build(self) -> Result<StrategyRegistry, GuardError> {
        let default = self
            .strategies
            .get(&self.default_name)
            .cloned()
            .ok_or_else(|| {
                GuardError::config(format!(
                    "Default validation strategy '{}' is not registered",
                    self.default_name
                ))
            })?;

        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        info!(default = %self.default_name, strategies = ?names, "Validation strategies registered");

        Ok(StrategyRegistry {
            strategies: self.strategies,
            default,
        })
    }
}

pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn ValidationStrategy>>,
    default: Arc<dyn ValidationStrategy>,
}

impl StrategyRegistry {
    pub fn get(&self, name: &str) -> Result<Arc<dyn ValidationStrategy>, ValidationError> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::StrategyNotFound(name.to_string()))
    }

    pub fn default_strategy(&self) -> &Arc<dyn ValidationStrategy> {
        &self.default
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Pick the strategy for one request. Unregistered names are skipped with
    /// a warning; the default always resolves.
    pub fn resolve(&self, selection: &StrategySelection) -> Arc<dyn ValidationStrategy> {
        for name in selection.candidates() {
            match self.get(name) {
                Ok(strategy) => return strategy,
                Err(e) => warn!(error = %e, "Falling back to next validation strategy"),
            }
        }
        self.default.clone()
    }
}
