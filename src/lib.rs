//! access-guard library
//!
//! Request access-decision engine (address rules, API key strategies,
//! pluggable validation strategies) with asynchronous audit logging, plus the
//! axum adapter and management API built on top of it.

use std::sync::Arc;

use anyhow::Result;

pub mod api;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::DbPool;
pub use middleware::{guard_middleware, guarded};

use services::{
    AccessPolicyEvaluator, ApiKeyService, ApiKeyStore, ApiKeyValidator, AuditQueue, AuditSink,
    Guard, GuardHooks, KeyHasher, KeyPredicate, MemoryAuditSink, MemoryKeyStore,
    StrategyRegistryBuilder, ValidationStrategy,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    pub guard: Arc<Guard>,
    pub api_keys: ApiKeyService,
    /// Audit queue; `None` when auditing is disabled
    pub audit: Option<Arc<AuditQueue>>,
    pub audit_sink: Arc<dyn AuditSink>,
}

impl AppState {
    pub fn builder(config: AppConfig) -> AppStateBuilder {
        AppStateBuilder::new(config)
    }
}

/// Wires the engine together once at startup
pub struct AppStateBuilder {
    config: AppConfig,
    key_store: Option<Arc<dyn ApiKeyStore>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    predicates: Vec<(String, Arc<dyn KeyPredicate>)>,
    key_override: Option<Arc<dyn KeyPredicate>>,
    strategies: Vec<Arc<dyn ValidationStrategy>>,
    hooks: GuardHooks,
}

impl AppStateBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            key_store: None,
            audit_sink: None,
            predicates: Vec::new(),
            key_override: None,
            strategies: Vec::new(),
            hooks: GuardHooks::default(),
        }
    }

    /// Defaults to an in-memory store
    pub fn key_store(mut self, store: Arc<dyn ApiKeyStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    /// Defaults to an in-memory sink
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Register a named predicate for `function` key strategies
    pub fn predicate(mut self, name: impl Into<String>, predicate: Arc<dyn KeyPredicate>) -> Self {
        self.predicates.push((name.into(), predicate));
        self
    }

    /// Replace the store lookup with a custom key check
    pub fn validate_api_key(mut self, predicate: Arc<dyn KeyPredicate>) -> Self {
        self.key_override = Some(predicate);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn ValidationStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn hooks(mut self, hooks: GuardHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Fails when the configured default strategy is not registered or the
    /// hash parameters are invalid
    pub fn build(self) -> Result<AppState> {
        let config = self.config;
        let key_store = self
            .key_store
            .unwrap_or_else(|| Arc::new(MemoryKeyStore::new()));
        let audit_sink = self
            .audit_sink
            .unwrap_or_else(|| Arc::new(MemoryAuditSink::new()));

        let api_keys = ApiKeyService::new(key_store, KeyHasher::new(&config.api_keys.hash)?);

        let mut validator = ApiKeyValidator::new(api_keys.clone(), config.api_keys.strategy.clone())
            .with_service_auth(config.guard.service_auth.clone());
        for (name, predicate) in self.predicates {
            validator = validator.with_predicate(name, predicate);
        }
        if let Some(predicate) = self.key_override {
            validator = validator.with_override(predicate);
        }

        let evaluator = Arc::new(AccessPolicyEvaluator::new(Arc::new(validator)));
        let mut registry =
            StrategyRegistryBuilder::new(config.guard.default_strategy.clone()).with_builtins(evaluator);
        for strategy in self.strategies {
            registry = registry.register(strategy);
        }
        let registry = Arc::new(registry.build()?);

        let audit = config
            .audit
            .enabled
            .then(|| Arc::new(AuditQueue::new(audit_sink.clone(), config.audit.clone())));

        let guard = Guard::new(registry, audit.clone(), &config.guard).with_hooks(self.hooks);

        Ok(AppState {
            config: Arc::new(config),
            guard: Arc::new(guard),
            api_keys,
            audit,
            audit_sink,
        })
    }
}
