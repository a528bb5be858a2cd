//! Access-decision engine and audit services

pub mod api_keys;
pub mod audit_queue;
pub mod audit_sink;
pub mod guard;
pub mod hashing;
pub mod key_store;
pub mod key_validator;
pub mod policy;
pub mod strategy;

pub use api_keys::ApiKeyService;
pub use audit_queue::{AuditQueue, AuditQueueStats, AuditWorkers};
pub use audit_sink::{AuditSink, MemoryAuditSink};
pub use guard::{
    AccessEventHook, Guard, GuardHooks, GuardOutcome, GuardRequest, Identity, IdentityResolver,
    TrafficFacts, TrafficLogHook,
};
pub use hashing::{generate_key, KeyHasher};
pub use key_store::{ApiKeyStore, MemoryKeyStore};
pub use key_validator::{predicate_async, predicate_fn, ApiKeyValidator, KeyPredicate};
pub use policy::AccessPolicyEvaluator;
pub use strategy::{
    strategy_fn, StrategyRegistry, StrategyRegistryBuilder, ValidationContext, ValidationStrategy,
};
