//! Request guard
//!
//! Orchestrates one request: merges route rules over the global policy,
//! resolves a validation strategy, runs it inside a panic boundary, and hands
//! the resulting access and traffic entries to the audit queue without
//! waiting for persistence.

use std::collections::{BTreeMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::GuardConfig;
use crate::models::{
    AccessDecision, AccessEventEntry, AccessRuleOptions, ApiKeyRecord, ClientInfo, Decision,
    EffectiveRules, OwnerType, RouteAccess, TrafficLogEntry,
};
use crate::services::audit_queue::AuditQueue;
use crate::services::strategy::{StrategyRegistry, ValidationContext};
use crate::utils::ValidationError;

pub const REDACTED: &str = "[REDACTED]";

/// Headers that always carry credentials
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
];

/// Who made the request, as far as the guard can tell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub api_key_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub service_id: Option<String>,
}

impl Identity {
    /// Identity implied by an authenticated key's owner
    pub fn from_key(record: &ApiKeyRecord) -> Self {
        let (user_id, service_id) = match record.owner_type {
            OwnerType::User => (Some(record.owner_id.clone()), None),
            OwnerType::Service => (None, Some(record.owner_id.clone())),
        };
        Self {
            api_key_id: Some(record.id),
            user_id,
            service_id,
        }
    }
}

/// Maps a request to the caller identity recorded in audit entries
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, ctx: &ValidationContext) -> Identity;
}

impl<F> IdentityResolver for F
where
    F: Fn(&ValidationContext) -> Identity + Send + Sync,
{
    fn resolve(&self, ctx: &ValidationContext) -> Identity {
        self(ctx)
    }
}

pub type AccessEventHook = Arc<dyn Fn(&AccessEventEntry) + Send + Sync>;
pub type TrafficLogHook = Arc<dyn Fn(&TrafficLogEntry) + Send + Sync>;

#[derive(Clone, Default)]
pub struct GuardHooks {
    pub identify: Option<Arc<dyn IdentityResolver>>,
    pub on_access_event: Option<AccessEventHook>,
    pub on_traffic_log: Option<TrafficLogHook>,
}

/// Request facts handed to [`Guard::check`]
#[derive(Debug, Clone)]
pub struct GuardRequest {
    pub client: ClientInfo,
    pub api_key: Option<String>,
    pub method: String,
    pub path: String,
    /// Resolved route metadata; `None` means no route-level rules
    pub access: Option<RouteAccess>,
}

#[derive(Debug, Clone)]
pub struct GuardOutcome {
    pub decision: Decision,
    /// Strategy that produced the decision; `None` when the guard was skipped
    pub strategy: Option<String>,
    pub identity: Identity,
    pub client: ClientInfo,
    pub method: String,
    pub path: String,
    pub route: Option<String>,
    /// `None` when global guards are skipped
    pub rules: Option<EffectiveRules>,
}

impl GuardOutcome {
    pub fn allowed(&self) -> bool {
        self.decision.allowed
    }

    pub fn skipped(&self) -> bool {
        self.rules.is_none()
    }
}

/// Response facts handed to [`Guard::record_traffic`]
#[derive(Debug, Clone, Default)]
pub struct TrafficFacts {
    pub status: u16,
    pub duration: Duration,
    pub response_size: Option<u64>,
    pub headers: BTreeMap<String, String>,
}

pub struct Guard {
    registry: Arc<StrategyRegistry>,
    audit: Option<Arc<AuditQueue>>,
    hooks: GuardHooks,
    global_policy: AccessRuleOptions,
    skip_global_guards: bool,
    redacted_headers: HashSet<String>,
}

impl Guard {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        audit: Option<Arc<AuditQueue>>,
        config: &GuardConfig,
    ) -> Self {
        let redacted_headers = SENSITIVE_HEADERS
            .iter()
            .map(|h| h.to_string())
            .chain(std::iter::once(config.api_key_header.to_lowercase()))
            .chain(config.redact_headers.iter().map(|h| h.to_lowercase()))
            .collect();

        Self {
            registry,
            audit,
            hooks: GuardHooks::default(),
            global_policy: config.global_policy.clone(),
            skip_global_guards: config.skip_global_guards,
            redacted_headers,
        }
    }

    pub fn with_hooks(mut self, hooks: GuardHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    pub async fn check(&self, request: GuardRequest) -> GuardOutcome {
        let route = request.access.as_ref().and_then(|a| a.name.clone());

        if self.skip_global_guards {
            return GuardOutcome {
                decision: Decision::allow(),
                strategy: None,
                identity: Identity::default(),
                client: request.client,
                method: request.method,
                path: request.path,
                route,
                rules: None,
            };
        }

        let access = request.access.unwrap_or_default();
        let rules = EffectiveRules::merge(&self.global_policy, access.rules.as_ref());
        let strategy = self.registry.resolve(&access.strategy);
        let strategy_name = strategy.name().to_string();

        let ctx = ValidationContext::new(
            request.client,
            request.api_key,
            rules.clone(),
            request.method,
            request.path,
            route.clone(),
        );

        let decision = match AssertUnwindSafe(strategy.validate(&ctx))
            .catch_unwind()
            .await
        {
            Ok(decision) => decision,
            Err(_) => {
                error!(strategy = %strategy_name, path = %ctx.path, "Validation strategy panicked");
                Decision::deny(ValidationError::EvaluationFailed)
            }
        };

        if decision.is_denied() {
            debug!(
                ip = %ctx.client.ip,
                strategy = %strategy_name,
                reason = decision.reason.as_deref().unwrap_or_default(),
                "Request denied"
            );
        }

        let identity = self.identify(&ctx);

        if !rules.skip_access_log {
            let entry = AccessEventEntry {
                id: Uuid::new_v4(),
                decision: AccessDecision::from_allowed(decision.allowed),
                reason: decision.reason.clone(),
                code: decision.code.clone(),
                strategy: strategy_name.clone(),
                client: ctx.client.clone(),
                api_key_id: identity.api_key_id,
                user_id: identity.user_id.clone(),
                service_id: identity.service_id.clone(),
                method: ctx.method.clone(),
                path: ctx.path.clone(),
                route: route.clone(),
                metadata: serde_json::Value::Object(decision.metadata.clone()),
                created_at: Utc::now(),
            };
            if let Some(hook) = &self.hooks.on_access_event {
                run_hook("on_access_event", || hook(&entry));
            }
            if let Some(audit) = &self.audit {
                audit.enqueue_access(entry);
            }
        }

        GuardOutcome {
            decision,
            strategy: Some(strategy_name),
            identity,
            client: ctx.client,
            method: ctx.method,
            path: ctx.path,
            route,
            rules: Some(rules),
        }
    }

    fn identify(&self, ctx: &ValidationContext) -> Identity {
        let fallback = || ctx.authenticated_key().map(Identity::from_key).unwrap_or_default();
        match &self.hooks.identify {
            Some(resolver) => catch_unwind(AssertUnwindSafe(|| resolver.resolve(ctx)))
                .unwrap_or_else(|_| {
                    error!("Identity resolver panicked");
                    fallback()
                }),
            None => fallback(),
        }
    }

    /// Record one served request. Skipped guards and routes with
    /// `skip_traffic_log` record nothing.
    pub fn record_traffic(&self, outcome: &GuardOutcome, facts: TrafficFacts) {
        let Some(rules) = &outcome.rules else {
            return;
        };
        if rules.skip_traffic_log {
            return;
        }

        let entry = TrafficLogEntry {
            id: Uuid::new_v4(),
            method: outcome.method.clone(),
            path: outcome.path.clone(),
            status: facts.status,
            duration_ms: facts.duration.as_millis() as u64,
            client: outcome.client.clone(),
            api_key_id: outcome.identity.api_key_id,
            user_id: outcome.identity.user_id.clone(),
            service_id: outcome.identity.service_id.clone(),
            headers: self.sanitize_headers(facts.headers),
            response_size: facts.response_size,
            route: outcome.route.clone(),
            created_at: Utc::now(),
        };

        if let Some(hook) = &self.hooks.on_traffic_log {
            run_hook("on_traffic_log", || hook(&entry));
        }
        if let Some(audit) = &self.audit {
            audit.enqueue_traffic(entry);
        }
    }

    pub fn sanitize_headers(&self, headers: BTreeMap<String, String>) -> BTreeMap<String, String> {
        headers
            .into_iter()
            .map(|(name, value)| {
                let name = name.to_lowercase();
                if self.redacted_headers.contains(&name) {
                    (name, REDACTED.to_string())
                } else {
                    (name, value)
                }
            })
            .collect()
    }
}

fn run_hook(name: &str, hook: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        error!(hook = name, "Audit hook panicked");
    }
}
