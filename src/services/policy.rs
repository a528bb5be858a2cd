//! Access policy evaluation
//!
//! Rules are checked in a fixed, short-circuiting order:
//! 1. `skip_guard` allows immediately
//! 2. IP version constraint
//! 3. deny list (takes precedence over the allow list)
//! 4. allow list
//! 5. API key and scopes
//! 6. combined requirements

use std::sync::Arc;

use tracing::debug;

use crate::models::{ClientInfo, Decision, EffectiveRules, Requirement};
use crate::services::key_validator::ApiKeyValidator;
use crate::services::strategy::ValidationContext;
use crate::utils::address::matches_client;
use crate::utils::ValidationError;

pub struct AccessPolicyEvaluator {
    keys: Arc<ApiKeyValidator>,
}

impl AccessPolicyEvaluator {
    pub fn new(keys: Arc<ApiKeyValidator>) -> Self {
        Self { keys }
    }

    /// Full evaluation of `rules` for the request in `ctx`
    pub async fn evaluate(&self, ctx: &ValidationContext, rules: &EffectiveRules) -> Decision {
        if rules.skip_guard {
            return Decision::allow();
        }
        if let Err(e) = check_addresses(&ctx.client, rules) {
            return deny(ctx, e);
        }

        if rules.require.api_key {
            match self
                .keys
                .validate(
                    ctx.api_key.as_deref(),
                    &rules.require.scopes,
                    rules.key_strategy.as_ref(),
                )
                .await
            {
                Ok(Some(record)) => ctx.set_authenticated_key(record),
                Ok(None) => {}
                Err(e) => return deny(ctx, e),
            }
        }

        for requirement in &rules.require.combined {
            if !requirement_holds(*requirement, ctx) {
                return deny(ctx, ValidationError::CombinedRequirementUnmet(*requirement));
            }
        }

        Decision::allow()
    }

    /// Address checks only (steps 1 to 4)
    pub fn evaluate_addresses(&self, client: &ClientInfo, rules: &EffectiveRules) -> Decision {
        if rules.skip_guard {
            return Decision::allow();
        }
        match check_addresses(client, rules) {
            Ok(()) => Decision::allow(),
            Err(e) => {
                debug!(ip = %client.ip, reason = %e, "Address check denied request");
                Decision::deny(e)
            }
        }
    }
}

fn deny(ctx: &ValidationContext, error: ValidationError) -> Decision {
    debug!(
        ip = %ctx.client.ip,
        path = %ctx.path,
        reason = %error,
        "Access policy denied request"
    );
    Decision::deny(error)
}

fn check_addresses(client: &ClientInfo, rules: &EffectiveRules) -> Result<(), ValidationError> {
    if !rules.ip_version.admits(client.ip_version) {
        return Err(ValidationError::IpVersionMismatch {
            expected: rules.ip_version,
            actual: client
                .ip_version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        });
    }

    if let Some(pattern) = rules.deny.iter().find(|p| matches_client(client, p)) {
        return Err(ValidationError::IpBlacklisted {
            ip: client.ip.clone(),
            pattern: pattern.clone(),
        });
    }

    if !rules.allow.is_empty() && !rules.allow.iter().any(|p| matches_client(client, p)) {
        return Err(ValidationError::IpNotAllowed(client.ip.clone()));
    }

    Ok(())
}

fn requirement_holds(requirement: Requirement, ctx: &ValidationContext) -> bool {
    match requirement {
        Requirement::AddressPresent => ctx.client.has_address(),
        Requirement::MacPresent => ctx.client.mac.is_some(),
        Requirement::KeyPresent => ctx
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty()),
        Requirement::IpVersionKnown => ctx.client.ip_version.is_some(),
    }
}
