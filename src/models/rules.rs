//! Access rule models
//!
//! Route rules arrive from the routing layer as [`AccessRuleOptions`], a
//! partial value where every field is optional. They are merged over the
//! global policy into [`EffectiveRules`] before evaluation.

use serde::{Deserialize, Serialize};

use crate::models::IpVersion;

/// IP family constraint of a rule set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IpVersionConstraint {
    V4,
    V6,
    #[default]
    Any,
}

impl IpVersionConstraint {
    /// Whether a client of the given family satisfies this constraint
    pub fn admits(&self, version: Option<IpVersion>) -> bool {
        match self {
            IpVersionConstraint::Any => true,
            IpVersionConstraint::V4 => version == Some(IpVersion::V4),
            IpVersionConstraint::V6 => version == Some(IpVersion::V6),
        }
    }
}

impl std::fmt::Display for IpVersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpVersionConstraint::V4 => write!(f, "v4"),
            IpVersionConstraint::V6 => write!(f, "v6"),
            IpVersionConstraint::Any => write!(f, "any"),
        }
    }
}

/// A request fact that a combined requirement demands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Requirement {
    AddressPresent,
    MacPresent,
    KeyPresent,
    IpVersionKnown,
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Requirement::AddressPresent => write!(f, "address-present"),
            Requirement::MacPresent => write!(f, "mac-present"),
            Requirement::KeyPresent => write!(f, "key-present"),
            Requirement::IpVersionKnown => write!(f, "ip-version-known"),
        }
    }
}

impl std::str::FromStr for Requirement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "address-present" => Ok(Requirement::AddressPresent),
            "mac-present" => Ok(Requirement::MacPresent),
            "key-present" => Ok(Requirement::KeyPresent),
            "ip-version-known" => Ok(Requirement::IpVersionKnown),
            _ => Err(format!("Invalid requirement: {}", s)),
        }
    }
}

/// Credential requirements of a rule set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RequireOptions {
    #[serde(default)]
    pub api_key: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub combined: Vec<Requirement>,
}

/// Static key list settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticKeyConfig {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
    /// Accept substring containment in either direction
    #[serde(default)]
    pub partial_match: bool,
}

fn default_case_sensitive() -> bool {
    true
}

impl Default for StaticKeyConfig {
    fn default() -> Self {
        Self {
            keys: vec![],
            case_sensitive: default_case_sensitive(),
            partial_match: false,
        }
    }
}

/// Which key validation strategy applies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KeyStrategyConfig {
    /// Fixed list of accepted keys
    Static(StaticKeyConfig),
    /// Named predicate registered with the validator
    Function { name: String },
    /// Hash lookup in the persisted key store
    #[default]
    Store,
}

impl KeyStrategyConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            KeyStrategyConfig::Static(_) => "static",
            KeyStrategyConfig::Function { .. } => "function",
            KeyStrategyConfig::Store => "store",
        }
    }
}

/// Rule options for one endpoint (or the global policy)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccessRuleOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require: Option<RequireOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_version: Option<IpVersionConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_guard: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_traffic_log: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_access_log: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_strategy: Option<KeyStrategyConfig>,
}

impl AccessRuleOptions {
    pub fn allow<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn deny<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn require(mut self, require: RequireOptions) -> Self {
        self.require = Some(require);
        self
    }

    pub fn ip_version(mut self, version: IpVersionConstraint) -> Self {
        self.ip_version = Some(version);
        self
    }

    pub fn key_strategy(mut self, strategy: KeyStrategyConfig) -> Self {
        self.key_strategy = Some(strategy);
        self
    }

    pub fn skip_guard(mut self, skip: bool) -> Self {
        self.skip_guard = Some(skip);
        self
    }

    /// Lay `route` over `self`: every field the route specifies replaces the
    /// same field here wholesale. Lists are never concatenated.
    pub fn overlay(&self, route: &AccessRuleOptions) -> AccessRuleOptions {
        AccessRuleOptions {
            allow: route.allow.clone().or_else(|| self.allow.clone()),
            deny: route.deny.clone().or_else(|| self.deny.clone()),
            require: route.require.clone().or_else(|| self.require.clone()),
            ip_version: route.ip_version.or(self.ip_version),
            skip_guard: route.skip_guard.or(self.skip_guard),
            skip_traffic_log: route.skip_traffic_log.or(self.skip_traffic_log),
            skip_access_log: route.skip_access_log.or(self.skip_access_log),
            key_strategy: route
                .key_strategy
                .clone()
                .or_else(|| self.key_strategy.clone()),
        }
    }
}

/// Fully merged rule set, ready for evaluation
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct EffectiveRules {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub require: RequireOptions,
    pub ip_version: IpVersionConstraint,
    pub skip_guard: bool,
    pub skip_traffic_log: bool,
    pub skip_access_log: bool,
    pub key_strategy: Option<KeyStrategyConfig>,
}

impl EffectiveRules {
    /// Merge optional route options over the global policy
    pub fn merge(global: &AccessRuleOptions, route: Option<&AccessRuleOptions>) -> Self {
        let merged = match route {
            Some(route) => global.overlay(route),
            None => global.clone(),
        };
        merged.into()
    }
}

impl From<AccessRuleOptions> for EffectiveRules {
    fn from(opts: AccessRuleOptions) -> Self {
        Self {
            allow: opts.allow.unwrap_or_default(),
            deny: opts.deny.unwrap_or_default(),
            require: opts.require.unwrap_or_default(),
            ip_version: opts.ip_version.unwrap_or_default(),
            skip_guard: opts.skip_guard.unwrap_or(false),
            skip_traffic_log: opts.skip_traffic_log.unwrap_or(false),
            skip_access_log: opts.skip_access_log.unwrap_or(false),
            key_strategy: opts.key_strategy,
        }
    }
}

/// Strategy names attached at the three metadata levels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StrategySelection {
    /// Explicit route-level override
    #[serde(default)]
    pub route: Option<String>,
    /// Handler-level metadata
    #[serde(default)]
    pub handler: Option<String>,
    /// Class/group-level metadata
    #[serde(default)]
    pub group: Option<String>,
}

impl StrategySelection {
    /// Candidate names in resolution order
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        [&self.route, &self.handler, &self.group]
            .into_iter()
            .filter_map(|name| name.as_deref())
    }
}

/// Everything the routing layer resolves for one endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RouteAccess {
    /// Route name for audit attribution
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rules: Option<AccessRuleOptions>,
    #[serde(default)]
    pub strategy: StrategySelection,
}

impl RouteAccess {
    pub fn new(rules: AccessRuleOptions) -> Self {
        Self {
            rules: Some(rules),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_strategy(mut self, name: impl Into<String>) -> Self {
        self.strategy.route = Some(name.into());
        self
    }
}
