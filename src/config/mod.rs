//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings
//! - Global access policy and key validation strategy
//! - Audit queue and retention tuning

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::{AccessRuleOptions, KeyStrategyConfig};
use crate::utils::address::is_valid_pattern;
use crate::utils::validation::{validate_header_name, validate_scope};
use crate::utils::GuardError;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub api_keys: ApiKeyConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5060
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database configuration (SQLite key store and audit sink)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite://./data/access-guard.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix (default: "access-guard")
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Enable daily log rotation (default: true for production)
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to console (stdout/stderr) - default for development
    #[default]
    Console,
    /// Log to file with optional rotation - recommended for production
    File,
    /// Log to both console and file
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_target() -> LogTarget {
    LogTarget::Console
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/access-guard")
}

fn default_log_prefix() -> String {
    "access-guard".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: default_log_target(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

/// Request guard configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuardConfig {
    /// Header carrying the presented API key
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    /// Header carrying the client MAC address
    #[serde(default = "default_client_mac_header")]
    pub client_mac_header: String,
    /// Honor X-Forwarded-For / X-Real-IP when deriving the client address
    #[serde(default)]
    pub trust_proxy: bool,
    /// Bypass the engine entirely for every request
    #[serde(default)]
    pub skip_global_guards: bool,
    /// Final fallback strategy; must be registered at startup
    #[serde(default = "default_strategy_name")]
    pub default_strategy: String,
    #[serde(default)]
    pub service_auth: ServiceAuthConfig,
    /// Rules merged under every route's own rules
    #[serde(default)]
    pub global_policy: AccessRuleOptions,
    /// Additional request headers redacted from traffic logs
    #[serde(default)]
    pub redact_headers: Vec<String>,
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

fn default_client_mac_header() -> String {
    "x-client-mac".to_string()
}

fn default_strategy_name() -> String {
    "default".to_string()
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            api_key_header: default_api_key_header(),
            client_mac_header: default_client_mac_header(),
            trust_proxy: false,
            skip_global_guards: false,
            default_strategy: default_strategy_name(),
            service_auth: ServiceAuthConfig::default(),
            global_policy: AccessRuleOptions::default(),
            redact_headers: vec![],
        }
    }
}

/// Baseline scopes demanded from service-owned keys
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServiceAuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub required_scopes: Vec<String>,
}

/// API key validation configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ApiKeyConfig {
    /// Global key strategy used when a rule names none
    #[serde(default)]
    pub strategy: KeyStrategyConfig,
    #[serde(default)]
    pub hash: HashConfig,
}

/// Argon2id parameters for stored key hashes
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HashConfig {
    #[serde(default = "default_hash_memory")]
    pub memory_kib: u32,
    #[serde(default = "default_hash_iterations")]
    pub iterations: u32,
    #[serde(default = "default_hash_parallelism")]
    pub parallelism: u32,
}

fn default_hash_memory() -> u32 {
    19_456
}

fn default_hash_iterations() -> u32 {
    2
}

fn default_hash_parallelism() -> u32 {
    1
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_hash_memory(),
            iterations: default_hash_iterations(),
            parallelism: default_hash_parallelism(),
        }
    }
}

/// Audit queue and retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    /// Maximum entries handed to the sink per drain
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Queue length that triggers an out-of-cycle drain
    #[serde(default = "default_traffic_high_water")]
    pub traffic_high_water: usize,
    #[serde(default = "default_access_high_water")]
    pub access_high_water: usize,
    /// Hard bound per queue; entries beyond it are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Entries older than this are purged; 0 or less disables the sweep
    #[serde(default = "default_retention_days")]
    pub traffic_retention_days: i64,
    #[serde(default = "default_retention_initial_delay")]
    pub retention_initial_delay_secs: u64,
    #[serde(default = "default_retention_interval")]
    pub retention_interval_secs: u64,
}

fn default_audit_enabled() -> bool {
    true
}

fn default_flush_interval() -> u64 {
    5
}

fn default_batch_size() -> usize {
    100
}

fn default_traffic_high_water() -> usize {
    100
}

fn default_access_high_water() -> usize {
    50
}

fn default_queue_capacity() -> usize {
    10_000
}

/// Upper bound on the retention window, roughly a century
pub const MAX_RETENTION_DAYS: i64 = 36_500;

fn default_retention_days() -> i64 {
    90
}

fn default_retention_initial_delay() -> u64 {
    60
}

fn default_retention_interval() -> u64 {
    86_400
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            flush_interval_secs: default_flush_interval(),
            batch_size: default_batch_size(),
            traffic_high_water: default_traffic_high_water(),
            access_high_water: default_access_high_water(),
            queue_capacity: default_queue_capacity(),
            traffic_retention_days: default_retention_days(),
            retention_initial_delay_secs: default_retention_initial_delay(),
            retention_interval_secs: default_retention_interval(),
        }
    }
}

impl AuditConfig {
    pub fn retention_enabled(&self) -> bool {
        self.traffic_retention_days > 0
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            guard: GuardConfig::default(),
            api_keys: ApiKeyConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with ACCESS_GUARD_)
    pub fn load() -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("ACCESS_GUARD_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                Self::from_file(path)?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        // Apply environment variable overrides
        config.apply_env_overrides();

        config.validate().context("Invalid configuration")?;

        Ok(config)
    }

    /// Parse a YAML configuration file without overrides or validation
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            // Current directory
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            // System config directory
            PathBuf::from("/etc/access-guard/config.yaml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("access-guard/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(host) = std::env::var("ACCESS_GUARD_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("ACCESS_GUARD_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        // Database overrides
        if let Ok(url) = std::env::var("ACCESS_GUARD_DATABASE_URL") {
            self.database.url = url;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("ACCESS_GUARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("ACCESS_GUARD_LOG_FORMAT") {
            if let Ok(f) = format.parse() {
                self.logging.format = f;
            }
        }

        // Guard overrides
        if let Ok(header) = std::env::var("ACCESS_GUARD_API_KEY_HEADER") {
            self.guard.api_key_header = header;
        }
        if let Ok(header) = std::env::var("ACCESS_GUARD_CLIENT_MAC_HEADER") {
            self.guard.client_mac_header = header;
        }
        if let Ok(trust) = std::env::var("ACCESS_GUARD_TRUST_PROXY") {
            self.guard.trust_proxy = parse_bool(&trust);
        }
        if let Ok(skip) = std::env::var("ACCESS_GUARD_SKIP_GLOBAL_GUARDS") {
            self.guard.skip_global_guards = parse_bool(&skip);
        }

        // Audit overrides
        if let Ok(days) = std::env::var("ACCESS_GUARD_TRAFFIC_RETENTION_DAYS") {
            if let Ok(d) = days.parse() {
                self.audit.traffic_retention_days = d;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), GuardError> {
        if !validate_header_name(&self.guard.api_key_header) {
            return Err(GuardError::config(format!(
                "Invalid API key header name: '{}'",
                self.guard.api_key_header
            )));
        }
        if !validate_header_name(&self.guard.client_mac_header) {
            return Err(GuardError::config(format!(
                "Invalid client MAC header name: '{}'",
                self.guard.client_mac_header
            )));
        }
        if self.guard.default_strategy.trim().is_empty() {
            return Err(GuardError::config("Default strategy name cannot be empty"));
        }
        if let Some(scope) = self
            .guard
            .service_auth
            .required_scopes
            .iter()
            .find(|s| !validate_scope(s))
        {
            return Err(GuardError::config(format!(
                "Invalid service scope: '{}'",
                scope
            )));
        }

        // Malformed patterns never match; that is legal but almost always a typo
        let policy = &self.guard.global_policy;
        for pattern in policy
            .allow
            .iter()
            .flatten()
            .chain(policy.deny.iter().flatten())
        {
            if !is_valid_pattern(pattern) {
                tracing::warn!(pattern = %pattern, "Global policy pattern is malformed and will never match");
            }
        }

        if self.audit.batch_size == 0 {
            return Err(GuardError::config("Audit batch size must be greater than 0"));
        }
        if self.audit.flush_interval_secs == 0 {
            return Err(GuardError::config(
                "Audit flush interval must be greater than 0",
            ));
        }
        if self.audit.traffic_high_water == 0 || self.audit.access_high_water == 0 {
            return Err(GuardError::config(
                "Audit high-water marks must be greater than 0",
            ));
        }
        if self.audit.queue_capacity < self.audit.traffic_high_water.max(self.audit.access_high_water)
        {
            return Err(GuardError::config(
                "Audit queue capacity must be at least the high-water mark",
            ));
        }
        if self.audit.traffic_retention_days > MAX_RETENTION_DAYS {
            return Err(GuardError::config(format!(
                "Retention window cannot exceed {} days",
                MAX_RETENTION_DAYS
            )));
        }
        if self.audit.retention_enabled() && self.audit.retention_interval_secs == 0 {
            return Err(GuardError::config(
                "Retention interval must be greater than 0",
            ));
        }

        let hash = &self.api_keys.hash;
        if hash.iterations == 0 || hash.parallelism == 0 || hash.memory_kib < 8 * hash.parallelism
        {
            return Err(GuardError::config(
                "Key hash parameters are out of range",
            ));
        }

        if self.database.url.is_empty() {
            return Err(GuardError::config("Database URL cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(GuardError::config("Server port cannot be 0"));
        }

        Ok(())
    }

    /// Create a default configuration file
    pub fn create_default_config(path: &PathBuf) -> Result<()> {
        let config = AppConfig::default();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_norway::to_string(&config)?;
        std::fs::write(path, yaml)?;

        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
