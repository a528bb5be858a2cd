//! Error types and handling
//!
//! Three families live here:
//! - [`GuardError`]: fatal startup misconfiguration
//! - [`ValidationError`]: per-request denial reasons, each with a stable code
//! - [`AppError`]: management API errors rendered as JSON responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::models::{IpVersionConstraint, Requirement};

/// Engine-level errors
#[derive(Debug, Error)]
pub enum GuardError {
    /// Fatal startup misconfiguration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GuardError {
    pub fn config(message: impl Into<String>) -> Self {
        GuardError::Configuration(message.into())
    }
}

/// Reasons a single request is denied
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("IP {0} is not in the allow list")]
    IpNotAllowed(String),

    #[error("IP {ip} is blacklisted (matched {pattern})")]
    IpBlacklisted { ip: String, pattern: String },

    #[error("IP version mismatch: expected {expected}, got {actual}")]
    IpVersionMismatch {
        expected: IpVersionConstraint,
        actual: String,
    },

    #[error("API key is required")]
    ApiKeyMissing,

    #[error("Invalid API key")]
    ApiKeyInvalid,

    #[error("API key has expired")]
    ApiKeyExpired,

    #[error("Missing required scopes: {}", .0.join(", "))]
    ScopeMissing(Vec<String>),

    #[error("Combined requirement not met: {0}")]
    CombinedRequirementUnmet(Requirement),

    /// A key check failed internally (predicate error, store outage)
    #[error("API key validation error")]
    KeyValidationFailed,

    #[error("Validation strategy '{0}' not found")]
    StrategyNotFound(String),

    #[error("Access denied")]
    AccessDenied,

    #[error("Access evaluation failed")]
    EvaluationFailed,
}

impl ValidationError {
    /// Stable machine-readable identifier
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::IpNotAllowed(_) => "ip_not_allowed",
            ValidationError::IpBlacklisted { .. } => "ip_blacklisted",
            ValidationError::IpVersionMismatch { .. } => "ip_version_mismatch",
            ValidationError::ApiKeyMissing => "api_key_missing",
            ValidationError::ApiKeyInvalid => "api_key_invalid",
            ValidationError::ApiKeyExpired => "api_key_expired",
            ValidationError::ScopeMissing(_) => "scope_missing",
            ValidationError::CombinedRequirementUnmet(_) => "combined_requirement_unmet",
            ValidationError::KeyValidationFailed => "key_validation_failed",
            ValidationError::StrategyNotFound(_) => "strategy_not_found",
            ValidationError::AccessDenied => "access_denied",
            ValidationError::EvaluationFailed => "evaluation_failed",
        }
    }
}

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Unprocessable entity - validation failed (422)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal(message.into())
    }
}

/// Error response body
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Error code for programmatic handling (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
            code: None,
        }
    }

    /// Add details to the error response
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Add an error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, should_log) = match &self {
            AppError::ValidationError(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", false)
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", true),
        };

        // Log server errors
        if should_log {
            error!(error = %self, error_type = error_type, "Request error");
        }

        let body = ErrorResponse::new(error_type, self.to_string());

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}
