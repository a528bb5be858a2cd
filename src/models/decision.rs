//! Access decisions

use serde::Serialize;
use serde_json::{Map, Value};

use crate::utils::error::ValidationError;

/// Outcome of evaluating one request
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Machine-readable reason identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            ..Default::default()
        }
    }

    pub fn deny(error: ValidationError) -> Self {
        error.into()
    }

    /// Deny with a free-form reason (custom strategies)
    pub fn deny_with_reason(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            code: Some("custom".to_string()),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }
}

impl From<ValidationError> for Decision {
    fn from(error: ValidationError) -> Self {
        let mut metadata = Map::new();
        match &error {
            ValidationError::IpBlacklisted { pattern, .. } => {
                metadata.insert("matchedPattern".into(), pattern.clone().into());
            }
            ValidationError::ScopeMissing(missing) => {
                metadata.insert("missingScopes".into(), missing.clone().into());
            }
            ValidationError::CombinedRequirementUnmet(requirement) => {
                metadata.insert("requirement".into(), requirement.to_string().into());
            }
            _ => {}
        }
        Self {
            allowed: false,
            reason: Some(error.to_string()),
            code: Some(error.code().to_string()),
            metadata,
        }
    }
}
