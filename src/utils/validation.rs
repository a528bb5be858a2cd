//! Input validation utilities

use once_cell::sync::Lazy;
use regex::Regex;

/// HTTP header field names (RFC 9110 token characters)
static HEADER_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[!#$%&'*+.^_`|~0-9A-Za-z-]+$").unwrap());

/// Scope names such as `read`, `keys:admin`, `audit.read`
static SCOPE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9:._-]*$").unwrap());

/// Validate a header name used to carry the key or client MAC
pub fn validate_header_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= 128 && HEADER_NAME_REGEX.is_match(name)
}

/// Validate a scope name
pub fn validate_scope(scope: &str) -> bool {
    !scope.is_empty() && scope.len() <= 100 && SCOPE_REGEX.is_match(scope)
}
