//! Middleware components
//!
//! This module contains middleware for:
//! - Client address extraction (socket peer, forwarded headers, MAC header)
//! - Access guarding and traffic logging

pub mod client_info;
pub mod guard;

pub use client_info::derive_client_info;
pub use guard::{denial_response, guard_middleware, guarded};
