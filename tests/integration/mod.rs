//! Integration tests for access-guard
//!
//! These tests drive the management API and guarded routes through the full
//! middleware stack with a real (in-memory) database.

mod api_tests;
mod audit_tests;
mod guard_tests;
