//! Common test utilities and helpers
//!
//! This module provides shared test infrastructure including:
//! - Test fixtures
//! - Mock stores and sinks
//! - API test client over an in-memory database

pub mod mocks;
pub mod test_app;

pub use fixtures::*;
pub use mocks::*;
pub use test_app::*;
