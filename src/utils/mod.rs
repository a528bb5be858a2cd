//! Utility modules

pub mod address;
pub mod error;
pub mod validation;

pub use error::{AppError, ErrorResponse, GuardError, ValidationError};
