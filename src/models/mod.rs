//! Data models

mod api_key;
mod audit;
mod client;
mod decision;
mod rules;

pub use api_key::*;
pub use audit::*;
pub use client::*;
pub use decision::*;
pub use rules::*;
