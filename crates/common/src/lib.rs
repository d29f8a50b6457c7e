//! Vigil Common Library
//!
//! Shared types, patterns, errors and configuration for the vigil
//! interaction-verification harness.

pub mod config;
pub mod error;
pub mod pattern;
pub mod types;

pub use config::{HarnessConfig, WaitPolicy};
pub use error::{Error, Result};
pub use pattern::{EventPattern, MatchStrength};
pub use types::*;

/// Vigil version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
