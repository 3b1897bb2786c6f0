// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Airscout Configuration System
//!
//! Type-safe configuration loader for the airscout tracker:
//! - TOML file parsing (`airscout.toml`)
//! - Environment variable overrides (`AIRSCOUT_*`)
//! - Validation of interdependent options
//!
//! Every section has complete defaults, so a missing file or empty table
//! yields a runnable configuration.

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{find_config_file, load_config};
pub use types::*;
pub use validation::validate_config;

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found, searched: {0}")]
    FileNotFound(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML syntax: {0}")]
    Parse(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid configuration value for {option}: {reason}")]
    InvalidValue { option: String, reason: String },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
