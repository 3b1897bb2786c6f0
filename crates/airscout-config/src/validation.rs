// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation

use crate::{AirscoutConfig, ConfigError, ConfigResult};

/// Validate interdependent configuration options.
///
/// A `0` in a limit or timeout option disables that feature and is always
/// accepted; intervals and batch sizes, however, must be positive.
pub fn validate_config(config: &AirscoutConfig) -> ConfigResult<()> {
    if config.tracker.sweep_interval == 0 {
        return Err(ConfigError::Validation(
            "tracker.sweep_interval must be positive".to_string(),
        ));
    }

    if config.tracker.worker_batch_size == 0 {
        return Err(ConfigError::Validation(
            "tracker.worker_batch_size must be positive".to_string(),
        ));
    }

    if config.persistence.enabled && config.persistence.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "persistence.path must be set when persistence is enabled".to_string(),
        ));
    }

    // An idle timeout shorter than the sweep interval still works but the
    // effective resolution is the sweep interval; warn-level mismatches are
    // left to the caller.
    Ok(())
}
