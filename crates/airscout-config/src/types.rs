// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `airscout.toml`. Defaults mirror the shipped example configuration;
//! a value of `0` disables the corresponding limit or timeout.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AirscoutConfig {
    pub tracker: TrackerConfig,
    pub persistence: PersistenceConfig,
    pub views: ViewsConfig,
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

/// Device tracking and eviction limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds a device may stay idle before the timeout sweep removes it.
    /// 0 disables idle eviction.
    pub device_timeout: u64,

    /// Hard cap on tracked devices; oldest-by-last-seen are evicted above
    /// it. 0 disables the cap.
    pub max_devices: usize,

    /// Minimum packet count before a device is eligible for idle eviction.
    pub device_packets: u64,

    /// Interval between eviction sweeps, seconds.
    pub sweep_interval: u64,

    /// Chunk size for batched filter workers.
    pub worker_batch_size: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            device_timeout: 0,
            max_devices: 0,
            device_packets: 2,
            sweep_interval: 60,
            worker_batch_size: 1024,
        }
    }
}

/// Durable device state
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Master switch for the state store.
    pub enabled: bool,

    /// Database file location.
    pub path: PathBuf,

    /// `onstart` rehydrates everything at boot; `ondemand` loads rows as
    /// lookups miss.
    pub load: PersistentLoadMode,

    /// Rows idle longer than this many seconds are purged on load.
    /// 0 keeps everything.
    pub timeout: u64,

    /// Compress device blobs with zstd.
    pub compression: bool,

    /// Seconds between background flushes of dirty devices. 0 disables the
    /// flush timer (devices are still stored on shutdown).
    pub flush_interval: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("airscout_devices.db"),
            load: PersistentLoadMode::OnStart,
            timeout: 86400 * 7,
            compression: true,
            flush_interval: 60,
        }
    }
}

/// Rehydration strategy for stored devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistentLoadMode {
    #[default]
    OnStart,
    OnDemand,
}

/// Auto-created view families
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ViewsConfig {
    /// Maintain one view per registered PHY.
    pub map_phy_views: bool,

    /// Maintain one view per observed data-source UUID.
    pub map_seenby_views: bool,
}

impl Default for ViewsConfig {
    fn default() -> Self {
        Self {
            map_phy_views: true,
            map_seenby_views: true,
        }
    }
}

/// Memory-pressure trade-offs
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Disable all rolling-rate records (tracker-level and per-device).
    pub ram_no_rrd: bool,

    /// Maintain per-device location history.
    pub track_history_cloud: bool,

    /// Maintain per-source frequency histograms in seenby records.
    pub track_persource_history: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ram_no_rrd: false,
            track_history_cloud: true,
            track_persource_history: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter directive, e.g. `info` or `airscout_tracker=debug`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_runnable() {
        let config = AirscoutConfig::default();
        assert!(config.persistence.enabled);
        assert_eq!(config.tracker.worker_batch_size, 1024);
        assert_eq!(config.persistence.load, PersistentLoadMode::OnStart);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: AirscoutConfig = toml::from_str("").unwrap();
        assert_eq!(config.tracker.sweep_interval, 60);
        assert!(config.views.map_phy_views);
    }

    #[test]
    fn test_partial_section_fills_rest() {
        let config: AirscoutConfig = toml::from_str(
            r#"
            [tracker]
            max_devices = 5000

            [persistence]
            load = "ondemand"
            "#,
        )
        .unwrap();
        assert_eq!(config.tracker.max_devices, 5000);
        assert_eq!(config.tracker.worker_batch_size, 1024);
        assert_eq!(config.persistence.load, PersistentLoadMode::OnDemand);
        assert!(config.persistence.compression);
    }
}
