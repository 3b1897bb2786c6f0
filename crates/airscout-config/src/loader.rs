// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! Loading is layered:
//! 1. TOML file (base values)
//! 2. Environment variables (runtime overrides)

use crate::{validate_config, AirscoutConfig, ConfigError, ConfigResult, PersistentLoadMode};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Find the airscout configuration file
///
/// Search order:
/// 1. `AIRSCOUT_CONFIG_PATH` environment variable
/// 2. Current working directory: `./airscout.toml`
/// 3. Parent directory: `../airscout.toml`
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file exists in any
/// location.
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("AIRSCOUT_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "config file specified by AIRSCOUT_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join("airscout.toml"));
        if let Some(parent) = cwd.parent() {
            search_paths.push(parent.join("airscout.toml"));
        }
    }

    for path in &search_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(search_list))
}

/// Load, override, and validate the configuration.
///
/// # Arguments
///
/// * `config_path` - Optional explicit file path. If `None`, the file is
///   searched for; if none exists, defaults are used.
pub fn load_config(config_path: Option<&Path>) -> ConfigResult<AirscoutConfig> {
    let mut config = match config_path {
        Some(path) => parse_file(path)?,
        None => match find_config_file() {
            Ok(path) => parse_file(&path)?,
            Err(ConfigError::FileNotFound(_)) => {
                debug!("no airscout.toml found, using built-in defaults");
                AirscoutConfig::default()
            }
            Err(e) => return Err(e),
        },
    };

    apply_environment_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_file(path: &Path) -> ConfigResult<AirscoutConfig> {
    let contents = fs::read_to_string(path)?;
    let config = toml::from_str(&contents)?;
    debug!("loaded configuration from {}", path.display());
    Ok(config)
}

/// Apply `AIRSCOUT_*` environment variable overrides.
///
/// Recognized variables map 1:1 to config options, e.g.
/// `AIRSCOUT_TRACKER_MAX_DEVICES`, `AIRSCOUT_PERSISTENT_LOAD`.
pub fn apply_environment_overrides(config: &mut AirscoutConfig) -> ConfigResult<()> {
    if let Some(v) = env_parse::<u64>("AIRSCOUT_TRACKER_DEVICE_TIMEOUT")? {
        config.tracker.device_timeout = v;
    }
    if let Some(v) = env_parse::<usize>("AIRSCOUT_TRACKER_MAX_DEVICES")? {
        config.tracker.max_devices = v;
    }
    if let Some(v) = env_parse::<u64>("AIRSCOUT_TRACKER_DEVICE_PACKETS")? {
        config.tracker.device_packets = v;
    }
    if let Ok(v) = env::var("AIRSCOUT_PERSISTENT_LOAD") {
        config.persistence.load = match v.to_lowercase().as_str() {
            "onstart" => PersistentLoadMode::OnStart,
            "ondemand" => PersistentLoadMode::OnDemand,
            other => {
                return Err(ConfigError::InvalidValue {
                    option: "AIRSCOUT_PERSISTENT_LOAD".to_string(),
                    reason: format!("expected 'onstart' or 'ondemand', got '{}'", other),
                })
            }
        };
    }
    if let Ok(v) = env::var("AIRSCOUT_PERSISTENT_PATH") {
        config.persistence.path = PathBuf::from(v);
    }
    if let Some(v) = env_parse::<bool>("AIRSCOUT_PERSISTENT_COMPRESSION")? {
        config.persistence.compression = v;
    }
    if let Some(v) = env_parse::<bool>("AIRSCOUT_RAM_NO_RRD")? {
        config.memory.ram_no_rrd = v;
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> ConfigResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            option: name.to_string(),
            reason: format!("could not parse '{}'", raw),
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("airscout.toml");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[tracker]\ndevice_timeout = 120\n\n[memory]\nram_no_rrd = true"
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.tracker.device_timeout, 120);
        assert!(config.memory.ram_no_rrd);
        assert!(config.views.map_seenby_views);
    }

    #[test]
    fn test_bad_toml_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("airscout.toml");
        fs::write(&path, "[tracker\nbroken").unwrap();
        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::Parse(_))
        ));
    }
}
