// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Airscout - Wireless Device Tracker Core
//!
//! Airscout is the tracking core of a wireless sniffer: it ingests parsed
//! packet metadata from physical-layer (PHY) handlers, classifies it into
//! persistent device records, maintains concurrent multi-index lookups over
//! those records, projects the population into predicate-filtered views,
//! expires stale devices under memory pressure, and persists state to a
//! single-file database.
//!
//! ## Workspace Crates
//!
//! - **`airscout-types`**: MAC addresses, composite device keys, PHY ids
//! - **`airscout-config`**: TOML configuration with env overrides
//! - **`airscout-tracker`**: device index, PHY registry, views, eviction,
//!   filter workers, event bus
//! - **`airscout-store`**: durable device state (SQLite + MessagePack blobs)
//! - **`airscout-services`**: transport-agnostic service layer for the HTTP
//!   surface
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use airscout::prelude::*;
//!
//! let config = AirscoutConfig::default();
//! let tracker = DeviceTracker::new(&config.tracker, &config.views, &config.memory);
//!
//! // PHY handlers register themselves and feed packets through
//! // `DeviceTracker::update_common_device`; the HTTP layer consumes
//! // snapshots through `airscout_services::DeviceServiceImpl`.
//! ```

pub use airscout_config as config;
pub use airscout_services as services;
pub use airscout_store as store;
pub use airscout_tracker as tracker;
pub use airscout_types as types;

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commonly used types, re-exported for convenience.
pub mod prelude {
    pub use airscout_config::AirscoutConfig;
    pub use airscout_tracker::{
        CommonInfo, DeviceRef, DeviceTracker, Packet, PhyHandler, TrackerEvent, UpdateFlags,
    };
    pub use airscout_types::{DeviceKey, MacAddr};
}
