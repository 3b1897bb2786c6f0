// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Airscout State Store
//!
//! Durable device state in a single SQLite file: one row per device with a
//! self-describing MessagePack blob (optionally zstd-compressed), plus
//! user-assigned names and tags keyed by `(phy_name, mac)` so annotations
//! survive eviction and re-keying across restarts.
//!
//! Row-level failures never stop a bulk operation: malformed blobs are
//! skipped with a warning, rows naming a PHY that has not registered yet
//! wait in a deferred queue, and flush failures are retried on the next
//! timer tick.

pub mod blob;
pub mod flusher;
pub mod store;

pub use blob::{decode_device_blob, encode_device_blob, StoredDevice, BLOB_VERSION};
pub use flusher::DeviceFlusher;
pub use store::{LoadStats, StateStore, SCHEMA_VERSION};

use thiserror::Error;

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// State store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("blob for {context} could not be decoded: {reason}")]
    Deserialize { context: String, reason: String },

    #[error("blob encoding failed: {0}")]
    Serialize(String),

    #[error("unsupported blob version {found} (supported <= {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("compression failure: {0}")]
    Compression(#[from] std::io::Error),

    #[error("malformed stored row: {0}")]
    MalformedRow(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for airscout_tracker::TrackerError {
    fn from(err: StoreError) -> Self {
        airscout_tracker::TrackerError::StoreFailure(err.to_string())
    }
}
