// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Device blob codec.
//!
//! A stored device is a self-describing MessagePack record: a header
//! (blob version, phy name, mac, first/last seen) plus the full mutable
//! state encoded as named maps, so fields added in later versions
//! deserialize as their defaults and older blobs upgrade in memory.
//!
//! Compression is optional and detected on read by the zstd frame magic,
//! so a store written with compression on can be read with it off and
//! vice versa.

use serde::{Deserialize, Serialize};
use tracing::debug;

use airscout_tracker::DeviceState;
use airscout_types::MacAddr;

use crate::{Result, StoreError};

/// Current blob format version.
pub const BLOB_VERSION: u32 = 2;

/// zstd frame magic, little-endian.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Compression level for device blobs; they are small and written in bulk,
/// so favor speed.
const ZSTD_LEVEL: i32 = 3;

/// Self-describing stored form of one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDevice {
    pub version: u32,
    pub phy_name: String,
    pub mac: MacAddr,
    pub key_salt: u64,
    pub first_seen: u64,
    pub last_seen: u64,
    pub state: DeviceState,
}

/// Encode a stored device, optionally compressing the result.
pub fn encode_device_blob(stored: &StoredDevice, compress: bool) -> Result<Vec<u8>> {
    let raw = rmp_serde::to_vec_named(stored).map_err(|e| StoreError::Serialize(e.to_string()))?;
    if !compress {
        return Ok(raw);
    }
    let compressed = zstd::bulk::compress(&raw, ZSTD_LEVEL)?;
    Ok(compressed)
}

/// Decode a device blob, transparently decompressing and upgrading older
/// versions.
pub fn decode_device_blob(blob: &[u8], context: &str) -> Result<StoredDevice> {
    let raw;
    let payload: &[u8] = if blob.starts_with(&ZSTD_MAGIC) {
        raw = zstd::bulk::decompress(blob, MAX_BLOB_SIZE)?;
        &raw
    } else {
        blob
    };

    let mut stored: StoredDevice =
        rmp_serde::from_slice(payload).map_err(|e| StoreError::Deserialize {
            context: context.to_string(),
            reason: e.to_string(),
        })?;

    if stored.version > BLOB_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: stored.version,
            supported: BLOB_VERSION,
        });
    }
    if stored.version < BLOB_VERSION {
        debug!(
            "upgrading stored device {} from blob v{} to v{}",
            context, stored.version, BLOB_VERSION
        );
        stored.version = BLOB_VERSION;
    }

    Ok(stored)
}

/// Decompression bound; a device state far beyond this is corrupt.
const MAX_BLOB_SIZE: usize = 16 * 1024 * 1024;
