// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Packet metadata as seen by the tracker.
//!
//! The tracker never touches raw frames. The capture/dissection chain hands
//! it a [`Packet`] carrying zero or more [`CommonInfo`] components, the
//! per-packet parsed fields every PHY shares: addressing, signal, frequency,
//! timestamp, and the observing data source.

use airscout_types::MacAddr;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

bitflags::bitflags! {
    /// Facet selection for [`crate::DeviceTracker::update_common_device`].
    ///
    /// PHY handlers pass the union of facets the packet actually carries;
    /// the modifier bits (`EXISTING_ONLY`, `EMPTY_*`) change how the merge
    /// behaves rather than what is merged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UpdateFlags: u32 {
        /// Merge signal levels (min/max/last RSSI, noise).
        const SIGNAL = 1;
        /// Increment the frequency histogram by the packet's frequency.
        const FREQUENCIES = 1 << 1;
        /// Increment total/data/error packet counters.
        const PACKETS = 1 << 2;
        /// Merge location: bounding box, last fix, running average.
        const LOCATION = 1 << 3;
        /// Upsert the seenby record for the packet's data source.
        const SEENBY = 1 << 4;
        /// Overwrite the encryption set from the common info.
        const ENCRYPTION = 1 << 5;
        /// Never create a device; fail with `NotFound` when absent.
        const EXISTING_ONLY = 1 << 6;
        /// Only write signal if the existing record is uninitialised.
        const EMPTY_SIGNAL = 1 << 7;
        /// Only write location if the existing record has no fix.
        const EMPTY_LOCATION = 1 << 8;
    }
}

impl UpdateFlags {
    /// The facets a fully-parsed data packet normally carries.
    pub fn standard() -> Self {
        UpdateFlags::SIGNAL
            | UpdateFlags::FREQUENCIES
            | UpdateFlags::PACKETS
            | UpdateFlags::LOCATION
            | UpdateFlags::SEENBY
            | UpdateFlags::ENCRYPTION
    }
}

/// A GPS fix attached to a packet.
///
/// `fix` follows receiver convention: 0/1 none, 2 = 2D, 3 = 3D. Location
/// merges ignore fixes below 2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub fix: u8,
}

/// Direction of a frame relative to the tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PacketDirection {
    #[default]
    Unknown,
    ToDevice,
    FromDevice,
}

/// Parsed fields shared across PHYs for one logical device sighting.
#[derive(Debug, Clone, Default)]
pub struct CommonInfo {
    /// Registered PHY id that produced this record.
    pub phy_id: i32,

    /// Address of the device this component describes.
    pub device: MacAddr,

    /// Basic device classification the dissector assigned ("Wi-Fi AP",
    /// "BTLE", ...).
    pub basic_type: String,

    /// Frequency the frame was observed on, MHz. 0 = unknown.
    pub freq_mhz: u32,

    /// Human-readable channel, PHY-specific ("6", "11HT40+", ...).
    pub channel: String,

    /// Last RSSI in dBm, if the radio reported one.
    pub signal_dbm: Option<i32>,

    /// Noise floor in dBm, if the radio reported one.
    pub noise_dbm: Option<i32>,

    /// Encryption option bitset, PHY-specific encoding.
    pub crypt_set: u64,

    /// Frame payload size in bytes.
    pub data_size: u64,

    /// Frame failed checksum or was otherwise invalid.
    pub error: bool,

    /// Direction of the frame relative to the device, for tx/rx counters.
    pub direction: PacketDirection,

    /// Capture source that observed the frame.
    pub source_uuid: Option<Uuid>,
}

/// One captured packet with its dissected components.
#[derive(Debug, Default)]
pub struct Packet {
    /// Capture timestamp, monotonic seconds.
    pub ts: u64,

    /// GPS fix at capture time, if any.
    pub gps: Option<GpsFix>,

    /// True when the packet was dropped by a capture filter.
    pub filtered: bool,

    /// Common-info components dissected out of the frame, one per device
    /// the frame describes.
    pub commons: Vec<CommonInfo>,

    classified: AtomicBool,
}

impl Packet {
    pub fn new(ts: u64) -> Self {
        Self {
            ts,
            ..Default::default()
        }
    }

    /// Mark the packet counted by the PHY classifier. Returns `false` if it
    /// was already marked, making classification idempotent per packet.
    pub(crate) fn mark_classified(&self) -> bool {
        !self.classified.swap(true, Ordering::AcqRel)
    }
}

impl Clone for Packet {
    fn clone(&self) -> Self {
        Self {
            ts: self.ts,
            gps: self.gps,
            filtered: self.filtered,
            commons: self.commons.clone(),
            classified: AtomicBool::new(self.classified.load(Ordering::Acquire)),
        }
    }
}
