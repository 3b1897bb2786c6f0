// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wire DTOs for the HTTP surface.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Summary form of one tracked device, the default projection for view
/// and multimac snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "key": "00000000_000000000000_AABBCCDDEEFF",
    "mac": "aa:bb:cc:dd:ee:ff",
    "phy": "IEEE802.11",
    "basic_type": "Wi-Fi AP",
    "commonname": "lab-ap",
    "username": "printer-corner",
    "first_seen": 1756001000,
    "last_seen": 1756001742,
    "packets": 4182,
    "data_size": 1048576,
    "channel": "6",
    "frequency": 2437,
    "signal_dbm": -47,
    "mod_counter": 9310
}))]
pub struct DeviceSummaryDto {
    /// Composite device key, stable across polls
    pub key: String,

    /// Hardware address in colon form
    pub mac: String,

    /// Name of the PHY that tracks this device
    pub phy: String,

    /// Basic classification the dissector assigned ("Wi-Fi AP", "BTLE", ...)
    pub basic_type: String,

    /// Advertised or derived common name (SSID, BT name, ...)
    pub commonname: String,

    /// User-assigned name, persisted across restarts
    pub username: String,

    /// First observation, seconds
    pub first_seen: u64,

    /// Most recent observation, seconds
    pub last_seen: u64,

    /// Total packets attributed to this device
    pub packets: u64,

    /// Total payload bytes observed
    pub data_size: u64,

    /// Last channel the device was seen on, PHY-specific form
    pub channel: String,

    /// Last observed frequency, MHz
    pub frequency: u32,

    /// Last RSSI in dBm, absent until a radio reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_dbm: Option<i32>,

    /// Modification counter for cheap change detection.
    pub mod_counter: u64,
}

/// One registered PHY with its population and traffic counters.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": 0,
    "name": "IEEE802.11",
    "device_count": 213,
    "packet_count": 812345
}))]
pub struct PhyEntryDto {
    /// Registry-assigned PHY id, stable for the process lifetime
    pub id: u32,

    /// Unique PHY name
    pub name: String,

    /// Devices currently tracked under this PHY
    pub device_count: usize,

    /// Packets classified to this PHY
    pub packet_count: u64,
}

/// Body of `POST /devices/multimac/devices.json`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "devices": ["aa:bb:cc:dd:ee:ff", "aa:bb:cc:00:00:00/ff:ff:ff:00:00:00"],
    "fields": ["key", "packets", "last_seen"]
}))]
pub struct MultiMacRequestDto {
    /// MAC addresses to resolve; masked forms match ranges.
    pub devices: Vec<String>,

    /// Optional top-level field subset applied to each returned device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

/// One entry of the multimac response: every device sharing a requested
/// MAC, as (optionally field-filtered) device objects.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "mac": "aa:bb:cc:dd:ee:ff",
    "devices": [{"key": "00000000_000000000000_AABBCCDDEEFF", "packets": 4182}]
}))]
pub struct MultiMacEntryDto {
    /// The requested MAC, echoed back verbatim
    pub mac: String,

    /// Matching devices; empty when nothing shares the MAC
    #[schema(value_type = Vec<Object>)]
    pub devices: Vec<serde_json::Value>,
}

/// Body of `POST /devices/<key>/set_name`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "username": "printer-corner"
}))]
pub struct SetNameRequestDto {
    /// New user-assigned device name; persisted by `(phy, mac)`
    pub username: String,
}

/// Body of `POST /devices/<key>/set_tag`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "tag": "room",
    "content": "413"
}))]
pub struct SetTagRequestDto {
    /// Tag name
    pub tag: String,

    /// Empty content clears the tag.
    #[serde(default)]
    pub content: String,
}

/// Descriptor of a registered view.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "phy-IEEE802.11",
    "description": "IEEE802.11 devices",
    "device_count": 213
}))]
pub struct ViewDescriptorDto {
    /// Unique view id, as used in the view snapshot endpoint path
    pub id: String,

    /// Human-readable description
    pub description: String,

    /// Current membership size
    pub device_count: usize,
}

/// Tracker-wide counters for status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "num_devices": 213,
    "num_packets": 812345,
    "num_data_packets": 790112,
    "num_error_packets": 22233,
    "num_filter_packets": 0,
    "full_refresh_time": 1756001700
}))]
pub struct TrackerStatusDto {
    /// Devices currently tracked
    pub num_devices: usize,

    /// Total packets classified
    pub num_packets: u64,

    /// Packets that parsed cleanly
    pub num_data_packets: u64,

    /// Packets that failed checksum or dissection
    pub num_error_packets: u64,

    /// Packets dropped by capture filters
    pub num_filter_packets: u64,

    /// Watermark of the last structural removal; clients with an older
    /// poll timestamp must re-snapshot.
    pub full_refresh_time: u64,
}
