// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Tracked device records.
//!
//! A [`Device`] is the persistent entity the tracker accumulates packet
//! metadata into. Identity (`key`, `mac`, `phy_id`, ordinal) is immutable
//! and lock-free; everything observable mutates inside [`DeviceState`]
//! behind the per-device `RwLock`, which is the innermost lock in the
//! tracker's ordering.
//!
//! Every mutation that a client could observe bumps the modification
//! counter, so pollers can cheaply detect change.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use airscout_types::{DeviceKey, MacAddr};

use crate::packet::{CommonInfo, GpsFix, PacketDirection};
use crate::rrd::RollingRate;

/// Shared handle to a tracked device.
pub type DeviceRef = Arc<Device>;

/// Signal history for one device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalRecord {
    pub last_signal_dbm: Option<i32>,
    pub min_signal_dbm: Option<i32>,
    pub max_signal_dbm: Option<i32>,
    pub last_noise_dbm: Option<i32>,
    pub min_noise_dbm: Option<i32>,
    pub max_noise_dbm: Option<i32>,
    /// Location of the strongest observation.
    pub peak_location: Option<GpsFix>,
}

impl SignalRecord {
    /// True until the first signal observation lands.
    pub fn is_empty(&self) -> bool {
        self.last_signal_dbm.is_none() && self.last_noise_dbm.is_none()
    }

    fn merge(&mut self, signal: Option<i32>, noise: Option<i32>, gps: Option<GpsFix>) {
        if let Some(s) = signal {
            let new_peak = self.max_signal_dbm.map_or(true, |max| s > max);
            self.last_signal_dbm = Some(s);
            self.min_signal_dbm = Some(self.min_signal_dbm.map_or(s, |min| min.min(s)));
            self.max_signal_dbm = Some(self.max_signal_dbm.map_or(s, |max| max.max(s)));
            if new_peak {
                if let Some(fix) = gps {
                    if fix.fix >= 2 {
                        self.peak_location = Some(fix);
                    }
                }
            }
        }
        if let Some(n) = noise {
            self.last_noise_dbm = Some(n);
            self.min_noise_dbm = Some(self.min_noise_dbm.map_or(n, |min| min.min(n)));
            self.max_noise_dbm = Some(self.max_noise_dbm.map_or(n, |max| max.max(n)));
        }
    }
}

/// Geographic bounding box.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationBounds {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

/// Location history for one device: last fix, bounding box, running average.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationRecord {
    pub last: Option<GpsFix>,
    pub bounds: Option<LocationBounds>,
    agg_lat: f64,
    agg_lon: f64,
    agg_alt: f64,
    num_fixes: u64,
}

impl LocationRecord {
    pub fn has_fix(&self) -> bool {
        self.last.is_some()
    }

    /// Average of all accepted fixes, or `None` before the first one.
    pub fn average(&self) -> Option<GpsFix> {
        if self.num_fixes == 0 {
            return None;
        }
        let n = self.num_fixes as f64;
        Some(GpsFix {
            lat: self.agg_lat / n,
            lon: self.agg_lon / n,
            alt: self.agg_alt / n,
            fix: 3,
        })
    }

    pub fn num_fixes(&self) -> u64 {
        self.num_fixes
    }

    fn merge(&mut self, fix: &GpsFix) {
        self.last = Some(*fix);
        self.agg_lat += fix.lat;
        self.agg_lon += fix.lon;
        self.agg_alt += fix.alt;
        self.num_fixes += 1;
        self.bounds = Some(match self.bounds {
            None => LocationBounds {
                min_lat: fix.lat,
                min_lon: fix.lon,
                max_lat: fix.lat,
                max_lon: fix.lon,
            },
            Some(b) => LocationBounds {
                min_lat: b.min_lat.min(fix.lat),
                min_lon: b.min_lon.min(fix.lon),
                max_lat: b.max_lat.max(fix.lat),
                max_lon: b.max_lon.max(fix.lon),
            },
        });
    }
}

/// Bounded ring of past location fixes, kept only when history clouds are
/// enabled in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationCloud {
    fixes: std::collections::VecDeque<GpsFix>,
}

impl LocationCloud {
    const CAP: usize = 128;

    fn push(&mut self, fix: GpsFix) {
        self.fixes.push_back(fix);
        while self.fixes.len() > Self::CAP {
            self.fixes.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    pub fn fixes(&self) -> impl Iterator<Item = &GpsFix> {
        self.fixes.iter()
    }
}

/// Per-data-source observation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenbyRecord {
    pub first_seen: u64,
    pub last_seen: u64,
    pub num_packets: u64,
    /// Frequency histogram for this source; empty when per-source history
    /// is disabled.
    pub freq_hist: BTreeMap<u32, u64>,
}

/// The mutable portion of a device record.
///
/// Counters are monotonic non-decreasing except on reload from storage,
/// where they are restored verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceState {
    pub basic_type: String,
    pub commonname: String,
    pub username: String,
    pub tags: BTreeMap<String, String>,

    pub first_seen: u64,
    pub last_seen: u64,

    pub packets: u64,
    pub data_packets: u64,
    pub error_packets: u64,
    pub filter_packets: u64,
    pub crypt_packets: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub data_size: u64,

    pub channel: String,
    pub frequency: u32,
    pub crypt_set: u64,

    pub signal: SignalRecord,
    pub location: LocationRecord,
    pub location_cloud: Option<LocationCloud>,

    pub seenby: BTreeMap<Uuid, SeenbyRecord>,
    pub freq_hist: BTreeMap<u32, u64>,

    pub packets_rrd: Option<RollingRate>,

    mod_counter: u64,
}

impl DeviceState {
    /// Monotonic change counter; bumped on every observable mutation.
    pub fn mod_counter(&self) -> u64 {
        self.mod_counter
    }

    fn bump(&mut self) {
        self.mod_counter += 1;
    }

    /// Advance `last_seen`, never backward.
    pub fn touch(&mut self, ts: u64) {
        if ts > self.last_seen {
            self.last_seen = ts;
        }
        self.bump();
    }

    pub fn record_signal(&mut self, common: &CommonInfo, gps: Option<GpsFix>, empty_only: bool) {
        if empty_only && !self.signal.is_empty() {
            return;
        }
        if common.signal_dbm.is_none() && common.noise_dbm.is_none() {
            return;
        }
        self.signal.merge(common.signal_dbm, common.noise_dbm, gps);
        self.bump();
    }

    /// Count the packet's frequency. A zero frequency is skipped silently.
    pub fn record_frequency(&mut self, freq_mhz: u32, channel: &str) {
        if freq_mhz == 0 {
            return;
        }
        *self.freq_hist.entry(freq_mhz).or_insert(0) += 1;
        self.frequency = freq_mhz;
        if !channel.is_empty() {
            self.channel = channel.to_string();
        }
        self.bump();
    }

    pub fn record_packet(&mut self, common: &CommonInfo, ts: u64, filtered: bool) {
        self.packets += 1;
        if common.error {
            self.error_packets += 1;
        } else {
            self.data_packets += 1;
        }
        if filtered {
            self.filter_packets += 1;
        }
        if common.crypt_set != 0 {
            self.crypt_packets += 1;
        }
        match common.direction {
            PacketDirection::FromDevice => self.tx_packets += 1,
            PacketDirection::ToDevice => self.rx_packets += 1,
            PacketDirection::Unknown => {}
        }
        self.data_size += common.data_size;
        if let Some(rrd) = self.packets_rrd.as_mut() {
            rrd.record(ts, 1);
        }
        self.bump();
    }

    /// Merge a location fix. Fixes below 2D are skipped. When `history_cloud`
    /// is set, the fix is also appended to the bounded location cloud.
    pub fn record_location(&mut self, fix: &GpsFix, empty_only: bool, history_cloud: bool) {
        if fix.fix < 2 {
            return;
        }
        if empty_only && self.location.has_fix() {
            return;
        }
        self.location.merge(fix);
        if history_cloud {
            self.location_cloud.get_or_insert_with(Default::default).push(*fix);
        }
        self.bump();
    }

    pub fn record_seenby(&mut self, uuid: Uuid, ts: u64, freq_mhz: u32, persource_history: bool) {
        let entry = self.seenby.entry(uuid).or_insert(SeenbyRecord {
            first_seen: ts,
            last_seen: ts,
            num_packets: 0,
            freq_hist: BTreeMap::new(),
        });
        if ts > entry.last_seen {
            entry.last_seen = ts;
        }
        entry.num_packets += 1;
        if persource_history && freq_mhz != 0 {
            *entry.freq_hist.entry(freq_mhz).or_insert(0) += 1;
        }
        self.bump();
    }

    pub fn set_crypt(&mut self, crypt_set: u64) {
        if self.crypt_set != crypt_set {
            self.crypt_set = crypt_set;
            self.bump();
        }
    }

    pub fn set_basic_type(&mut self, basic_type: &str) {
        if !basic_type.is_empty() && self.basic_type != basic_type {
            self.basic_type = basic_type.to_string();
            self.bump();
        }
    }

    pub fn set_username(&mut self, username: &str) {
        self.username = username.to_string();
        self.bump();
    }

    pub fn set_tag(&mut self, tag: &str, content: &str) {
        if content.is_empty() {
            self.tags.remove(tag);
        } else {
            self.tags.insert(tag.to_string(), content.to_string());
        }
        self.bump();
    }
}

/// A tracked device: immutable identity plus locked mutable state.
#[derive(Debug)]
pub struct Device {
    key: DeviceKey,
    mac: MacAddr,
    phy_id: u32,
    ordinal: usize,
    state: RwLock<DeviceState>,
}

impl Device {
    /// Create a device first observed at `first_seen`.
    pub fn new(
        key: DeviceKey,
        mac: MacAddr,
        phy_id: u32,
        basic_type: &str,
        first_seen: u64,
        with_rrd: bool,
    ) -> Self {
        let state = DeviceState {
            basic_type: basic_type.to_string(),
            first_seen,
            last_seen: first_seen,
            packets_rrd: with_rrd.then(RollingRate::default),
            ..Default::default()
        };
        Self {
            key,
            mac,
            phy_id,
            ordinal: usize::MAX,
            state: RwLock::new(state),
        }
    }

    /// Rebuild a device from stored state; counters and timestamps are
    /// taken verbatim.
    pub fn from_state(key: DeviceKey, mac: MacAddr, phy_id: u32, state: DeviceState) -> Self {
        Self {
            key,
            mac,
            phy_id,
            ordinal: usize::MAX,
            state: RwLock::new(state),
        }
    }

    pub fn key(&self) -> DeviceKey {
        self.key
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn phy_id(&self) -> u32 {
        self.phy_id
    }

    /// Dense index position, stable for the device's lifetime. Assigned at
    /// insertion.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub(crate) fn set_ordinal(&mut self, ordinal: usize) {
        self.ordinal = ordinal;
    }

    /// Read access to the mutable state (innermost lock).
    pub fn state(&self) -> RwLockReadGuard<'_, DeviceState> {
        self.state.read()
    }

    /// Write access to the mutable state (innermost lock).
    pub fn state_mut(&self) -> RwLockWriteGuard<'_, DeviceState> {
        self.state.write()
    }

    pub fn last_seen(&self) -> u64 {
        self.state.read().last_seen
    }

    pub fn first_seen(&self) -> u64 {
        self.state.read().first_seen
    }

    pub fn packets(&self) -> u64 {
        self.state.read().packets
    }
}
