// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! The authoritative device index.
//!
//! Four structures held under one read/write lock:
//! - primary map `key -> DeviceRef` (injective on key)
//! - MAC multimap `mac -> [DeviceRef]` (several PHYs may see one MAC)
//! - ordinal vector, dense, tombstoned on removal, never reordered
//! - immutable snapshot vector, regenerated on structural change so
//!   readers iterate without holding the index lock
//!
//! The `full_refresh_time` watermark advances on every removal; HTTP
//! clients use it to decide when an incremental poll is no longer valid.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use airscout_types::{DeviceKey, MacAddr};

use crate::device::{Device, DeviceRef};
use crate::{Result, TrackerError};

struct IndexInner {
    by_key: AHashMap<DeviceKey, DeviceRef>,
    by_mac: AHashMap<MacAddr, Vec<DeviceRef>>,
    ordinals: Vec<Option<DeviceRef>>,
    snapshot: Arc<Vec<DeviceRef>>,
}

impl IndexInner {
    fn rebuild_snapshot(&mut self) {
        self.snapshot = Arc::new(self.ordinals.iter().flatten().cloned().collect());
    }
}

/// Multi-index concurrent device store.
pub struct DeviceIndex {
    inner: RwLock<IndexInner>,
    full_refresh_time: AtomicU64,
}

impl DeviceIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner {
                by_key: AHashMap::new(),
                by_mac: AHashMap::new(),
                ordinals: Vec::new(),
                snapshot: Arc::new(Vec::new()),
            }),
            full_refresh_time: AtomicU64::new(0),
        }
    }

    pub fn fetch(&self, key: &DeviceKey) -> Option<DeviceRef> {
        self.inner.read().by_key.get(key).cloned()
    }

    pub fn contains(&self, key: &DeviceKey) -> bool {
        self.inner.read().by_key.contains_key(key)
    }

    /// All devices sharing a MAC, in insertion order.
    pub fn fetch_by_mac(&self, mac: &MacAddr) -> Vec<DeviceRef> {
        self.inner
            .read()
            .by_mac
            .get(mac)
            .cloned()
            .unwrap_or_default()
    }

    /// Insert a freshly created device, assigning its ordinal.
    ///
    /// # Errors
    ///
    /// `Duplicate` if the key is already present; duplicates out of the
    /// update pipeline indicate a bug upstream.
    pub fn insert(&self, mut device: Device) -> Result<DeviceRef> {
        let mut inner = self.inner.write();
        if inner.by_key.contains_key(&device.key()) {
            return Err(TrackerError::Duplicate(device.key()));
        }

        device.set_ordinal(inner.ordinals.len());
        let device = Arc::new(device);

        inner.by_key.insert(device.key(), Arc::clone(&device));
        inner
            .by_mac
            .entry(device.mac())
            .or_default()
            .push(Arc::clone(&device));
        inner.ordinals.push(Some(Arc::clone(&device)));
        inner.rebuild_snapshot();

        Ok(device)
    }

    /// Remove a device: drop it from the primary map and MAC multimap,
    /// tombstone its ordinal slot, and advance the refresh watermark.
    ///
    /// The record itself may outlive removal while in-flight readers hold
    /// snapshot references.
    pub fn remove(&self, key: &DeviceKey, now: u64) -> Option<DeviceRef> {
        let mut inner = self.inner.write();
        let device = inner.by_key.remove(key)?;

        if let Some(shared) = inner.by_mac.get_mut(&device.mac()) {
            shared.retain(|d| d.key() != *key);
            if shared.is_empty() {
                inner.by_mac.remove(&device.mac());
            }
        }

        inner.ordinals[device.ordinal()] = None;
        inner.rebuild_snapshot();
        drop(inner);

        self.update_full_refresh(now);
        Some(device)
    }

    /// The current immutable device vector, ordinal order. Cheap: clones an
    /// `Arc`.
    pub fn snapshot(&self) -> Arc<Vec<DeviceRef>> {
        Arc::clone(&self.inner.read().snapshot)
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_key.is_empty()
    }

    /// Monotonic watermark of the last structural removal.
    pub fn full_refresh_time(&self) -> u64 {
        self.full_refresh_time.load(Ordering::Acquire)
    }

    pub fn update_full_refresh(&self, now: u64) {
        self.full_refresh_time.fetch_max(now, Ordering::AcqRel);
    }
}

impl Default for DeviceIndex {
    fn default() -> Self {
        Self::new()
    }
}
