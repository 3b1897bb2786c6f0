// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Predicate-filtered projections of the device index.
//!
//! A view holds non-owning-in-spirit (shared) references to the devices
//! its predicate currently matches, ordered by ordinal. Views never mutate
//! devices; the tracker pushes add/update/remove notifications and each
//! view promotes or demotes membership by re-evaluating its predicate.
//!
//! The registry mutex guards the list of views; each view's contents have
//! their own mutex (locks 2 and 3 in the tracker ordering).

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::device::{Device, DeviceRef};

/// Membership predicate. Must be cheap; it runs on the packet path.
pub type ViewPredicate = Arc<dyn Fn(&Device) -> bool + Send + Sync>;

/// One named sub-population of the device index.
pub struct DeviceView {
    id: String,
    description: String,
    predicate: ViewPredicate,
    contents: Mutex<Vec<DeviceRef>>,
}

impl DeviceView {
    pub fn new(id: impl Into<String>, description: impl Into<String>, predicate: ViewPredicate) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            predicate,
            contents: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn len(&self) -> usize {
        self.contents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.lock().is_empty()
    }

    /// Current membership, ordinal order.
    pub fn snapshot(&self) -> Vec<DeviceRef> {
        self.contents.lock().clone()
    }

    pub fn contains(&self, device: &DeviceRef) -> bool {
        self.contents
            .lock()
            .binary_search_by_key(&device.ordinal(), |d| d.ordinal())
            .is_ok()
    }

    /// A device entered the index.
    pub fn new_device(&self, device: &DeviceRef) {
        if (self.predicate)(device) {
            self.promote(device);
        }
    }

    /// A device changed; re-evaluate membership.
    pub fn update_device(&self, device: &DeviceRef) {
        if (self.predicate)(device) {
            self.promote(device);
        } else {
            self.demote(device);
        }
    }

    /// A device left the index.
    pub fn remove_device(&self, device: &DeviceRef) {
        self.demote(device);
    }

    fn promote(&self, device: &DeviceRef) {
        let mut contents = self.contents.lock();
        if let Err(pos) = contents.binary_search_by_key(&device.ordinal(), |d| d.ordinal()) {
            contents.insert(pos, Arc::clone(device));
        }
    }

    fn demote(&self, device: &DeviceRef) {
        let mut contents = self.contents.lock();
        if let Ok(pos) = contents.binary_search_by_key(&device.ordinal(), |d| d.ordinal()) {
            contents.remove(pos);
        }
    }
}

impl std::fmt::Debug for DeviceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceView")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

/// Registry of live views. The mutex covers the list only, never the view
/// contents, so notification fan-out can run without serializing views
/// against each other.
pub struct ViewRegistry {
    views: Mutex<Vec<Arc<DeviceView>>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self {
            views: Mutex::new(Vec::new()),
        }
    }

    /// Register a view. Returns `false` without replacing anything if the
    /// id is taken.
    pub fn add_view(&self, view: Arc<DeviceView>) -> bool {
        let mut views = self.views.lock();
        if views.iter().any(|v| v.id() == view.id()) {
            return false;
        }
        debug!("[VIEWS] registered view '{}'", view.id());
        views.push(view);
        true
    }

    pub fn remove_view(&self, id: &str) {
        self.views.lock().retain(|v| v.id() != id);
    }

    pub fn get(&self, id: &str) -> Option<Arc<DeviceView>> {
        self.views.lock().iter().find(|v| v.id() == id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<DeviceView>> {
        self.views.lock().clone()
    }

    pub fn notify_new_device(&self, device: &DeviceRef) {
        for view in self.all() {
            view.new_device(device);
        }
    }

    pub fn notify_update_device(&self, device: &DeviceRef) {
        for view in self.all() {
            view.update_device(device);
        }
    }

    pub fn notify_remove_device(&self, device: &DeviceRef) {
        for view in self.all() {
            view.remove_device(device);
        }
    }
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::DeviceIndex;
    use airscout_types::{DeviceKey, MacAddr};

    fn insert_device(index: &DeviceIndex, phy: u32, mac_s: &str) -> DeviceRef {
        let mac: MacAddr = mac_s.parse().unwrap();
        index
            .insert(Device::new(DeviceKey::new(phy, mac), mac, phy, "t", 0, false))
            .unwrap()
    }

    fn phy_view(phy: u32) -> Arc<DeviceView> {
        Arc::new(DeviceView::new(
            format!("phy-{}", phy),
            "per-phy",
            Arc::new(move |d: &Device| d.phy_id() == phy),
        ))
    }

    #[test]
    fn test_membership_follows_predicate() {
        let index = DeviceIndex::new();
        let view = phy_view(1);
        let a = insert_device(&index, 1, "00:00:00:00:00:01");
        let b = insert_device(&index, 2, "00:00:00:00:00:02");

        view.new_device(&a);
        view.new_device(&b);

        assert!(view.contains(&a));
        assert!(!view.contains(&b));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_update_promotes_and_demotes() {
        let index = DeviceIndex::new();
        let device = insert_device(&index, 1, "00:00:00:00:00:01");

        // membership keyed off mutable state: packets >= 2
        let view = Arc::new(DeviceView::new(
            "busy",
            "devices with traffic",
            Arc::new(|d: &Device| d.packets() >= 2),
        ));

        view.new_device(&device);
        assert!(!view.contains(&device));

        {
            let mut state = device.state_mut();
            state.record_packet(&Default::default(), 10, false);
            state.record_packet(&Default::default(), 11, false);
        }
        view.update_device(&device);
        assert!(view.contains(&device));

        view.remove_device(&device);
        assert!(!view.contains(&device));
    }

    #[test]
    fn test_contents_stay_ordinal_ordered() {
        let index = DeviceIndex::new();
        let view = phy_view(1);
        let devices: Vec<_> = (1..=4u8)
            .map(|i| insert_device(&index, 1, &format!("00:00:00:00:00:{:02x}", i)))
            .collect();

        // notify out of order
        view.new_device(&devices[2]);
        view.new_device(&devices[0]);
        view.new_device(&devices[3]);
        view.new_device(&devices[1]);

        let ordinals: Vec<_> = view.snapshot().iter().map(|d| d.ordinal()).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_registry_rejects_duplicate_id() {
        let registry = ViewRegistry::new();
        assert!(registry.add_view(phy_view(1)));
        assert!(!registry.add_view(phy_view(1)));
        assert_eq!(registry.all().len(), 1);

        registry.remove_view("phy-1");
        assert!(registry.get("phy-1").is_none());
    }
}
