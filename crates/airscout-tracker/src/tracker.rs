// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! The device tracker orchestrator.
//!
//! [`DeviceTracker`] ties the registry, index, views, and event bus
//! together and owns the single entry point PHY handlers call per packet,
//! [`DeviceTracker::update_common_device`]. Persistence is attached
//! through the [`StateBackend`] seam so the storage crate can sit on top
//! without a dependency cycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use airscout_config::{MemoryConfig, TrackerConfig, ViewsConfig};
use airscout_types::{DeviceKey, MacAddr};

use crate::device::{Device, DeviceRef};
use crate::events::{EventBus, TrackerEvent};
use crate::index::DeviceIndex;
use crate::packet::{CommonInfo, Packet, UpdateFlags};
use crate::phy::{PhyHandler, PhyRegistry, RegisteredPhy};
use crate::rrd::RollingRate;
use crate::views::{DeviceView, ViewRegistry};
use crate::workers::{self, FilterWorker, ReadonlyFilterWorker, WorkerOptions};
use crate::{Result, TrackerError};

/// Current wall-clock time as monotonic-enough seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Seam to the durable state store.
///
/// The tracker consults it for stored user annotations when a device is
/// created and, in on-demand mode, for whole stored devices on lookup
/// miss. Implementations live in the storage crate; failures here are
/// logged and recovered locally, never propagated into the packet path.
pub trait StateBackend: Send + Sync {
    fn stored_username(&self, phy_name: &str, mac: MacAddr) -> Result<Option<String>>;

    fn stored_tags(&self, phy_name: &str, mac: MacAddr) -> Result<Vec<(String, String)>>;

    fn persist_username(&self, phy_name: &str, mac: MacAddr, username: &str) -> Result<()>;

    fn persist_tag(&self, phy_name: &str, mac: MacAddr, tag: &str, content: &str) -> Result<()>;

    /// Fetch and deserialize one stored device, for on-demand rehydration.
    fn load_device(&self, phy_id: u32, phy_name: &str, mac: MacAddr) -> Result<Option<Device>>;
}

/// Central device tracker.
pub struct DeviceTracker {
    // eviction policy
    device_timeout: u64,
    max_devices: usize,
    device_min_packets: u64,

    worker_batch_size: usize,

    map_phy_views: bool,
    map_seenby_views: bool,
    ram_no_rrd: bool,
    track_history_cloud: bool,
    track_persource_history: bool,

    phys: PhyRegistry,
    index: DeviceIndex,
    views: ViewRegistry,
    events: Arc<EventBus>,

    phy_views: Mutex<AHashMap<u32, Arc<DeviceView>>>,
    seenby_views: Mutex<AHashMap<Uuid, Arc<DeviceView>>>,
    seen_datasources: Mutex<AHashSet<Uuid>>,

    storage: RwLock<Option<Arc<dyn StateBackend>>>,
    ondemand_load: AtomicBool,

    num_packets: AtomicU64,
    num_data_packets: AtomicU64,
    num_error_packets: AtomicU64,
    num_filter_packets: AtomicU64,
    packets_rrd: Option<Mutex<RollingRate>>,

    eviction_pending: AtomicBool,
}

impl DeviceTracker {
    pub fn new(tracker: &TrackerConfig, views: &ViewsConfig, memory: &MemoryConfig) -> Arc<Self> {
        info!(
            "[TRACKER] starting device tracker (timeout={}s max_devices={} min_packets={})",
            tracker.device_timeout, tracker.max_devices, tracker.device_packets
        );
        Arc::new(Self {
            device_timeout: tracker.device_timeout,
            max_devices: tracker.max_devices,
            device_min_packets: tracker.device_packets,
            worker_batch_size: tracker.worker_batch_size,
            map_phy_views: views.map_phy_views,
            map_seenby_views: views.map_seenby_views,
            ram_no_rrd: memory.ram_no_rrd,
            track_history_cloud: memory.track_history_cloud,
            track_persource_history: memory.track_persource_history,
            phys: PhyRegistry::new(),
            index: DeviceIndex::new(),
            views: ViewRegistry::new(),
            events: Arc::new(EventBus::new()),
            phy_views: Mutex::new(AHashMap::new()),
            seenby_views: Mutex::new(AHashMap::new()),
            seen_datasources: Mutex::new(AHashSet::new()),
            storage: RwLock::new(None),
            ondemand_load: AtomicBool::new(false),
            num_packets: AtomicU64::new(0),
            num_data_packets: AtomicU64::new(0),
            num_error_packets: AtomicU64::new(0),
            num_filter_packets: AtomicU64::new(0),
            packets_rrd: (!memory.ram_no_rrd).then(|| Mutex::new(RollingRate::default())),
            eviction_pending: AtomicBool::new(false),
        })
    }

    /// Attach the durable state backend. `ondemand` enables per-miss
    /// rehydration in the update pipeline.
    pub fn attach_storage(&self, backend: Arc<dyn StateBackend>, ondemand: bool) {
        *self.storage.write() = Some(backend);
        self.ondemand_load.store(ondemand, Ordering::Release);
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn phys(&self) -> &PhyRegistry {
        &self.phys
    }

    pub fn index(&self) -> &DeviceIndex {
        &self.index
    }

    pub fn view_registry(&self) -> &ViewRegistry {
        &self.views
    }

    // ======================================================================
    // PHY registration
    // ======================================================================

    /// Register a PHY handler, assign its id, build its per-PHY view, and
    /// announce it on the event bus.
    pub fn register_phy(&self, handler: Arc<dyn PhyHandler>) -> Result<Arc<RegisteredPhy>> {
        let phy = self.phys.register(handler)?;

        if self.map_phy_views {
            let phy_id = phy.id();
            let view = Arc::new(DeviceView::new(
                format!("phy-{}", phy.name()),
                format!("{} devices", phy.name()),
                Arc::new(move |d: &Device| d.phy_id() == phy_id),
            ));
            if self.views.add_view(Arc::clone(&view)) {
                self.phy_views.lock().insert(phy_id, view);
            }
        }

        self.events.publish(TrackerEvent::NewPhy {
            phy_id: phy.id(),
            name: phy.name().to_string(),
        });
        Ok(phy)
    }

    // ======================================================================
    // Packet path
    // ======================================================================

    /// Per-packet classification: total and per-PHY counters plus the
    /// tracker-level rate record. Idempotent per packet.
    pub fn classify_packet(&self, packet: &Packet) {
        if !packet.mark_classified() {
            return;
        }

        self.num_packets.fetch_add(1, Ordering::Relaxed);
        let common = packet.commons.first();
        let error = common.is_some_and(|c| c.error);
        if error {
            self.num_error_packets.fetch_add(1, Ordering::Relaxed);
        } else {
            self.num_data_packets.fetch_add(1, Ordering::Relaxed);
        }
        if packet.filtered {
            self.num_filter_packets.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(common) = common {
            if common.phy_id >= 0 {
                if let Some(phy) = self.phys.fetch_by_id(common.phy_id as u32) {
                    let counters = phy.counters();
                    counters.packets.fetch_add(1, Ordering::Relaxed);
                    if error {
                        counters.error_packets.fetch_add(1, Ordering::Relaxed);
                    } else {
                        counters.data_packets.fetch_add(1, Ordering::Relaxed);
                    }
                    if packet.filtered {
                        counters.filter_packets.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        if let Some(rrd) = &self.packets_rrd {
            rrd.lock().record(packet.ts, 1);
        }
    }

    /// Entry point for the packet chain: classify, then fold every
    /// common-info component into its device.
    pub fn on_packet(&self, packet: &Packet) -> Result<()> {
        self.classify_packet(packet);

        for common in &packet.commons {
            let Some(phy) = (common.phy_id >= 0)
                .then(|| self.phys.fetch_by_id(common.phy_id as u32))
                .flatten()
            else {
                debug!(
                    "[TRACKER] dropping common info for unregistered phy {}",
                    common.phy_id
                );
                continue;
            };

            let flags = if packet.filtered {
                UpdateFlags::PACKETS | UpdateFlags::SEENBY
            } else {
                UpdateFlags::standard()
            };

            self.update_common_device(
                common,
                common.device,
                &phy,
                packet,
                flags,
                &common.basic_type,
            )?;
        }
        Ok(())
    }

    /// Create-or-update a device from one common-info component.
    ///
    /// The flag set selects which facets merge; `EXISTING_ONLY` turns a
    /// miss into `NotFound` instead of a create. Returns the device.
    pub fn update_common_device(
        &self,
        common: &CommonInfo,
        mac: MacAddr,
        phy: &Arc<RegisteredPhy>,
        packet: &Packet,
        flags: UpdateFlags,
        basic_type: &str,
    ) -> Result<DeviceRef> {
        let key = DeviceKey::new(phy.id(), mac);

        let mut is_new = false;
        let device = match self.index.fetch(&key) {
            Some(device) => device,
            None => match self.try_ondemand_load(phy, mac) {
                Some(device) => device,
                None if flags.contains(UpdateFlags::EXISTING_ONLY) => {
                    return Err(TrackerError::NotFound(key));
                }
                None => {
                    is_new = true;
                    self.create_device(key, mac, phy, packet.ts, basic_type)?
                }
            },
        };

        {
            let mut state = device.state_mut();
            if flags.contains(UpdateFlags::SIGNAL) {
                state.record_signal(common, packet.gps, flags.contains(UpdateFlags::EMPTY_SIGNAL));
            }
            if flags.contains(UpdateFlags::FREQUENCIES) {
                state.record_frequency(common.freq_mhz, &common.channel);
            }
            if flags.contains(UpdateFlags::PACKETS) {
                state.record_packet(common, packet.ts, packet.filtered);
            }
            if flags.contains(UpdateFlags::LOCATION) {
                if let Some(gps) = packet.gps {
                    state.record_location(
                        &gps,
                        flags.contains(UpdateFlags::EMPTY_LOCATION),
                        self.track_history_cloud,
                    );
                }
            }
            if flags.contains(UpdateFlags::SEENBY) {
                if let Some(uuid) = common.source_uuid {
                    state.record_seenby(
                        uuid,
                        packet.ts,
                        common.freq_mhz,
                        self.track_persource_history,
                    );
                }
            }
            if flags.contains(UpdateFlags::ENCRYPTION) {
                state.set_crypt(common.crypt_set);
            }
            state.set_basic_type(basic_type);
            state.touch(packet.ts);
        }

        if let Some(uuid) = common.source_uuid {
            self.note_datasource(uuid);
        }

        if is_new {
            self.views.notify_new_device(&device);
            self.events.publish(TrackerEvent::NewDevice(Arc::clone(&device)));
        } else {
            self.views.notify_update_device(&device);
        }

        if self.max_devices > 0 && self.index.len() > self.max_devices {
            let err = TrackerError::BudgetExceeded {
                count: self.index.len(),
                max: self.max_devices,
            };
            warn!("[TRACKER] {}, scheduling eviction", err);
            self.eviction_pending.store(true, Ordering::Release);
        }

        Ok(device)
    }

    fn create_device(
        &self,
        key: DeviceKey,
        mac: MacAddr,
        phy: &Arc<RegisteredPhy>,
        ts: u64,
        basic_type: &str,
    ) -> Result<DeviceRef> {
        let device = Device::new(key, mac, phy.id(), basic_type, ts, !self.ram_no_rrd);

        // Stored user annotations survive eviction and restarts; apply them
        // while we still hold the only reference.
        if let Some(storage) = self.storage.read().as_ref() {
            match storage.stored_username(phy.name(), mac) {
                Ok(Some(username)) => device.state_mut().set_username(&username),
                Ok(None) => {}
                Err(e) => warn!("[TRACKER] failed to load stored username: {}", e),
            }
            match storage.stored_tags(phy.name(), mac) {
                Ok(tags) => {
                    let mut state = device.state_mut();
                    for (tag, content) in tags {
                        state.set_tag(&tag, &content);
                    }
                }
                Err(e) => warn!("[TRACKER] failed to load stored tags: {}", e),
            }
        }

        self.index.insert(device)
    }

    fn try_ondemand_load(&self, phy: &Arc<RegisteredPhy>, mac: MacAddr) -> Option<DeviceRef> {
        if !self.ondemand_load.load(Ordering::Acquire) {
            return None;
        }
        let storage = Arc::clone(self.storage.read().as_ref()?);
        match storage.load_device(phy.id(), phy.name(), mac) {
            Ok(Some(device)) => self.insert_loaded_device(device).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("[TRACKER] on-demand load failed for {}: {}", mac, e);
                None
            }
        }
    }

    /// Insert a rehydrated device: views are notified, datasource views
    /// are backfilled, but `NEW_DEVICE` is not emitted.
    pub fn insert_loaded_device(&self, device: Device) -> Result<DeviceRef> {
        let device = self.index.insert(device)?;
        let sources: Vec<Uuid> = device.state().seenby.keys().copied().collect();
        for uuid in sources {
            self.note_datasource(uuid);
        }
        self.views.notify_new_device(&device);
        Ok(device)
    }

    // ======================================================================
    // Datasources and views
    // ======================================================================

    /// External notification that a data source exists (event-bus
    /// `NEW_DATASOURCE` consumers call this).
    pub fn on_new_datasource(&self, uuid: Uuid) {
        self.note_datasource(uuid);
    }

    fn note_datasource(&self, uuid: Uuid) {
        if !self.seen_datasources.lock().insert(uuid) {
            return;
        }
        self.ensure_seenby_view(uuid);
        self.events.publish(TrackerEvent::NewDatasource(uuid));
    }

    fn ensure_seenby_view(&self, uuid: Uuid) {
        if !self.map_seenby_views {
            return;
        }
        let mut seenby_views = self.seenby_views.lock();
        if seenby_views.contains_key(&uuid) {
            return;
        }
        let view = Arc::new(DeviceView::new(
            format!("seenby-{}", uuid),
            format!("devices seen by {}", uuid),
            Arc::new(move |d: &Device| d.state().seenby.contains_key(&uuid)),
        ));
        if self.views.add_view(Arc::clone(&view)) {
            seenby_views.insert(uuid, view);
        }
    }

    pub fn add_view(&self, view: Arc<DeviceView>) -> bool {
        let added = self.views.add_view(Arc::clone(&view));
        if added {
            // backfill from the current population
            for device in self.index.snapshot().iter() {
                view.new_device(device);
            }
        }
        added
    }

    pub fn remove_view(&self, id: &str) {
        self.views.remove_view(id);
    }

    pub fn get_view(&self, id: &str) -> Option<Arc<DeviceView>> {
        self.views.get(id)
    }

    pub fn all_views(&self) -> Vec<Arc<DeviceView>> {
        self.views.all()
    }

    // ======================================================================
    // Lookup and removal
    // ======================================================================

    pub fn fetch_device(&self, key: &DeviceKey) -> Option<DeviceRef> {
        self.index.fetch(key)
    }

    pub fn fetch_devices_by_mac(&self, mac: &MacAddr) -> Vec<DeviceRef> {
        self.index.fetch_by_mac(mac)
    }

    /// Immutable ordinal-ordered snapshot for readers.
    pub fn snapshot_devices(&self) -> Arc<Vec<DeviceRef>> {
        self.index.snapshot()
    }

    /// Remove a device from all structures and announce the removal.
    pub fn remove_device(&self, key: &DeviceKey, now: u64) -> Result<()> {
        let device = self
            .index
            .remove(key, now)
            .ok_or(TrackerError::NotFound(*key))?;
        self.views.notify_remove_device(&device);
        self.events.publish(TrackerEvent::DeviceRemoved(*key));
        debug!("[TRACKER] removed device {}", key);
        Ok(())
    }

    // ======================================================================
    // User-settable fields
    // ======================================================================

    /// Set a device's user name and write it through to the state store.
    pub fn set_device_username(&self, key: &DeviceKey, username: &str) -> Result<()> {
        let device = self
            .index
            .fetch(key)
            .ok_or(TrackerError::NotFound(*key))?;
        device.state_mut().set_username(username);
        self.views.notify_update_device(&device);

        if let Some(storage) = self.storage.read().as_ref() {
            let phy_name = self.phys.name_of(device.phy_id() as i32);
            if let Err(e) = storage.persist_username(&phy_name, device.mac(), username) {
                warn!("[TRACKER] failed to persist username for {}: {}", key, e);
            }
        }
        Ok(())
    }

    /// Set (or clear, with empty content) a device tag and persist it.
    pub fn set_device_tag(&self, key: &DeviceKey, tag: &str, content: &str) -> Result<()> {
        let device = self
            .index
            .fetch(key)
            .ok_or(TrackerError::NotFound(*key))?;
        device.state_mut().set_tag(tag, content);
        self.views.notify_update_device(&device);

        if let Some(storage) = self.storage.read().as_ref() {
            let phy_name = self.phys.name_of(device.phy_id() as i32);
            if let Err(e) = storage.persist_tag(&phy_name, device.mac(), tag, content) {
                warn!("[TRACKER] failed to persist tag for {}: {}", key, e);
            }
        }
        Ok(())
    }

    // ======================================================================
    // Filter workers
    // ======================================================================

    /// Default options honoring the configured batch size.
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            batch_size: self.worker_batch_size,
            ..Default::default()
        }
    }

    pub fn match_on_devices(
        &self,
        worker: &mut dyn FilterWorker,
        opts: &WorkerOptions,
    ) -> Vec<DeviceRef> {
        workers::match_on_devices(&self.index, worker, opts)
    }

    pub fn match_on_devices_subset(
        &self,
        source: &[DeviceRef],
        worker: &mut dyn FilterWorker,
        opts: &WorkerOptions,
    ) -> Vec<DeviceRef> {
        workers::match_on_devices_subset(&self.index, source, worker, opts)
    }

    pub fn do_readonly_device_work(
        &self,
        worker: &mut dyn ReadonlyFilterWorker,
        opts: &WorkerOptions,
    ) -> Vec<DeviceRef> {
        workers::do_readonly_device_work(&self.index, worker, opts)
    }

    pub fn do_readonly_device_work_subset(
        &self,
        source: &[DeviceRef],
        worker: &mut dyn ReadonlyFilterWorker,
        opts: &WorkerOptions,
    ) -> Vec<DeviceRef> {
        workers::do_readonly_device_work_subset(&self.index, source, worker, opts)
    }

    // ======================================================================
    // Counters and watermarks
    // ======================================================================

    pub fn num_devices(&self) -> usize {
        self.index.len()
    }

    pub fn num_packets(&self) -> u64 {
        self.num_packets.load(Ordering::Relaxed)
    }

    pub fn num_data_packets(&self) -> u64 {
        self.num_data_packets.load(Ordering::Relaxed)
    }

    pub fn num_error_packets(&self) -> u64 {
        self.num_error_packets.load(Ordering::Relaxed)
    }

    pub fn num_filter_packets(&self) -> u64 {
        self.num_filter_packets.load(Ordering::Relaxed)
    }

    /// Snapshot of the tracker-level packet rate record, `None` when rate
    /// records are disabled.
    pub fn packets_rrd(&self) -> Option<RollingRate> {
        self.packets_rrd.as_ref().map(|rrd| rrd.lock().clone())
    }

    /// Watermark clients compare against their last poll to decide on a
    /// full re-snapshot.
    pub fn full_refresh_time(&self) -> u64 {
        self.index.full_refresh_time()
    }

    pub(crate) fn take_eviction_pending(&self) -> bool {
        self.eviction_pending.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn eviction_policy(&self) -> (u64, usize, u64) {
        (self.device_timeout, self.max_devices, self.device_min_packets)
    }
}

impl std::fmt::Debug for DeviceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTracker")
            .field("devices", &self.index.len())
            .field("phys", &self.phys.count())
            .field("packets", &self.num_packets())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::GpsFix;
    use airscout_config::{MemoryConfig, TrackerConfig, ViewsConfig};
    use tests_support::NamedPhy;

    fn tracker() -> Arc<DeviceTracker> {
        DeviceTracker::new(
            &TrackerConfig::default(),
            &ViewsConfig::default(),
            &MemoryConfig::default(),
        )
    }

    fn mac(s: &str) -> MacAddr {
        s.parse().unwrap()
    }

    fn full_packet(ts: u64, phy_id: i32, mac_s: &str, uuid: Uuid) -> Packet {
        let mut packet = Packet::new(ts);
        packet.commons = vec![CommonInfo {
            phy_id,
            device: mac(mac_s),
            basic_type: "Wi-Fi AP".to_string(),
            freq_mhz: 2412,
            channel: "1".to_string(),
            signal_dbm: Some(-40),
            noise_dbm: None,
            crypt_set: 0,
            data_size: 64,
            error: false,
            direction: Default::default(),
            source_uuid: Some(uuid),
        }];
        packet
    }

    #[test]
    fn test_create_on_first_packet() {
        let tracker = tracker();
        let rx = tracker.events().subscribe();
        let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();

        let uuid = Uuid::from_u128(0xa1);
        let packet = full_packet(1000, phy.id() as i32, "aa:bb:cc:dd:ee:ff", uuid);
        tracker.on_packet(&packet).unwrap();

        assert_eq!(tracker.num_devices(), 1);
        let device = tracker
            .fetch_device(&DeviceKey::new(phy.id(), mac("aa:bb:cc:dd:ee:ff")))
            .unwrap();
        {
            let state = device.state();
            assert_eq!(state.first_seen, 1000);
            assert_eq!(state.last_seen, 1000);
            assert_eq!(state.packets, 1);
            assert_eq!(state.signal.last_signal_dbm, Some(-40));
            assert_eq!(state.freq_hist.get(&2412), Some(&1));
            assert_eq!(state.seenby.get(&uuid).unwrap().num_packets, 1);
        }

        // built-in views picked the device up
        let phy_view = tracker.get_view("phy-IEEE802.11").unwrap();
        assert!(phy_view.contains(&device));
        let seenby_view = tracker.get_view(&format!("seenby-{}", uuid)).unwrap();
        assert!(seenby_view.contains(&device));

        // NEW_PHY, NEW_DATASOURCE, NEW_DEVICE all announced
        let mut saw_new_device = false;
        while let Ok(event) = rx.try_recv() {
            if let TrackerEvent::NewDevice(d) = event {
                assert_eq!(d.key(), device.key());
                saw_new_device = true;
            }
        }
        assert!(saw_new_device);
    }

    #[test]
    fn test_existing_only_miss_creates_nothing() {
        let tracker = tracker();
        let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();

        let packet = Packet::new(1000);
        let common = CommonInfo {
            phy_id: phy.id() as i32,
            ..Default::default()
        };
        let err = tracker
            .update_common_device(
                &common,
                mac("aa:bb:cc:dd:ee:ff"),
                &phy,
                &packet,
                UpdateFlags::standard() | UpdateFlags::EXISTING_ONLY,
                "",
            )
            .unwrap_err();

        assert!(matches!(err, TrackerError::NotFound(_)));
        assert_eq!(tracker.num_devices(), 0);
    }

    #[test]
    fn test_counters_sum_matches_per_phy() {
        let tracker = tracker();
        let phy_a = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();
        let phy_b = tracker.register_phy(Arc::new(NamedPhy("BTLE"))).unwrap();

        for i in 0..3 {
            let packet = full_packet(
                1000 + i,
                phy_a.id() as i32,
                "aa:bb:cc:dd:ee:01",
                Uuid::from_u128(1),
            );
            tracker.on_packet(&packet).unwrap();
        }
        for i in 0..2 {
            let packet = full_packet(
                1000 + i,
                phy_b.id() as i32,
                "aa:bb:cc:dd:ee:02",
                Uuid::from_u128(1),
            );
            tracker.on_packet(&packet).unwrap();
        }

        let per_phy: u64 = tracker
            .phys()
            .all()
            .iter()
            .map(|phy| phy.counters().packets())
            .sum();
        assert_eq!(per_phy, tracker.num_packets());
        assert_eq!(tracker.num_packets(), 5);
    }

    #[test]
    fn test_classify_idempotent_per_packet() {
        let tracker = tracker();
        let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();
        let packet = full_packet(1000, phy.id() as i32, "aa:bb:cc:dd:ee:ff", Uuid::from_u128(1));

        tracker.classify_packet(&packet);
        tracker.classify_packet(&packet);
        assert_eq!(tracker.num_packets(), 1);
    }

    #[test]
    fn test_stale_packet_never_rewinds_last_seen() {
        let tracker = tracker();
        let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();

        tracker
            .on_packet(&full_packet(
                2000,
                phy.id() as i32,
                "aa:bb:cc:dd:ee:ff",
                Uuid::from_u128(1),
            ))
            .unwrap();
        tracker
            .on_packet(&full_packet(
                1500,
                phy.id() as i32,
                "aa:bb:cc:dd:ee:ff",
                Uuid::from_u128(1),
            ))
            .unwrap();

        let device = tracker
            .fetch_device(&DeviceKey::new(phy.id(), mac("aa:bb:cc:dd:ee:ff")))
            .unwrap();
        let state = device.state();
        assert_eq!(state.last_seen, 2000);
        assert_eq!(state.packets, 2);
        assert!(state.first_seen <= state.last_seen);
    }

    #[test]
    fn test_location_fix_below_2d_skipped() {
        let tracker = tracker();
        let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();

        let mut packet = full_packet(1000, phy.id() as i32, "aa:bb:cc:dd:ee:ff", Uuid::from_u128(1));
        packet.gps = Some(GpsFix {
            lat: 1.0,
            lon: 2.0,
            alt: 3.0,
            fix: 1,
        });
        tracker.on_packet(&packet).unwrap();

        let device = tracker
            .fetch_device(&DeviceKey::new(phy.id(), mac("aa:bb:cc:dd:ee:ff")))
            .unwrap();
        assert!(!device.state().location.has_fix());
    }

    #[test]
    fn test_username_applied_and_view_updated() {
        let tracker = tracker();
        let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();
        tracker
            .on_packet(&full_packet(
                1000,
                phy.id() as i32,
                "aa:bb:cc:dd:ee:ff",
                Uuid::from_u128(1),
            ))
            .unwrap();

        let key = DeviceKey::new(phy.id(), mac("aa:bb:cc:dd:ee:ff"));
        tracker.set_device_username(&key, "lab-ap").unwrap();
        assert_eq!(tracker.fetch_device(&key).unwrap().state().username, "lab-ap");

        let missing = DeviceKey::new(phy.id(), mac("00:00:00:00:00:99"));
        assert!(matches!(
            tracker.set_device_username(&missing, "x"),
            Err(TrackerError::NotFound(_))
        ));
    }

    #[test]
    fn test_device_removed_event_and_views() {
        let tracker = tracker();
        let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();
        tracker
            .on_packet(&full_packet(
                1000,
                phy.id() as i32,
                "aa:bb:cc:dd:ee:ff",
                Uuid::from_u128(1),
            ))
            .unwrap();

        let key = DeviceKey::new(phy.id(), mac("aa:bb:cc:dd:ee:ff"));
        let rx = tracker.events().subscribe();
        tracker.remove_device(&key, 2000).unwrap();

        assert!(tracker.get_view("phy-IEEE802.11").unwrap().is_empty());
        assert!(matches!(
            rx.try_recv().unwrap(),
            TrackerEvent::DeviceRemoved(k) if k == key
        ));
        assert_eq!(tracker.full_refresh_time(), 2000);
    }

    #[test]
    fn test_external_view_backfilled_on_add() {
        let tracker = tracker();
        let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();
        tracker
            .on_packet(&full_packet(
                1000,
                phy.id() as i32,
                "aa:bb:cc:dd:ee:ff",
                Uuid::from_u128(1),
            ))
            .unwrap();

        let view = Arc::new(DeviceView::new(
            "all",
            "everything",
            Arc::new(|_: &Device| true),
        ));
        assert!(tracker.add_view(Arc::clone(&view)));
        assert_eq!(view.len(), 1);
    }
}
