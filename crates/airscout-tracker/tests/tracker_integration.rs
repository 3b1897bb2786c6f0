// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cross-module tracker tests: the packet path, views, eviction, and
//! filter workers working against one shared tracker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use airscout_config::{MemoryConfig, TrackerConfig, ViewsConfig};
use airscout_tracker::{
    CommonInfo, Device, DeviceRef, DeviceState, DeviceTracker, Packet, PhyHandler,
    ReadonlyFilterWorker, UpdateFlags, WorkerOptions,
};
use airscout_types::{DeviceKey, MacAddr};
use uuid::Uuid;

struct NamedPhy(&'static str);

impl PhyHandler for NamedPhy {
    fn name(&self) -> &str {
        self.0
    }
}

fn tracker_with(config: TrackerConfig) -> Arc<DeviceTracker> {
    DeviceTracker::new(&config, &ViewsConfig::default(), &MemoryConfig::default())
}

fn mac(s: &str) -> MacAddr {
    s.parse().unwrap()
}

fn packet_for(phy_id: i32, mac_s: &str, ts: u64) -> Packet {
    let mut packet = Packet::new(ts);
    packet.commons = vec![CommonInfo {
        phy_id,
        device: mac(mac_s),
        basic_type: "Wi-Fi".to_string(),
        freq_mhz: 2412,
        signal_dbm: Some(-50),
        source_uuid: Some(Uuid::from_u128(0xbeef)),
        ..Default::default()
    }];
    packet
}

#[test]
fn test_view_membership_equals_predicate() {
    let tracker = tracker_with(TrackerConfig::default());
    let wifi = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();
    let btle = tracker.register_phy(Arc::new(NamedPhy("BTLE"))).unwrap();

    for i in 0..4u8 {
        let phy = if i % 2 == 0 { &wifi } else { &btle };
        tracker
            .on_packet(&packet_for(
                phy.id() as i32,
                &format!("00:00:00:00:00:{:02x}", i),
                1000 + i as u64,
            ))
            .unwrap();
    }

    for (view_id, phy_id) in [("phy-IEEE802.11", wifi.id()), ("phy-BTLE", btle.id())] {
        let view = tracker.get_view(view_id).unwrap();
        let expected: Vec<_> = tracker
            .snapshot_devices()
            .iter()
            .filter(|d| d.phy_id() == phy_id)
            .map(|d| d.key())
            .collect();
        let actual: Vec<_> = view.snapshot().iter().map(|d| d.key()).collect();
        assert_eq!(actual, expected);
    }
}

#[test]
fn test_idle_eviction_notifies_views_and_tombstones() {
    let tracker = tracker_with(TrackerConfig {
        device_timeout: 60,
        device_packets: 5,
        ..Default::default()
    });
    let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();

    for i in 0..10 {
        tracker
            .on_packet(&packet_for(phy.id() as i32, "aa:bb:cc:dd:ee:ff", 1000 + i))
            .unwrap();
    }
    let device = tracker
        .fetch_device(&DeviceKey::new(phy.id(), mac("aa:bb:cc:dd:ee:ff")))
        .unwrap();
    let ordinal = device.ordinal();

    assert_eq!(tracker.expire_idle_devices(1070), 1);
    assert!(tracker.full_refresh_time() >= 1070);
    assert!(tracker.get_view("phy-IEEE802.11").unwrap().is_empty());
    assert!(tracker.fetch_device(&device.key()).is_none());

    // ordinal slot stays tombstoned: the next insert gets a fresh ordinal
    tracker
        .on_packet(&packet_for(phy.id() as i32, "aa:bb:cc:dd:ee:01", 2000))
        .unwrap();
    let next = tracker
        .fetch_device(&DeviceKey::new(phy.id(), mac("aa:bb:cc:dd:ee:01")))
        .unwrap();
    assert!(next.ordinal() > ordinal);
}

#[test]
fn test_max_device_enforcement_order() {
    let tracker = tracker_with(TrackerConfig {
        max_devices: 3,
        ..Default::default()
    });
    let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();

    for (i, ts) in [(1u8, 100u64), (2, 200), (3, 300), (4, 400)] {
        tracker
            .on_packet(&packet_for(
                phy.id() as i32,
                &format!("00:00:00:00:00:{:02x}", i),
                ts,
            ))
            .unwrap();
    }

    assert_eq!(tracker.num_devices(), 4);
    tracker.enforce_max_devices(500);
    assert_eq!(tracker.num_devices(), 3);
    assert!(tracker
        .fetch_devices_by_mac(&mac("00:00:00:00:00:01"))
        .is_empty());
}

#[test]
fn test_concurrent_snapshot_worker_tolerates_churn() {
    let tracker = tracker_with(TrackerConfig::default());
    let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();

    for i in 0..64u8 {
        tracker
            .on_packet(&packet_for(
                phy.id() as i32,
                &format!("00:00:00:00:10:{:02x}", i),
                1000,
            ))
            .unwrap();
    }

    // worker iterates a pre-churn snapshot in small batches while another
    // thread inserts and removes devices
    let stale_snapshot: Vec<DeviceRef> = tracker.snapshot_devices().iter().cloned().collect();
    let removed_key = stale_snapshot[10].key();

    let churn_done = Arc::new(AtomicBool::new(false));
    let churn = {
        let tracker = Arc::clone(&tracker);
        let churn_done = Arc::clone(&churn_done);
        thread::spawn(move || {
            tracker.remove_device(&removed_key, 2000).unwrap();
            for i in 0..16u8 {
                tracker
                    .on_packet(&packet_for(
                        phy.id() as i32,
                        &format!("00:00:00:00:20:{:02x}", i),
                        2000,
                    ))
                    .unwrap();
            }
            churn_done.store(true, Ordering::Release);
        })
    };

    struct CountWorker {
        visited: Vec<DeviceKey>,
    }
    impl ReadonlyFilterWorker for CountWorker {
        fn match_device(&mut self, device: &DeviceRef, _state: &DeviceState) -> bool {
            self.visited.push(device.key());
            true
        }
    }

    let mut worker = CountWorker {
        visited: Vec::new(),
    };
    let opts = WorkerOptions {
        batch: true,
        batch_size: 8,
        cancel: None,
    };
    tracker.do_readonly_device_work_subset(&stale_snapshot, &mut worker, &opts);
    churn.join().unwrap();
    assert!(churn_done.load(Ordering::Acquire));

    // nothing visited twice, nothing from the insert-after-snapshot batch
    let mut unique = worker.visited.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), worker.visited.len());
    assert!(worker.visited.len() <= 64);
    for key in &worker.visited {
        assert!(stale_snapshot.iter().any(|d| d.key() == *key));
    }

    // the next snapshot reflects the churn
    let fresh = tracker.snapshot_devices();
    assert_eq!(fresh.len(), 64 - 1 + 16);
    assert!(!fresh.iter().any(|d| d.key() == removed_key));
}

#[test]
fn test_salted_keys_coexist_outside_update_path() {
    let tracker = tracker_with(TrackerConfig::default());
    let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();

    let m = mac("aa:bb:cc:dd:ee:ff");
    tracker
        .on_packet(&packet_for(phy.id() as i32, "aa:bb:cc:dd:ee:ff", 1000))
        .unwrap();

    // a salted sibling inserted by rehydration-like machinery is allowed
    let salted_key = DeviceKey::with_salt(phy.id(), m, 7).unwrap();
    let salted = Device::from_state(salted_key, m, phy.id(), DeviceState::default());
    tracker.insert_loaded_device(salted).unwrap();

    assert_eq!(tracker.fetch_devices_by_mac(&m).len(), 2);
    // but the update path still resolves to the salt-0 device
    let device = tracker
        .update_common_device(
            &CommonInfo {
                phy_id: phy.id() as i32,
                ..Default::default()
            },
            m,
            &phy,
            &Packet::new(1100),
            UpdateFlags::standard(),
            "",
        )
        .unwrap();
    assert_eq!(device.key().salt(), 0);
}
