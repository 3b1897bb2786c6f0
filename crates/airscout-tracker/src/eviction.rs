// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Eviction and housekeeping.
//!
//! Two cooperating sweeps keep memory bounded: the idle-timeout sweep
//! removes devices not seen for `tracker.device_timeout` seconds once they
//! have accumulated `tracker.device_packets` packets, and max-device
//! enforcement evicts the oldest-by-last-seen devices above
//! `tracker.max_devices`. Every removal advances the full-refresh
//! watermark so pollers know to re-snapshot.
//!
//! The sweep entry points take an explicit `now` so tests can drive the
//! clock; [`EvictionSweeper`] is the production driver.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{error, info};

use crate::tracker::{now_secs, DeviceTracker};

impl DeviceTracker {
    /// Remove devices idle past the configured timeout.
    ///
    /// A device is eligible once `now - last_seen` exceeds the timeout and
    /// its packet count has reached the configured minimum. Returns the
    /// number of devices removed.
    pub fn expire_idle_devices(&self, now: u64) -> usize {
        let (timeout, _, min_packets) = self.eviction_policy();
        if timeout == 0 {
            return 0;
        }

        let mut removed = 0;
        for device in self.snapshot_devices().iter() {
            let (last_seen, packets) = {
                let state = device.state();
                (state.last_seen, state.packets)
            };
            if now.saturating_sub(last_seen) > timeout && packets >= min_packets {
                if let Err(e) = self.remove_device(&device.key(), now) {
                    error!("[EVICTION] failed to remove idle device: {}", e);
                } else {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!("[EVICTION] expired {} idle device(s)", removed);
        }
        removed
    }

    /// Evict oldest-by-last-seen devices until the population fits the
    /// configured cap. Returns the number of devices removed.
    pub fn enforce_max_devices(&self, now: u64) -> usize {
        let (_, max_devices, _) = self.eviction_policy();
        if max_devices == 0 || self.num_devices() <= max_devices {
            return 0;
        }

        let mut devices: Vec<_> = self.snapshot_devices().iter().cloned().collect();
        devices.sort_unstable_by_key(|d| d.last_seen());

        let excess = devices.len().saturating_sub(max_devices);
        let mut removed = 0;
        for device in devices.into_iter().take(excess) {
            if let Err(e) = self.remove_device(&device.key(), now) {
                error!("[EVICTION] failed to enforce device cap: {}", e);
            } else {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(
                "[EVICTION] evicted {} device(s) over the {} cap",
                removed, max_devices
            );
        }
        removed
    }
}

/// Background eviction driver.
///
/// Runs the idle-timeout and max-device sweeps every `sweep_interval`
/// seconds, and reacts within a second to budget-exceeded flags raised by
/// the update pipeline.
pub struct EvictionSweeper {
    running: Arc<RwLock<bool>>,
    thread_handle: Option<thread::JoinHandle<()>>,
    sweep_interval: Duration,
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);

impl EvictionSweeper {
    pub fn new(sweep_interval: Duration) -> Self {
        Self {
            running: Arc::new(RwLock::new(false)),
            thread_handle: None,
            sweep_interval,
        }
    }

    /// Start sweeping. Idempotent while running.
    pub fn start(&mut self, tracker: Arc<DeviceTracker>) {
        if *self.running.read() {
            return;
        }

        *self.running.write() = true;
        let running = Arc::clone(&self.running);
        let sweep_interval = self.sweep_interval;

        let handle = thread::spawn(move || {
            info!(
                "[EVICTION] sweeper started (interval: {:?})",
                sweep_interval
            );
            let mut since_sweep = Duration::ZERO;

            while *running.read() {
                thread::sleep(POLL_INTERVAL);
                since_sweep += POLL_INTERVAL;

                if !*running.read() {
                    break;
                }

                if tracker.take_eviction_pending() {
                    tracker.enforce_max_devices(now_secs());
                }

                if since_sweep >= sweep_interval {
                    since_sweep = Duration::ZERO;
                    let now = now_secs();
                    tracker.expire_idle_devices(now);
                    tracker.enforce_max_devices(now);
                }
            }

            info!("[EVICTION] sweeper stopped");
        });

        self.thread_handle = Some(handle);
    }

    /// Stop sweeping and join the thread.
    pub fn stop(&mut self) {
        *self.running.write() = false;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EvictionSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
