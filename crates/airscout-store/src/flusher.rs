// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Background device flush timer.
//!
//! Periodically writes the whole tracked population to the state store.
//! A failed flush is logged and retried on the next tick; the deferred
//! rehydration queue is also drained here so devices for late-registering
//! PHYs eventually appear.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};

use airscout_tracker::DeviceTracker;

use crate::store::StateStore;

/// Background flush driver for a [`StateStore`].
pub struct DeviceFlusher {
    running: Arc<RwLock<bool>>,
    thread_handle: Option<thread::JoinHandle<()>>,
    flush_interval: Duration,
}

impl DeviceFlusher {
    pub fn new(flush_interval: Duration) -> Self {
        Self {
            running: Arc::new(RwLock::new(false)),
            thread_handle: None,
            flush_interval,
        }
    }

    /// Start flushing. Idempotent while running.
    pub fn start(&mut self, tracker: Arc<DeviceTracker>, store: Arc<StateStore>) {
        if *self.running.read() {
            return;
        }

        *self.running.write() = true;
        let running = Arc::clone(&self.running);
        let flush_interval = self.flush_interval;

        let handle = thread::spawn(move || {
            info!("[STORE] flush timer started (interval: {:?})", flush_interval);

            while *running.read() {
                thread::sleep(flush_interval);
                if !*running.read() {
                    break;
                }

                store.retry_deferred(&tracker);

                if let Err(e) = store.store_all_devices(&tracker) {
                    // retried on the next tick
                    warn!("[STORE] device flush failed: {}", e);
                }
            }

            info!("[STORE] flush timer stopped");
        });

        self.thread_handle = Some(handle);
    }

    /// Stop the timer and run one final flush on the caller's thread.
    pub fn stop(&mut self, tracker: &DeviceTracker, store: &StateStore) {
        *self.running.write() = false;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        if let Err(e) = store.store_all_devices(tracker) {
            warn!("[STORE] final flush failed: {}", e);
        }
    }
}

impl Drop for DeviceFlusher {
    fn drop(&mut self) {
        *self.running.write() = false;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}
