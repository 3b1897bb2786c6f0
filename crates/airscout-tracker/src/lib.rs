// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Airscout Device Tracker
//!
//! The authoritative tracking core of the airscout sniffer. PHY handlers
//! feed parsed packet metadata through [`DeviceTracker::update_common_device`];
//! the tracker folds it into shared [`Device`] records indexed by composite
//! key, MAC, and ordinal, projects the population into predicate
//! [`views`], and expires stale records under memory pressure.
//!
//! ## Concurrency
//!
//! Lock order, outermost first (acquire only in this order):
//! 1. device-list `RwLock` ([`index::DeviceIndex`])
//! 2. view-registry mutex ([`views::ViewRegistry`])
//! 3. per-view contents mutex
//! 4. per-device state `RwLock`
//! 5. storing flag ([`StateBackend`] implementations)
//!
//! Snapshots are copy-on-write: readers iterate an immutable `Arc<Vec<_>>`
//! that structural changes replace wholesale, so the hot packet path never
//! waits on slow readers.

pub mod device;
pub mod events;
pub mod eviction;
pub mod index;
pub mod packet;
pub mod phy;
pub mod rrd;
pub mod tracker;
pub mod views;
pub mod workers;

pub use device::{Device, DeviceRef, DeviceState, LocationRecord, SeenbyRecord, SignalRecord};
pub use events::{EventBus, TrackerEvent};
pub use eviction::EvictionSweeper;
pub use index::DeviceIndex;
pub use packet::{CommonInfo, GpsFix, Packet, UpdateFlags};
pub use phy::{PhyCounters, PhyHandler, PhyRegistry, RegisteredPhy};
pub use rrd::RollingRate;
pub use tracker::{now_secs, DeviceTracker, StateBackend};
pub use views::{DeviceView, ViewRegistry};
pub use workers::{FilterWorker, ReadonlyFilterWorker, WorkerOptions};

use airscout_types::{DeviceKey, KeyError};
use thiserror::Error;

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tracker error types
#[derive(Debug, Clone, Error)]
pub enum TrackerError {
    /// Key or MAC absent; surfaced to callers, not logged.
    #[error("no device for key {0}")]
    NotFound(DeviceKey),

    /// Key collision on insert. In the update path this indicates a bug.
    #[error("device {0} already present in index")]
    Duplicate(DeviceKey),

    /// Malformed composite key, rejected at the boundary.
    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    /// A PHY name that is not registered.
    #[error("PHY '{0}' is not registered")]
    PhyUnknown(String),

    /// PHY name collision on registration.
    #[error("PHY name '{0}' already registered")]
    DuplicatePhyName(String),

    /// Max-device budget reached during insert; the insert succeeded but an
    /// eviction pass is pending.
    #[error("device budget exceeded: {count} tracked > {max} allowed")]
    BudgetExceeded { count: usize, max: usize },

    /// I/O failure in the state backend; logged and retried, never fatal.
    #[error("state store failure: {0}")]
    StoreFailure(String),
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;
