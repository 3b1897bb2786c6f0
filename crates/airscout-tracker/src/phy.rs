// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! PHY handler registry.
//!
//! Each physical-layer protocol family (802.11, BTLE, Zigbee, ...)
//! registers one handler. The registry assigns ids monotonically from 0
//! and never reuses them; it is append-only for the life of the process.
//! Names are unique.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::info;

use airscout_types::{PHY_ANY, PHY_UNKNOWN};

use crate::packet::Packet;
use crate::{Result, TrackerError};

/// Capability set a PHY implementation provides to the tracker.
///
/// `classify` turns a dissected packet into the common-info components the
/// tracker understands; `dissect` gives the PHY a chance to attach its own
/// components before classification. Both default to no-ops so trivial
/// PHYs only implement `name`.
pub trait PhyHandler: Send + Sync {
    fn name(&self) -> &str;

    fn dissect(&self, _packet: &mut Packet) {}

    fn classify(&self, _packet: &mut Packet) {}
}

/// Per-PHY packet counters, updated lock-free from the classifier.
#[derive(Debug, Default)]
pub struct PhyCounters {
    pub packets: AtomicU64,
    pub data_packets: AtomicU64,
    pub error_packets: AtomicU64,
    pub filter_packets: AtomicU64,
}

impl PhyCounters {
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }
}

/// A handler bound to its assigned id and counters.
pub struct RegisteredPhy {
    id: u32,
    handler: Arc<dyn PhyHandler>,
    counters: PhyCounters,
}

impl RegisteredPhy {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        self.handler.name()
    }

    pub fn handler(&self) -> &Arc<dyn PhyHandler> {
        &self.handler
    }

    pub fn counters(&self) -> &PhyCounters {
        &self.counters
    }
}

impl std::fmt::Debug for RegisteredPhy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPhy")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

struct RegistryInner {
    by_id: AHashMap<u32, Arc<RegisteredPhy>>,
    by_name: AHashMap<String, u32>,
    next_id: u32,
}

/// Append-only registry of PHY handlers.
pub struct PhyRegistry {
    inner: RwLock<RegistryInner>,
}

impl PhyRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                by_id: AHashMap::new(),
                by_name: AHashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Register a handler and assign the next id.
    ///
    /// # Errors
    ///
    /// `DuplicatePhyName` if a handler with the same name is already
    /// registered.
    pub fn register(&self, handler: Arc<dyn PhyHandler>) -> Result<Arc<RegisteredPhy>> {
        let mut inner = self.inner.write();
        let name = handler.name().to_string();
        if inner.by_name.contains_key(&name) {
            return Err(TrackerError::DuplicatePhyName(name));
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let phy = Arc::new(RegisteredPhy {
            id,
            handler,
            counters: PhyCounters::default(),
        });
        inner.by_id.insert(id, Arc::clone(&phy));
        inner.by_name.insert(name.clone(), id);

        info!("[PHYREGISTRY] registered PHY '{}' as id {}", name, id);
        Ok(phy)
    }

    pub fn fetch_by_id(&self, id: u32) -> Option<Arc<RegisteredPhy>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    pub fn fetch_by_name(&self, name: &str) -> Option<Arc<RegisteredPhy>> {
        let inner = self.inner.read();
        let id = inner.by_name.get(name)?;
        inner.by_id.get(id).cloned()
    }

    /// Display name for an id, including the reserved pseudo-ids.
    pub fn name_of(&self, id: i32) -> String {
        match id {
            PHY_ANY => "any".to_string(),
            PHY_UNKNOWN => "unknown".to_string(),
            id if id >= 0 => self
                .fetch_by_id(id as u32)
                .map(|phy| phy.name().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            _ => "unknown".to_string(),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// All registered PHYs in id order.
    pub fn all(&self) -> Vec<Arc<RegisteredPhy>> {
        let inner = self.inner.read();
        let mut phys: Vec<_> = inner.by_id.values().cloned().collect();
        phys.sort_unstable_by_key(|phy| phy.id());
        phys
    }
}

impl Default for PhyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedPhy(&'static str);

    impl PhyHandler for NamedPhy {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_ids_assigned_monotonically() {
        let registry = PhyRegistry::new();
        let a = registry.register(Arc::new(NamedPhy("IEEE802.11"))).unwrap();
        let b = registry.register(Arc::new(NamedPhy("BTLE"))).unwrap();
        assert_eq!(a.id(), 0);
        assert_eq!(b.id(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = PhyRegistry::new();
        registry.register(Arc::new(NamedPhy("IEEE802.11"))).unwrap();
        let err = registry
            .register(Arc::new(NamedPhy("IEEE802.11")))
            .unwrap_err();
        assert!(matches!(err, TrackerError::DuplicatePhyName(_)));
        // the failed registration must not burn the name slot's id
        let next = registry.register(Arc::new(NamedPhy("BTLE"))).unwrap();
        assert_eq!(next.id(), 1);
    }

    #[test]
    fn test_lookup_by_name_and_id() {
        let registry = PhyRegistry::new();
        let phy = registry.register(Arc::new(NamedPhy("Zigbee"))).unwrap();
        assert_eq!(registry.fetch_by_name("Zigbee").unwrap().id(), phy.id());
        assert_eq!(registry.fetch_by_id(phy.id()).unwrap().name(), "Zigbee");
        assert!(registry.fetch_by_name("nope").is_none());
    }

    #[test]
    fn test_reserved_names() {
        let registry = PhyRegistry::new();
        assert_eq!(registry.name_of(PHY_ANY), "any");
        assert_eq!(registry.name_of(PHY_UNKNOWN), "unknown");
        assert_eq!(registry.name_of(42), "unknown");
    }
}
