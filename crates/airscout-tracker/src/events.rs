// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Typed event bus for tracker state changes.
//!
//! Publish-subscribe over crossbeam channels: each subscriber owns an
//! unbounded receiver, publishes are fanned out under the subscriber-list
//! mutex so every subscriber observes events in submission order. Events
//! published before a subscriber registers are not replayed.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use airscout_types::DeviceKey;

use crate::device::DeviceRef;

/// Tracker state change event
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// A new PHY handler registered.
    NewPhy { phy_id: u32, name: String },
    /// A device was created by the update pipeline (not by rehydration).
    NewDevice(DeviceRef),
    /// A device was evicted or otherwise removed.
    DeviceRemoved(DeviceKey),
    /// A data source UUID was observed for the first time.
    NewDatasource(Uuid),
}

/// Fan-out event channel.
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<TrackerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber. Only events published after this call are
    /// delivered.
    pub fn subscribe(&self) -> Receiver<TrackerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, dropping the channels of
    /// subscribers that have gone away.
    pub fn publish(&self, event: TrackerEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(
            subscribers = subscribers.len(),
            "published {:?}",
            std::mem::discriminant(&event)
        );
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_delivery() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        for id in 0..5 {
            bus.publish(TrackerEvent::NewPhy {
                phy_id: id,
                name: format!("phy{}", id),
            });
        }

        for expected in 0..5 {
            match rx.try_recv().unwrap() {
                TrackerEvent::NewPhy { phy_id, .. } => assert_eq!(phy_id, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_no_replay_for_late_subscribers() {
        let bus = EventBus::new();
        bus.publish(TrackerEvent::NewDatasource(Uuid::from_u128(1)));

        let rx = bus.subscribe();
        assert!(rx.try_recv().is_err());

        bus.publish(TrackerEvent::NewDatasource(Uuid::from_u128(2)));
        assert!(matches!(
            rx.try_recv().unwrap(),
            TrackerEvent::NewDatasource(u) if u == Uuid::from_u128(2)
        ));
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.publish(TrackerEvent::NewDatasource(Uuid::from_u128(1)));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
