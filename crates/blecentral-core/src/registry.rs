//! Discovered and connected device bookkeeping.
//!
//! Both maps are mutated from native callback threads and read by callers
//! concurrently. Locks are held only for the map operation itself; every read
//! hands out a copy so callers can iterate without holding anything.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::RwLock;

use crate::device::{ConnectionState, Device, DeviceId};

/// The two device maps owned by one adapter.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    discovered: RwLock<HashMap<DeviceId, Device>>,
    connected: RwLock<HashMap<DeviceId, Device>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advertised device.
    ///
    /// Returns the stored record and whether it was newly inserted. A repeat
    /// sighting keeps the stored record (and its identity) but refreshes its
    /// name, RSSI and advertisement from `device`.
    pub fn upsert_discovered(&self, device: &Device) -> (Device, bool) {
        let existing = {
            let mut discovered = self.discovered.write();
            match discovered.entry(device.id()) {
                Entry::Occupied(stored) => stored.get().clone(),
                Entry::Vacant(slot) => {
                    slot.insert(device.clone());
                    return (device.clone(), true);
                }
            }
        };
        existing.refresh_from(device);
        (existing, false)
    }

    /// Forget every discovered device.
    pub fn clear_discovered(&self) {
        self.discovered.write().clear();
    }

    /// Remove one discovered device.
    pub fn remove_discovered(&self, id: DeviceId) -> Option<Device> {
        self.discovered.write().remove(&id)
    }

    /// Look up a discovered device.
    #[must_use]
    pub fn get_discovered(&self, id: DeviceId) -> Option<Device> {
        self.discovered.read().get(&id).cloned()
    }

    /// Copy of the discovered set.
    #[must_use]
    pub fn snapshot_discovered(&self) -> Vec<Device> {
        self.discovered.read().values().cloned().collect()
    }

    /// Record a confirmed connection. The caller must already have marked
    /// the device [`ConnectionState::Connected`].
    pub fn add_connected(&self, device: &Device) {
        debug_assert_eq!(device.connection_state(), ConnectionState::Connected);
        self.connected.write().insert(device.id(), device.clone());
    }

    /// Remove a connected device.
    pub fn remove_connected(&self, id: DeviceId) -> Option<Device> {
        self.connected.write().remove(&id)
    }

    /// Look up a connected device.
    #[must_use]
    pub fn get_connected(&self, id: DeviceId) -> Option<Device> {
        self.connected.read().get(&id).cloned()
    }

    /// Returns `true` if `id` is in the connected set.
    #[must_use]
    pub fn is_connected(&self, id: DeviceId) -> bool {
        self.connected.read().contains_key(&id)
    }

    /// Copy of the connected set.
    #[must_use]
    pub fn snapshot_connected(&self) -> Vec<Device> {
        self.connected.read().values().cloned().collect()
    }

    /// The record callers most likely hold for `device`: the connected one,
    /// then the discovered one, then `device` itself.
    #[must_use]
    pub fn canonical(&self, device: &Device) -> Device {
        self.get_connected(device.id())
            .or_else(|| self.get_discovered(device.id()))
            .unwrap_or_else(|| device.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NativeHandle;
    use std::sync::Arc;

    fn device(n: u128) -> Device {
        Device::new(DeviceId::from_u128(n), NativeHandle::new(format!("dev-{n}")))
    }

    fn connected(n: u128) -> Device {
        let d = device(n);
        d.set_connection_state(ConnectionState::Connected);
        d
    }

    #[test]
    fn test_upsert_reports_first_insert_only() {
        let registry = DeviceRegistry::new();
        let (_, first) = registry.upsert_discovered(&device(1));
        let (_, second) = registry.upsert_discovered(&device(1));

        assert!(first);
        assert!(!second);
        assert_eq!(registry.snapshot_discovered().len(), 1);
    }

    #[test]
    fn test_upsert_keeps_original_record() {
        let registry = DeviceRegistry::new();
        let original = device(1);
        registry.upsert_discovered(&original);

        let (stored, _) = registry.upsert_discovered(&device(1).with_rssi(-33));

        assert!(stored.same_record(&original));
        assert_eq!(original.rssi(), Some(-33));
    }

    #[test]
    fn test_clear_discovered() {
        let registry = DeviceRegistry::new();
        registry.upsert_discovered(&device(1));
        registry.upsert_discovered(&device(2));
        registry.clear_discovered();
        assert!(registry.snapshot_discovered().is_empty());
    }

    #[test]
    fn test_connected_set_operations() {
        let registry = DeviceRegistry::new();
        registry.add_connected(&connected(1));

        assert!(registry.is_connected(DeviceId::from_u128(1)));
        assert!(registry.get_connected(DeviceId::from_u128(1)).is_some());
        assert!(registry.remove_connected(DeviceId::from_u128(1)).is_some());
        assert!(registry.remove_connected(DeviceId::from_u128(1)).is_none());
        assert!(registry.snapshot_connected().is_empty());
    }

    #[test]
    fn test_snapshot_is_detached_from_later_mutation() {
        let registry = DeviceRegistry::new();
        registry.add_connected(&connected(1));
        let snapshot = registry.snapshot_connected();

        registry.add_connected(&connected(2));
        registry.remove_connected(DeviceId::from_u128(1));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), DeviceId::from_u128(1));
    }

    #[test]
    fn test_canonical_prefers_connected_then_discovered() {
        let registry = DeviceRegistry::new();
        let seen = device(1);
        registry.upsert_discovered(&seen);
        assert!(registry.canonical(&device(1)).same_record(&seen));

        let linked = connected(1);
        registry.add_connected(&linked);
        assert!(registry.canonical(&device(1)).same_record(&linked));

        let stranger = device(2);
        assert!(registry.canonical(&stranger).same_record(&stranger));
    }

    #[test]
    fn test_concurrent_mutation() {
        let registry = Arc::new(DeviceRegistry::new());
        let handles: Vec<_> = (0..8u128)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for n in 0..100u128 {
                        registry.upsert_discovered(&device(n));
                        let d = connected(t * 1000 + n);
                        registry.add_connected(&d);
                        let _ = registry.snapshot_connected();
                        registry.remove_connected(d.id());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.snapshot_discovered().len(), 100);
        assert!(registry.snapshot_connected().is_empty());
    }
}
