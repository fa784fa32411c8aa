//! Device registry: the hub's in-memory database of known devices.
//!
//! Entries come from two places: the configuration file (devices the
//! user paired manually, token included) and live discovery
//! announcements.  Discovery keeps `host`/`port`/`stamp` fresh and may
//! contribute a token for unprovisioned devices, but a configured token
//! is never overwritten by one that arrived over broadcast.
//!
//! The registry hands out snapshots; it never exposes live references.

use std::collections::HashMap;
use std::net::IpAddr;

use homelink_core::{DeviceIdentity, DiscoveredAnnouncement, SecretToken};

/// How far a device has progressed from "seen" to "in use".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    /// An announcement has been seen; no session opened yet.
    #[default]
    Discovered,
    /// A session is (or was) attached to this device.
    Sessioned,
}

/// One tracked device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub identity: DeviceIdentity,
    pub token: Option<SecretToken>,
    pub model: Option<String>,
    /// Stamp from the most recent announcement; 0 until one arrives.
    pub last_stamp: u32,
    pub state: DeviceState,
}

impl DeviceRecord {
    /// A record seeded from configuration, before any announcement.
    pub fn configured(
        device_id: u32,
        host: IpAddr,
        port: u16,
        token: Option<SecretToken>,
        model: Option<String>,
    ) -> Self {
        Self {
            identity: DeviceIdentity::new(device_id, host, port),
            token,
            model,
            last_stamp: 0,
            state: DeviceState::Discovered,
        }
    }
}

/// In-memory registry of all known devices, keyed by device id.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<u32, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or replaces a record wholesale (configuration load).
    pub fn upsert(&mut self, record: DeviceRecord) {
        self.devices.insert(record.identity.device_id, record);
    }

    /// Merges a discovery announcement.
    ///
    /// Returns `true` when the device was not known before.  Address and
    /// stamp always refresh; an announced token only fills a gap.
    pub fn upsert_announcement(&mut self, announcement: &DiscoveredAnnouncement) -> bool {
        match self.devices.get_mut(&announcement.device_id) {
            Some(record) => {
                record.identity = announcement.identity();
                record.last_stamp = announcement.stamp;
                if record.token.is_none() {
                    record.token = announcement.token;
                }
                false
            }
            None => {
                self.devices.insert(
                    announcement.device_id,
                    DeviceRecord {
                        identity: announcement.identity(),
                        token: announcement.token,
                        model: None,
                        last_stamp: announcement.stamp,
                        state: DeviceState::Discovered,
                    },
                );
                true
            }
        }
    }

    /// Returns the record for a specific device.
    pub fn get(&self, device_id: u32) -> Option<&DeviceRecord> {
        self.devices.get(&device_id)
    }

    /// Returns a snapshot of all records.
    pub fn all(&self) -> Vec<DeviceRecord> {
        self.devices.values().cloned().collect()
    }

    /// Marks a device as having an attached session.
    pub fn mark_sessioned(&mut self, device_id: u32) {
        if let Some(record) = self.devices.get_mut(&device_id) {
            record.state = DeviceState::Sessioned;
        }
    }

    /// Removes a device from the registry.
    pub fn remove(&mut self, device_id: u32) {
        self.devices.remove(&device_id);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement(device_id: u32, stamp: u32, token: Option<SecretToken>) -> DiscoveredAnnouncement {
        DiscoveredAnnouncement {
            host: "192.168.1.60".parse().unwrap(),
            port: 54_321,
            device_id,
            stamp,
            token,
        }
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_first_announcement_creates_a_record() {
        let mut registry = DeviceRegistry::new();
        let is_new = registry.upsert_announcement(&announcement(7, 100, None));
        assert!(is_new);

        let record = registry.get(7).unwrap();
        assert_eq!(record.last_stamp, 100);
        assert_eq!(record.state, DeviceState::Discovered);
        assert!(record.token.is_none());
    }

    #[test]
    fn test_repeat_announcement_refreshes_stamp_and_address() {
        let mut registry = DeviceRegistry::new();
        registry.upsert_announcement(&announcement(7, 100, None));

        let mut later = announcement(7, 250, None);
        later.host = "192.168.1.99".parse().unwrap();
        let is_new = registry.upsert_announcement(&later);

        assert!(!is_new);
        let record = registry.get(7).unwrap();
        assert_eq!(record.last_stamp, 250);
        assert_eq!(record.identity.host, later.host);
    }

    #[test]
    fn test_announced_token_fills_a_gap() {
        let mut registry = DeviceRegistry::new();
        registry.upsert_announcement(&announcement(7, 100, None));

        let token = SecretToken::from_bytes([0x11; 16]);
        registry.upsert_announcement(&announcement(7, 101, Some(token)));
        assert_eq!(registry.get(7).unwrap().token, Some(token));
    }

    #[test]
    fn test_announced_token_never_overwrites_a_configured_one() {
        let mut registry = DeviceRegistry::new();
        let configured = SecretToken::from_bytes([0x22; 16]);
        registry.upsert(DeviceRecord::configured(
            7,
            "192.168.1.60".parse().unwrap(),
            54_321,
            Some(configured),
            Some("vendor.plug.v3".to_string()),
        ));

        let broadcast = SecretToken::from_bytes([0x33; 16]);
        registry.upsert_announcement(&announcement(7, 300, Some(broadcast)));

        let record = registry.get(7).unwrap();
        assert_eq!(record.token, Some(configured));
        assert_eq!(record.model.as_deref(), Some("vendor.plug.v3"));
        assert_eq!(record.last_stamp, 300);
    }

    #[test]
    fn test_mark_sessioned_updates_state() {
        let mut registry = DeviceRegistry::new();
        registry.upsert_announcement(&announcement(7, 100, None));
        registry.mark_sessioned(7);
        assert_eq!(registry.get(7).unwrap().state, DeviceState::Sessioned);
    }

    #[test]
    fn test_remove_deletes_record() {
        let mut registry = DeviceRegistry::new();
        registry.upsert_announcement(&announcement(7, 100, None));
        registry.remove(7);
        assert!(registry.get(7).is_none());
    }
}
