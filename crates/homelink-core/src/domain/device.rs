//! Device domain model: identity, attribute store, and clock anchoring.
//!
//! The attribute store is a fixed, typed struct rather than an untyped
//! string map: the handful of fields every firmware reports get real
//! fields, and genuinely vendor-specific extras go into a small side
//! table.  Callers always receive cloned snapshots; the live store is
//! owned exclusively by the device session.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::protocol::crypto::SecretToken;

/// Network identity of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Protocol-level numeric device id (the header `device_id` field).
    pub device_id: u32,
    /// LAN address the device answers on.
    pub host: IpAddr,
    /// Protocol port, 54321 for every known firmware.
    pub port: u16,
}

impl DeviceIdentity {
    pub fn new(device_id: u32, host: IpAddr, port: u16) -> Self {
        Self {
            device_id,
            host,
            port,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device {} at {}:{}", self.device_id, self.host, self.port)
    }
}

/// Typed attribute snapshot for a device.
///
/// The fixed fields cover what the `info` call reports on every firmware
/// family; anything else lands in `extras` keyed by the vendor's name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceAttributes {
    pub model: Option<String>,
    pub fw_ver: Option<String>,
    pub hw_ver: Option<String>,
    pub mac: Option<String>,
    /// Vendor fields with no typed counterpart, in reported form.
    pub extras: BTreeMap<String, Value>,
}

impl DeviceAttributes {
    /// Merges the object result of an `info` call into the store.
    ///
    /// Known keys update their typed field; unknown keys are kept in the
    /// extras table.  Non-string values for typed fields fall through to
    /// extras unchanged rather than being stringified.
    pub fn apply_info(&mut self, info: &serde_json::Map<String, Value>) {
        for (key, value) in info {
            let slot = match key.as_str() {
                "model" => Some(&mut self.model),
                "fw_ver" => Some(&mut self.fw_ver),
                "hw_ver" => Some(&mut self.hw_ver),
                "mac" => Some(&mut self.mac),
                _ => None,
            };
            match (slot, value.as_str()) {
                (Some(field), Some(text)) => *field = Some(text.to_string()),
                _ => {
                    self.extras.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Looks up an extras entry by vendor key.
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }
}

/// The last observed `(stamp, local time)` pair from a device.
///
/// The stamp is a coarse seconds counter the device uses for replay
/// protection.  Between packets the controller extrapolates it locally:
/// the effective stamp at time `t` is the anchored stamp plus the whole
/// seconds elapsed since the anchor was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockAnchor {
    stamp: u32,
    observed_at: Instant,
}

impl ClockAnchor {
    /// Anchors `stamp` at an explicit observation time.
    pub fn new(stamp: u32, observed_at: Instant) -> Self {
        Self { stamp, observed_at }
    }

    /// Anchors `stamp` at the current instant.
    pub fn capture(stamp: u32) -> Self {
        Self::new(stamp, Instant::now())
    }

    /// The raw stamp as last reported by the device.
    pub fn stamp(&self) -> u32 {
        self.stamp
    }

    /// Extrapolates the stamp to `now`.
    ///
    /// Saturates instead of wrapping if a device ever reports a stamp
    /// near `u32::MAX`.
    pub fn effective_stamp(&self, now: Instant) -> u32 {
        let elapsed = now
            .checked_duration_since(self.observed_at)
            .unwrap_or(Duration::ZERO);
        self.stamp.saturating_add(elapsed.as_secs() as u32)
    }
}

/// One parsed discovery announcement, emitted per inbound probe response.
///
/// Not persisted by the discovery service itself — deciding whether to
/// open a session (and remembering the device) is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAnnouncement {
    pub host: IpAddr,
    pub port: u16,
    pub device_id: u32,
    pub stamp: u32,
    /// The token broadcast in the checksum field, when the device chose
    /// to reveal it; `None` when the field carried the unknown sentinel.
    pub token: Option<SecretToken>,
}

impl DiscoveredAnnouncement {
    /// Whether this listener now knows the device's secret.
    pub fn has_known_secret(&self) -> bool {
        self.token.is_some()
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.device_id, self.host, self.port)
    }
}
