//! Remote device model.
//!
//! A [`Device`] is a cheap, cloneable handle. Its identity ([`DeviceId`]) and
//! native handle are fixed at creation; name, signal strength, connection state
//! and the last advertisement are updated in place as native callbacks arrive.
//! Two handles are equal when their ids are equal.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Stable 128-bit identity of a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Wrap an existing UUID.
    #[must_use]
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Build an id from its raw 128-bit value.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Embed a 48-bit MAC address in the low bytes of the id.
    ///
    /// Radios that only expose addresses use this so the same peripheral
    /// always maps to the same id.
    #[must_use]
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut bytes = [0u8; 16];
        bytes[10..].copy_from_slice(&mac);
        Self(Uuid::from_bytes(bytes))
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DeviceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for DeviceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Connection state of a device as seen by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No native connection.
    #[default]
    Disconnected,
    /// A connect call is in flight.
    Connecting,
    /// The radio confirmed a connection.
    Connected,
    /// Connected at the OS level but not usable by this process.
    Limited,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Limited => "limited",
        };
        f.write_str(label)
    }
}

/// Opaque key the native radio port uses to find its own object for a device.
///
/// The port owns the native resource; a device only carries this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NativeHandle(Arc<str>);

impl NativeHandle {
    /// Create a handle from any port-specific key (address, object path, ...).
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// The port-specific key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Advertisement metadata a port extracted from the last received packet.
///
/// Payload parsing belongs to the port; the core only reads these fields to
/// evaluate scan filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Advertiser address in `AA:BB:CC:DD:EE:FF` form, when the platform exposes it.
    pub address: Option<String>,
    /// Advertised service UUIDs.
    pub service_uuids: Vec<Uuid>,
    /// Service data keyed by service UUID.
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Manufacturer data keyed by company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Advertised transmit power in dBm.
    pub tx_power: Option<i16>,
}

#[derive(Debug)]
struct DeviceInner {
    id: DeviceId,
    native: NativeHandle,
    state: RwLock<DeviceState>,
}

#[derive(Debug, Clone, Default)]
struct DeviceState {
    name: Option<String>,
    rssi: Option<i16>,
    connection_state: ConnectionState,
    advertisement: Advertisement,
}

/// Handle to a remote device.
#[derive(Debug, Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Create a device record.
    pub fn new(id: DeviceId, native: NativeHandle) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                id,
                native,
                state: RwLock::new(DeviceState::default()),
            }),
        }
    }

    /// Set the initial name.
    #[must_use]
    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.inner.state.write().name = Some(name.into());
        self
    }

    /// Set the initial signal strength.
    #[must_use]
    pub fn with_rssi(self, rssi: i16) -> Self {
        self.inner.state.write().rssi = Some(rssi);
        self
    }

    /// Set the initial advertisement. Also fills in the name when the
    /// advertisement carries one and none was set.
    #[must_use]
    pub fn with_advertisement(self, advertisement: Advertisement) -> Self {
        {
            let mut state = self.inner.state.write();
            if state.name.is_none() {
                state.name.clone_from(&advertisement.local_name);
            }
            state.advertisement = advertisement;
        }
        self
    }

    /// Device identity.
    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    /// Port-specific handle.
    #[must_use]
    pub fn native(&self) -> &NativeHandle {
        &self.inner.native
    }

    /// Last known name.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.inner.state.read().name.clone()
    }

    /// Last known RSSI in dBm.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.inner.state.read().rssi
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.read().connection_state
    }

    /// Last advertisement received for this device.
    #[must_use]
    pub fn advertisement(&self) -> Advertisement {
        self.inner.state.read().advertisement.clone()
    }

    /// Returns `true` if both handles point at the same record, not just the same id.
    #[must_use]
    pub fn same_record(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn set_connection_state(&self, connection_state: ConnectionState) {
        self.inner.state.write().connection_state = connection_state;
    }

    /// Copy name, RSSI and advertisement from a fresher record of the same device.
    pub(crate) fn refresh_from(&self, fresh: &Self) {
        if self.same_record(fresh) {
            return;
        }
        let fresh_state = fresh.inner.state.read().clone();
        let mut state = self.inner.state.write();
        if fresh_state.name.is_some() {
            state.name = fresh_state.name;
        }
        if fresh_state.rssi.is_some() {
            state.rssi = fresh_state.rssi;
        }
        state.advertisement = fresh_state.advertisement;
    }

    /// Point-in-time copy of the device for reporting.
    #[must_use]
    pub fn info(&self) -> DeviceInfo {
        let state = self.inner.state.read();
        DeviceInfo {
            id: self.inner.id.to_string(),
            name: state.name.clone(),
            rssi_dbm: state.rssi,
            connection_state: state.connection_state,
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.inner.id),
            None => write!(f, "{}", self.inner.id),
        }
    }
}

/// Serializable snapshot of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "00000000-0000-0000-0000-aabbccddeeff",
    "name": "Heart Rate Strap",
    "rssi_dbm": -58,
    "connection_state": "connected"
}))]
pub struct DeviceInfo {
    /// Device id (hyphenated UUID).
    #[schema(example = "00000000-0000-0000-0000-aabbccddeeff")]
    pub id: String,

    /// Device name (if known).
    #[schema(example = "Heart Rate Strap")]
    pub name: Option<String>,

    /// Last signal strength in dBm.
    #[schema(example = -58)]
    pub rssi_dbm: Option<i16>,

    /// Connection state at snapshot time.
    pub connection_state: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_by_id_only() {
        let a = Device::new(DeviceId::from_u128(7), NativeHandle::new("a")).with_name("one");
        let b = Device::new(DeviceId::from_u128(7), NativeHandle::new("b")).with_name("two");
        assert_eq!(a, b);
        assert!(!a.same_record(&b));
        assert!(a.same_record(&a.clone()));
    }

    #[test]
    fn test_from_mac_is_stable() {
        let mac = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
        let id = DeviceId::from_mac(mac);
        assert_eq!(id, DeviceId::from_mac(mac));
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-aabbccddeeff");
        assert_eq!("00000000-0000-0000-0000-aabbccddeeff".parse::<DeviceId>().unwrap(), id);
    }

    #[test]
    fn test_state_is_shared_between_clones() {
        let device = Device::new(DeviceId::from_u128(1), NativeHandle::new("x"));
        let clone = device.clone();
        clone.set_connection_state(ConnectionState::Connected);
        assert_eq!(device.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_refresh_keeps_identity_and_updates_metadata() {
        let stored = Device::new(DeviceId::from_u128(1), NativeHandle::new("x")).with_name("old");
        stored.set_connection_state(ConnectionState::Connected);
        let fresh = Device::new(DeviceId::from_u128(1), NativeHandle::new("x")).with_rssi(-40);

        stored.refresh_from(&fresh);

        assert_eq!(stored.name().as_deref(), Some("old"));
        assert_eq!(stored.rssi(), Some(-40));
        assert_eq!(stored.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_advertisement_name_fills_missing_name() {
        let device = Device::new(DeviceId::from_u128(1), NativeHandle::new("x"))
            .with_advertisement(Advertisement {
                local_name: Some("Sensor".into()),
                ..Advertisement::default()
            });
        assert_eq!(device.name().as_deref(), Some("Sensor"));
    }

    #[test]
    fn test_info_serialization() {
        let device = Device::new(DeviceId::from_u128(1), NativeHandle::new("x")).with_rssi(-60);
        let json = serde_json::to_string(&device.info()).unwrap();
        assert!(json.contains("\"connection_state\":\"disconnected\""));
        assert!(json.contains("\"rssi_dbm\":-60"));
    }
}
