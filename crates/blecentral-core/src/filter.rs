//! Scan filter options and device predicates.
//!
//! [`ScanFilterOptions`] is what callers hand to a scan; the port pushes as much
//! of it into the platform scan call as the platform supports and applies the
//! rest through [`ScanFilterOptions::matches`]. Categories combine as AND, the
//! entries inside one category as OR.
//!
//! [`DeviceFilter`] is the caller's own post-filter, evaluated by the scan
//! controller on every advertisement that made it through the radio.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ConfigError;
use crate::device::{Advertisement, Device};

/// Service-data filter: matches when the advertisement carries data for
/// `service_uuid` whose leading bytes equal `data` under `mask`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDataFilter {
    /// Service the data is attached to.
    pub service_uuid: Uuid,
    /// Expected leading bytes.
    #[serde(default)]
    pub data: Vec<u8>,
    /// Optional bit mask, same length as `data`.
    #[serde(default)]
    pub mask: Option<Vec<u8>>,
}

/// Manufacturer-data filter: matches when the advertisement carries data for
/// `company_id` whose leading bytes equal `data` under `mask`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturerDataFilter {
    /// Bluetooth SIG company identifier.
    pub company_id: u16,
    /// Expected leading bytes.
    #[serde(default)]
    pub data: Vec<u8>,
    /// Optional bit mask, same length as `data`.
    #[serde(default)]
    pub mask: Option<Vec<u8>>,
}

/// Scan filter options. Every category is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanFilterOptions {
    /// Advertised service UUIDs.
    pub service_uuids: Vec<Uuid>,
    /// Service data patterns.
    pub service_data: Vec<ServiceDataFilter>,
    /// Manufacturer data patterns.
    pub manufacturer_data: Vec<ManufacturerDataFilter>,
    /// Device addresses (`AA:BB:CC:DD:EE:FF`), compared case-insensitively.
    pub device_addresses: Vec<String>,
    /// Exact advertised names.
    pub device_names: Vec<String>,
}

impl ScanFilterOptions {
    /// Returns `true` when no category is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.service_uuids.is_empty()
            && self.service_data.is_empty()
            && self.manufacturer_data.is_empty()
            && self.device_addresses.is_empty()
            && self.device_names.is_empty()
    }

    /// Evaluate the filter against an advertisement.
    #[must_use]
    pub fn matches(&self, adv: &Advertisement) -> bool {
        let services = self.service_uuids.is_empty()
            || self
                .service_uuids
                .iter()
                .any(|uuid| adv.service_uuids.contains(uuid));

        let service_data = self.service_data.is_empty()
            || self.service_data.iter().any(|f| {
                adv.service_data
                    .get(&f.service_uuid)
                    .is_some_and(|payload| masked_prefix_eq(payload, &f.data, f.mask.as_deref()))
            });

        let manufacturer = self.manufacturer_data.is_empty()
            || self.manufacturer_data.iter().any(|f| {
                adv.manufacturer_data
                    .get(&f.company_id)
                    .is_some_and(|payload| masked_prefix_eq(payload, &f.data, f.mask.as_deref()))
            });

        let addresses = self.device_addresses.is_empty()
            || adv.address.as_deref().is_some_and(|address| {
                self.device_addresses
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(address))
            });

        let names = self.device_names.is_empty()
            || adv
                .local_name
                .as_deref()
                .is_some_and(|name| self.device_names.iter().any(|n| n == name));

        services && service_data && manufacturer && addresses && names
    }

    /// Check that every mask is as long as its data.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError::ValidationError`] naming the first bad entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let service_masks = self
            .service_data
            .iter()
            .map(|f| (format!("service_data[{}]", f.service_uuid), &f.data, &f.mask));
        let manufacturer_masks = self
            .manufacturer_data
            .iter()
            .map(|f| (format!("manufacturer_data[{:#06x}]", f.company_id), &f.data, &f.mask));

        for (field, data, mask) in service_masks.chain(manufacturer_masks) {
            if let Some(mask) = mask {
                if mask.len() < data.len() {
                    return Err(ConfigError::ValidationError {
                        field,
                        message: format!(
                            "mask has {} bytes but data has {}",
                            mask.len(),
                            data.len()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

fn masked_prefix_eq(payload: &[u8], expected: &[u8], mask: Option<&[u8]>) -> bool {
    if payload.len() < expected.len() {
        return false;
    }
    expected.iter().enumerate().all(|(i, want)| {
        let m = mask.and_then(|m| m.get(i)).copied().unwrap_or(0xFF);
        payload[i] & m == want & m
    })
}

/// Caller-supplied predicate applied to each discovered device.
#[derive(Clone)]
pub struct DeviceFilter(Arc<dyn Fn(&Device) -> bool + Send + Sync>);

impl DeviceFilter {
    /// Wrap a predicate.
    pub fn new(predicate: impl Fn(&Device) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// A filter that accepts every device.
    #[must_use]
    pub fn accept_all() -> Self {
        Self::new(|_| true)
    }

    /// Evaluate the predicate.
    #[must_use]
    pub fn accepts(&self, device: &Device) -> bool {
        (self.0)(device)
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::accept_all()
    }
}

impl fmt::Debug for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceFilter(..)")
    }
}
