//! # blecentral-core
//!
//! Control plane for a Bluetooth Low Energy central.
//!
//! This crate turns a callback-style native radio stack into cancellable,
//! deadline-bounded async operations and keeps track of which remote devices
//! have been discovered and which are connected.
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`adapter`] - The [`Adapter`] facade most callers use
//! - [`scan`] - Single-flight scan sessions with restart, timeout and deduplication
//! - [`connection`] - Connect retry loop, disconnect, and native connection signal handling
//! - [`bridge`] - Correlating native callbacks with the call awaiting them
//! - [`registry`] - Discovered and connected device sets
//! - [`port`] - The [`NativeRadioPort`] interface platform radios implement
//! - [`sim`] - An in-process scriptable radio
//! - `bluez` - BlueZ radio for Linux (feature `bluetooth`)
//! - [`device`], [`filter`], [`events`] - Data types
//! - [`config`] - Adapter configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod adapter;
pub mod bridge;
#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod events;
pub mod filter;
pub mod port;
pub mod registry;
pub mod scan;
pub mod sim;

// Re-export primary types for convenience
pub use adapter::Adapter;
#[cfg(feature = "bluetooth")]
pub use bluez::BluezRadio;
pub use config::{
    default_config_path, AdapterConfig, ConfigError, ConfigResult, ConnectParameters,
    ConnectionPriority, ScanMatchMode, ScanMode,
};
pub use device::{Advertisement, ConnectionState, Device, DeviceId, DeviceInfo, NativeHandle};
pub use error::{CentralError, Result};
pub use events::AdapterEvent;
pub use filter::{DeviceFilter, ManufacturerDataFilter, ScanFilterOptions, ServiceDataFilter};
pub use port::{NativeEvent, NativeEventSink, NativeRadioPort, ScanSettings, SharedPort};
pub use scan::{ScanOutcome, ScanState};
pub use sim::SimulatedRadio;
