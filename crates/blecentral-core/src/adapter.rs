//! The adapter facade.
//!
//! An [`Adapter`] wires one registry, scan controller, connection orchestrator
//! and notification bus to a [`NativeRadioPort`]. It is the only type most
//! callers need. Clones share the same state.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{AdapterConfig, ConnectParameters};
use crate::connection::ConnectionOrchestrator;
use crate::device::{Device, DeviceId};
use crate::error::Result;
use crate::events::{AdapterEvent, EventBus};
use crate::filter::{DeviceFilter, ScanFilterOptions};
use crate::port::{NativeEvent, NativeEventHandler, NativeEventSink, NativeRadioPort, SharedPort};
use crate::registry::DeviceRegistry;
use crate::scan::{ScanController, ScanOutcome, ScanState};

struct AdapterShared {
    config: AdapterConfig,
    registry: Arc<DeviceRegistry>,
    scan: ScanController,
    connections: ConnectionOrchestrator,
    events: EventBus,
}

impl NativeEventHandler for AdapterShared {
    fn handle_native_event(&self, event: NativeEvent) {
        match event {
            NativeEvent::Discovered(device) => self.scan.on_native_discovered(&device),
            NativeEvent::Connected(device) => self.connections.on_connected(&device),
            NativeEvent::Disconnected {
                was_requested,
                device,
            } => self.connections.on_disconnected(was_requested, &device),
            NativeEvent::ConnectionFailed { device, message } => {
                self.connections.on_connection_failed(&device, message);
            }
            NativeEvent::DisconnectFailed { device, message } => {
                self.connections.on_disconnect_failed(&device, message);
            }
        }
    }
}

/// BLE central adapter.
///
/// # Example
///
/// ```rust
/// use blecentral_core::{Adapter, AdapterConfig, ConnectParameters, ScanFilterOptions};
/// use blecentral_core::sim::SimulatedRadio;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> blecentral_core::Result<()> {
/// let adapter = Adapter::new(AdapterConfig::default(), SimulatedRadio::new());
///
/// adapter
///     .start_scan(ScanFilterOptions::default(), None, CancellationToken::new())
///     .await?;
///
/// for device in adapter.discovered_devices() {
///     adapter
///         .connect(&device, &ConnectParameters::default(), CancellationToken::new())
///         .await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Adapter {
    shared: Arc<AdapterShared>,
    sink: NativeEventSink,
}

impl Adapter {
    /// Build an adapter over `port` and attach the port's event sink.
    pub fn new<P: NativeRadioPort>(config: AdapterConfig, port: Arc<P>) -> Self {
        Self::with_port(config, port)
    }

    /// [`new`](Self::new) for an already type-erased port.
    #[must_use]
    pub fn with_port(config: AdapterConfig, port: SharedPort) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let events = EventBus::new(config.event_capacity);
        let scan = ScanController::new(Arc::clone(&port), Arc::clone(&registry), events.clone(), &config);
        let connections =
            ConnectionOrchestrator::new(Arc::clone(&port), Arc::clone(&registry), events.clone(), &config);

        let shared = Arc::new(AdapterShared {
            config,
            registry,
            scan,
            connections,
            events,
        });
        let weak = Arc::downgrade(&shared);
        let target: Weak<dyn NativeEventHandler> = weak;
        let sink = NativeEventSink::new(target);
        port.attach(sink.clone());
        debug!("Adapter attached to native radio");

        Self { shared, sink }
    }

    /// Configuration the adapter was built with.
    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.shared.config
    }

    /// Sink for reporting native events, the same one handed to the port.
    #[must_use]
    pub fn event_sink(&self) -> NativeEventSink {
        self.sink.clone()
    }

    /// Register an observer for [`AdapterEvent`]s.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.shared.events.subscribe()
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    /// Run a scan session with the configured timeout.
    ///
    /// See [`ScanController::start_scan`].
    ///
    /// # Errors
    ///
    /// Returns an error if `options` is invalid or the radio cannot start scanning.
    pub async fn start_scan(
        &self,
        options: ScanFilterOptions,
        filter: Option<DeviceFilter>,
        cancel: CancellationToken,
    ) -> Result<ScanOutcome> {
        self.shared.scan.start_scan(options, filter, cancel).await
    }

    /// Run a scan session with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if `options` is invalid or the radio cannot start scanning.
    pub async fn start_scan_for(
        &self,
        options: ScanFilterOptions,
        filter: Option<DeviceFilter>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ScanOutcome> {
        self.shared.scan.start_scan_for(options, filter, timeout, cancel).await
    }

    /// Cancel the running scan. Returns `false` if none was running.
    pub fn stop_scan(&self) -> bool {
        self.shared.scan.stop_scan()
    }

    /// Current scan state.
    #[must_use]
    pub fn scan_state(&self) -> ScanState {
        self.shared.scan.state()
    }

    /// Returns `true` while a scan session is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.shared.scan.is_scanning()
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Connect to `device`. See [`ConnectionOrchestrator::connect`].
    ///
    /// # Errors
    ///
    /// Returns a timeout, cancellation or native connection error.
    pub async fn connect(
        &self,
        device: &Device,
        params: &ConnectParameters,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.shared.connections.connect(device, params, cancel).await
    }

    /// Connect to a device by id. See [`ConnectionOrchestrator::connect_by_id`].
    ///
    /// # Errors
    ///
    /// Returns [`CentralError::DeviceNotFound`](crate::CentralError::DeviceNotFound)
    /// or any connect error.
    pub async fn connect_by_id(
        &self,
        id: DeviceId,
        params: &ConnectParameters,
        filter: &DeviceFilter,
        cancel: CancellationToken,
    ) -> Result<Device> {
        self.shared
            .connections
            .connect_by_id(id, params, filter, cancel)
            .await
    }

    /// Disconnect `device`. See [`ConnectionOrchestrator::disconnect`].
    ///
    /// # Errors
    ///
    /// Returns a native disconnect failure or a disconnect timeout.
    pub async fn disconnect(&self, device: &Device) -> Result<()> {
        self.shared.connections.disconnect(device).await
    }

    /// Disconnect every connected device, returning the first error.
    ///
    /// # Errors
    ///
    /// Returns the first failure; every device is still attempted.
    pub async fn disconnect_all(&self) -> Result<()> {
        let mut first_error = None;
        for device in self.connected_devices() {
            if let Err(e) = self.disconnect(&device).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Devices seen during the current scan session.
    #[must_use]
    pub fn discovered_devices(&self) -> Vec<Device> {
        self.shared.registry.snapshot_discovered()
    }

    /// A discovered device by id.
    #[must_use]
    pub fn discovered_device(&self, id: DeviceId) -> Option<Device> {
        self.shared.registry.get_discovered(id)
    }

    /// Devices the radio reports as connected.
    #[must_use]
    pub fn connected_devices(&self) -> Vec<Device> {
        self.shared.registry.snapshot_connected()
    }

    /// A connected device by id.
    #[must_use]
    pub fn connected_device(&self, id: DeviceId) -> Option<Device> {
        self.shared.registry.get_connected(id)
    }

    /// Waiters still registered for native connection signals. Zero whenever
    /// no connect or disconnect call is in flight.
    #[must_use]
    pub fn pending_signal_subscribers(&self) -> usize {
        self.shared.connections.pending_signal_subscribers()
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("scan_state", &self.scan_state())
            .field("discovered", &self.shared.registry.snapshot_discovered().len())
            .field("connected", &self.shared.registry.snapshot_connected().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ConnectionState, NativeHandle};
    use crate::sim::SimulatedRadio;

    fn device(n: u128) -> Device {
        Device::new(DeviceId::from_u128(n), NativeHandle::new(format!("dev-{n}")))
    }

    #[tokio::test]
    async fn test_sink_detaches_when_adapter_dropped() {
        let radio = SimulatedRadio::new();
        let adapter = Adapter::new(AdapterConfig::default(), radio.clone());
        let sink = adapter.event_sink();
        assert!(sink.is_attached());

        drop(adapter);

        assert!(!sink.is_attached());
        assert!(!sink.connected(device(1)));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let adapter = Adapter::new(AdapterConfig::default(), SimulatedRadio::new());
        let other = adapter.clone();

        adapter.event_sink().connected(device(1));

        let connected = other.connected_device(DeviceId::from_u128(1)).unwrap();
        assert_eq!(connected.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_discovery_while_idle_is_ignored() {
        let adapter = Adapter::new(AdapterConfig::default(), SimulatedRadio::new());
        let mut events = adapter.subscribe();

        assert!(adapter.event_sink().discovered(device(1)));

        assert!(adapter.discovered_devices().is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_all() {
        let adapter = Adapter::new(AdapterConfig::default(), SimulatedRadio::new());
        for n in 1..=3 {
            adapter
                .connect(&device(n), &ConnectParameters::default(), CancellationToken::new())
                .await
                .unwrap();
        }
        assert_eq!(adapter.connected_devices().len(), 3);

        adapter.disconnect_all().await.unwrap();

        assert!(adapter.connected_devices().is_empty());
    }
}
