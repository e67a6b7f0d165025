//! Native radio port: the capability interface platform radios implement.
//!
//! The core never talks to a platform API directly. It calls the primitives
//! of [`NativeRadioPort`] and learns about their outcome through the
//! [`NativeEventSink`] the adapter hands to the port on construction.
//!
//! The primitives are "fire and observe": returning `Ok` from
//! [`NativeRadioPort::connect`] only means the request was issued. The real
//! outcome arrives later as a [`NativeEvent`], possibly from another thread.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectParameters, ScanMatchMode, ScanMode};
use crate::device::{Device, DeviceId};
use crate::error::Result;
use crate::filter::{DeviceFilter, ScanFilterOptions};

/// Platform scan settings forwarded with every start-scan call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSettings {
    /// Report every advertisement instead of the first per device.
    pub allow_duplicates: bool,
    /// Power/latency tradeoff.
    pub mode: ScanMode,
    /// Match aggressiveness.
    pub match_mode: ScanMatchMode,
}

/// Platform-specific primitives the core drives.
///
/// Implementations must be callable from any task and must deliver outcomes
/// through the attached sink rather than through return values.
#[async_trait]
pub trait NativeRadioPort: Send + Sync + 'static {
    /// Receive the sink to report native events through. Called once by
    /// [`Adapter::new`](crate::Adapter::new).
    fn attach(&self, sink: NativeEventSink);

    /// Start a platform scan. Discoveries are reported via
    /// [`NativeEventSink::discovered`] until [`stop_scan`](Self::stop_scan)
    /// is called or `cancel` fires.
    async fn start_scan(
        &self,
        options: &ScanFilterOptions,
        settings: ScanSettings,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Stop the platform scan.
    async fn stop_scan(&self) -> Result<()>;

    /// Issue a connect request. The outcome is reported via
    /// [`NativeEventSink::connected`] or [`NativeEventSink::connection_failed`].
    ///
    /// `cancel` fires when the caller gives up; ports that can abort a pending
    /// connect should register on it.
    async fn connect(
        &self,
        device: &Device,
        params: &ConnectParameters,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Issue a disconnect request. The outcome is reported via
    /// [`NativeEventSink::disconnected`] or [`NativeEventSink::disconnect_failed`].
    async fn disconnect(&self, device: &Device) -> Result<()>;

    /// Resolve a device the core has not discovered, e.g. a bonded or
    /// previously seen peripheral. `Ok(None)` means the platform does not
    /// know the id.
    async fn connect_by_id(
        &self,
        id: DeviceId,
        filter: &DeviceFilter,
        cancel: CancellationToken,
    ) -> Result<Option<Device>>;
}

/// Inbound signal raised by the native radio.
#[derive(Debug, Clone)]
pub enum NativeEvent {
    /// An advertisement was received.
    Discovered(Device),
    /// A connection was established.
    Connected(Device),
    /// A connection ended. `was_requested` is `false` for link loss.
    Disconnected {
        /// Whether this adapter asked for the disconnect.
        was_requested: bool,
        /// Device whose link ended.
        device: Device,
    },
    /// A connect attempt definitively failed.
    ConnectionFailed {
        /// Device that failed to connect.
        device: Device,
        /// Native failure description.
        message: String,
    },
    /// A disconnect request failed.
    DisconnectFailed {
        /// Device that failed to disconnect.
        device: Device,
        /// Native failure description.
        message: String,
    },
}

/// Receiver side of [`NativeEventSink`], implemented by the adapter.
pub(crate) trait NativeEventHandler: Send + Sync {
    fn handle_native_event(&self, event: NativeEvent);
}

/// Handle a port uses to report native events.
///
/// Cloneable and cheap; every method is synchronous so it can be called from
/// radio callback threads without an executor. The sink does not keep the
/// adapter alive: events reported after the adapter is dropped are discarded.
#[derive(Clone)]
pub struct NativeEventSink {
    target: Weak<dyn NativeEventHandler>,
}

impl NativeEventSink {
    pub(crate) fn new(target: Weak<dyn NativeEventHandler>) -> Self {
        Self { target }
    }

    /// Deliver an event. Returns `false` if the adapter no longer exists.
    pub fn dispatch(&self, event: NativeEvent) -> bool {
        match self.target.upgrade() {
            Some(target) => {
                target.handle_native_event(event);
                true
            }
            None => {
                tracing::trace!(?event, "Native event after adapter shutdown, dropped");
                false
            }
        }
    }

    /// Report an advertisement.
    pub fn discovered(&self, device: Device) -> bool {
        self.dispatch(NativeEvent::Discovered(device))
    }

    /// Report an established connection.
    pub fn connected(&self, device: Device) -> bool {
        self.dispatch(NativeEvent::Connected(device))
    }

    /// Report an ended connection.
    pub fn disconnected(&self, was_requested: bool, device: Device) -> bool {
        self.dispatch(NativeEvent::Disconnected {
            was_requested,
            device,
        })
    }

    /// Report a definitive connect failure.
    pub fn connection_failed(&self, device: Device, message: impl Into<String>) -> bool {
        self.dispatch(NativeEvent::ConnectionFailed {
            device,
            message: message.into(),
        })
    }

    /// Report a failed disconnect request.
    pub fn disconnect_failed(&self, device: Device, message: impl Into<String>) -> bool {
        self.dispatch(NativeEvent::DisconnectFailed {
            device,
            message: message.into(),
        })
    }

    /// Returns `true` while the adapter still exists.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.target.strong_count() > 0
    }
}

impl fmt::Debug for NativeEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEventSink")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Shared-ownership alias used by the adapter.
pub type SharedPort = Arc<dyn NativeRadioPort>;
