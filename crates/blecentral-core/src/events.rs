//! High-level notifications for external observers.

use std::fmt;

use tokio::sync::broadcast;

use crate::device::Device;

/// Lifecycle notification raised by the adapter.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// An advertisement passed the scan's device filter. Raised for every one.
    Advertised(Device),
    /// A device was seen for the first time in the current scan session.
    Discovered(Device),
    /// The radio reported a connection.
    Connected(Device),
    /// A disconnect this adapter requested completed.
    Disconnected(Device),
    /// The link dropped without being asked to.
    ConnectionLost {
        /// Device whose link dropped.
        device: Device,
        /// Human-readable reason.
        message: String,
    },
    /// The radio reported a definitive connect failure.
    ConnectionError {
        /// Device that failed to connect.
        device: Device,
        /// Native failure description.
        message: String,
    },
    /// A scan session ran for its full timeout.
    ScanTimeoutElapsed,
}

impl AdapterEvent {
    /// Device the event is about, if any.
    #[must_use]
    pub fn device(&self) -> Option<&Device> {
        match self {
            Self::Advertised(device)
            | Self::Discovered(device)
            | Self::Connected(device)
            | Self::Disconnected(device)
            | Self::ConnectionLost { device, .. }
            | Self::ConnectionError { device, .. } => Some(device),
            Self::ScanTimeoutElapsed => None,
        }
    }

    /// Short machine-friendly name of the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Advertised(_) => "advertised",
            Self::Discovered(_) => "discovered",
            Self::Connected(_) => "connected",
            Self::Disconnected(_) => "disconnected",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::ConnectionError { .. } => "connection_error",
            Self::ScanTimeoutElapsed => "scan_timeout_elapsed",
        }
    }
}

impl fmt::Display for AdapterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost { device, message } | Self::ConnectionError { device, message } => {
                write!(f, "{} {{ device: {device}, message: {message} }}", self.kind())
            }
            other => match other.device() {
                Some(device) => write!(f, "{} {{ device: {device} }}", other.kind()),
                None => f.write_str(other.kind()),
            },
        }
    }
}

/// Fan-out of [`AdapterEvent`]s to any number of observers.
///
/// Publishing never blocks; an observer that falls behind loses the oldest
/// events (see [`broadcast::error::RecvError::Lagged`]).
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AdapterEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per observer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new observer.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no observers is not an error.
    pub fn emit(&self, event: AdapterEvent) {
        tracing::trace!(event = %event, "Adapter event");
        let _ = self.sender.send(event);
    }
}
