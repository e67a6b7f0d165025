//! Connect and disconnect protocols, and the handlers for native connection
//! signals.
//!
//! A connect call owns a deadline scope linked to the caller's token. Inside
//! it, native connect attempts are retried until one produces a `connected`
//! signal or the scope ends. Native connect latency varies too much for a
//! fixed attempt count to be meaningful, so the deadline is the only bound.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::bridge::{await_signal, FailureSignal, Matcher, SignalHub};
use crate::config::{AdapterConfig, ConnectParameters};
use crate::device::{ConnectionState, Device, DeviceId};
use crate::error::{CentralError, Result};
use crate::events::{AdapterEvent, EventBus};
use crate::filter::DeviceFilter;
use crate::port::SharedPort;
use crate::registry::DeviceRegistry;

const LINK_LOST_MESSAGE: &str = "Connection lost";

/// Cancellation scope that ends when the parent is cancelled or when the
/// deadline passes, whichever comes first.
struct DeadlineScope {
    token: CancellationToken,
    timer: JoinHandle<()>,
}

impl DeadlineScope {
    fn new(parent: &CancellationToken, deadline: Duration) -> Self {
        let token = parent.child_token();
        let expire = token.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                () = expire.cancelled() => {}
                () = tokio::time::sleep(deadline) => expire.cancel(),
            }
        });
        Self { token, timer }
    }

    const fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn is_over(&self) -> bool {
        self.token.is_cancelled()
    }
}

// Only the timer is torn down: the token was handed to the port, and a
// successful call must not look like the caller giving up.
impl Drop for DeadlineScope {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Runs the connect/disconnect protocols for one adapter.
pub struct ConnectionOrchestrator {
    port: SharedPort,
    registry: Arc<DeviceRegistry>,
    events: EventBus,
    connect_timeout: Duration,
    retry_delay: Duration,
    disconnect_timeout: Duration,
    connected: Arc<SignalHub<Device>>,
    connect_failed: Arc<SignalHub<FailureSignal>>,
    disconnected: Arc<SignalHub<Device>>,
    disconnect_failed: Arc<SignalHub<FailureSignal>>,
}

impl ConnectionOrchestrator {
    pub(crate) fn new(
        port: SharedPort,
        registry: Arc<DeviceRegistry>,
        events: EventBus,
        config: &AdapterConfig,
    ) -> Self {
        Self {
            port,
            registry,
            events,
            connect_timeout: config.connect_timeout(),
            retry_delay: config.connect_retry_delay(),
            disconnect_timeout: config.disconnect_timeout(),
            connected: SignalHub::new(),
            connect_failed: SignalHub::new(),
            disconnected: SignalHub::new(),
            disconnect_failed: SignalHub::new(),
        }
    }

    /// Connect to `device`, retrying native failures until the deadline.
    ///
    /// The deadline is `params.timeout`, or the configured connect timeout.
    /// Returns immediately if the device is already connected.
    ///
    /// # Errors
    ///
    /// - [`CentralError::Cancelled`] if `cancel` fires first
    /// - [`CentralError::ConnectionTimeout`] if the deadline passes
    /// - [`CentralError::ConnectionError`] if the last native failure landed
    ///   after the deadline
    #[instrument(skip_all, fields(device_id = %device.id()))]
    pub async fn connect(
        &self,
        device: &Device,
        params: &ConnectParameters,
        cancel: CancellationToken,
    ) -> Result<()> {
        if device.connection_state() == ConnectionState::Connected
            || self.registry.is_connected(device.id())
        {
            debug!("Already connected");
            device.set_connection_state(ConnectionState::Connected);
            return Ok(());
        }

        let timeout = params.timeout.unwrap_or(self.connect_timeout);
        let scope = DeadlineScope::new(&cancel, timeout);
        device.set_connection_state(ConnectionState::Connecting);

        let result = self.retry_until_deadline(device, params, &cancel, &scope, timeout).await;
        if result.is_err() && device.connection_state() != ConnectionState::Connected {
            device.set_connection_state(ConnectionState::Disconnected);
        }
        result
    }

    async fn retry_until_deadline(
        &self,
        device: &Device,
        params: &ConnectParameters,
        cancel: &CancellationToken,
        scope: &DeadlineScope,
        timeout: Duration,
    ) -> Result<()> {
        let id = device.id();
        let started = tokio::time::Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(attempt, "Issuing native connect");

            let outcome = await_signal(
                self.port.connect(device, params, scope.token().clone()),
                Matcher::new(&self.connected, id, |d: &Device| Some(d.clone())),
                Matcher::new(&self.connect_failed, id, move |f: &FailureSignal| {
                    Some(CentralError::ConnectionError {
                        device: id,
                        message: f.message.clone(),
                    })
                }),
                scope.token(),
            )
            .await;

            match outcome {
                Ok(_) => {
                    device.set_connection_state(ConnectionState::Connected);
                    info!(
                        attempt,
                        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "Connected"
                    );
                    return Ok(());
                }
                Err(CentralError::Cancelled) if scope.is_over() => {
                    return Err(Self::scope_ended(id, cancel, timeout));
                }
                Err(e) if scope.is_over() => {
                    if cancel.is_cancelled() {
                        return Err(CentralError::Cancelled);
                    }
                    warn!(attempt, error = %e, "Connect attempt failed at the deadline");
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Connect attempt failed, retrying");
                }
            }

            tokio::select! {
                biased;
                () = scope.token().cancelled() => return Err(Self::scope_ended(id, cancel, timeout)),
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    fn scope_ended(id: DeviceId, cancel: &CancellationToken, timeout: Duration) -> CentralError {
        if cancel.is_cancelled() {
            debug!("Connect cancelled by caller");
            CentralError::Cancelled
        } else {
            warn!(timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "Connect timed out");
            CentralError::ConnectionTimeout {
                device: id,
                timeout,
            }
        }
    }

    /// Connect to a device known only by id.
    ///
    /// Already connected devices are returned as-is and discovered devices
    /// are connected directly. Otherwise the port is asked to resolve the id.
    ///
    /// # Errors
    ///
    /// [`CentralError::DeviceNotFound`] if the port cannot resolve `id`, plus
    /// every error of [`connect`](Self::connect).
    #[instrument(skip(self, params, filter, cancel))]
    pub async fn connect_by_id(
        &self,
        id: DeviceId,
        params: &ConnectParameters,
        filter: &DeviceFilter,
        cancel: CancellationToken,
    ) -> Result<Device> {
        if let Some(device) = self.registry.get_connected(id) {
            debug!("Already connected");
            return Ok(device);
        }

        let device = match self.registry.get_discovered(id) {
            Some(device) => device,
            None => {
                debug!("Not discovered, asking the radio to resolve it");
                self.port
                    .connect_by_id(id, filter, cancel.clone())
                    .await?
                    .ok_or(CentralError::DeviceNotFound(id))?
            }
        };

        self.connect(&device, params, cancel).await?;
        Ok(self.registry.canonical(&device))
    }

    /// Disconnect `device` with a single native attempt.
    ///
    /// A device that is not in the connected set is left alone and the call
    /// succeeds without touching the radio.
    ///
    /// # Errors
    ///
    /// [`CentralError::DisconnectFailed`] if the radio reports a failure,
    /// [`CentralError::DisconnectTimeout`] if no outcome arrives in time.
    #[instrument(skip_all, fields(device_id = %device.id()))]
    pub async fn disconnect(&self, device: &Device) -> Result<()> {
        let id = device.id();
        let Some(connected) = self.registry.get_connected(id) else {
            debug!(error = %CentralError::DisconnectNotConnected(id), "Disconnect skipped");
            return Ok(());
        };

        let scope = DeadlineScope::new(&CancellationToken::new(), self.disconnect_timeout);
        let outcome = await_signal(
            self.port.disconnect(&connected),
            Matcher::new(&self.disconnected, id, |_: &Device| Some(())),
            Matcher::new(&self.disconnect_failed, id, move |f: &FailureSignal| {
                Some(CentralError::DisconnectFailed {
                    device: id,
                    message: f.message.clone(),
                })
            }),
            scope.token(),
        )
        .await;

        match outcome {
            Ok(()) => {
                device.set_connection_state(ConnectionState::Disconnected);
                info!("Disconnected");
                Ok(())
            }
            Err(CentralError::Cancelled) => {
                warn!("Disconnect timed out");
                Err(CentralError::DisconnectTimeout {
                    device: id,
                    timeout: self.disconnect_timeout,
                })
            }
            Err(e) => {
                warn!(error = %e, "Disconnect failed");
                Err(e)
            }
        }
    }

    /// Native `connected` signal.
    pub(crate) fn on_connected(&self, device: &Device) {
        let canonical = self.registry.canonical(device);
        canonical.set_connection_state(ConnectionState::Connected);
        device.set_connection_state(ConnectionState::Connected);
        self.registry.add_connected(&canonical);
        debug!(device_id = %canonical.id(), "Native connected");

        self.connected.publish(&canonical);
        self.events.emit(AdapterEvent::Connected(canonical));
    }

    /// Native `disconnected` signal. Unrequested disconnects are link loss:
    /// the device is also dropped from the discovered set.
    pub(crate) fn on_disconnected(&self, was_requested: bool, device: &Device) {
        let id = device.id();
        let canonical = self.registry.canonical(device);
        canonical.set_connection_state(ConnectionState::Disconnected);
        device.set_connection_state(ConnectionState::Disconnected);
        self.registry.remove_connected(id);

        if was_requested {
            debug!(device_id = %id, "Native disconnected");
            self.events.emit(AdapterEvent::Disconnected(canonical.clone()));
        } else {
            warn!(device_id = %id, "Connection lost");
            self.registry.remove_discovered(id);
            self.events.emit(AdapterEvent::ConnectionLost {
                device: canonical.clone(),
                message: LINK_LOST_MESSAGE.to_string(),
            });
        }
        self.disconnected.publish(&canonical);
    }

    /// Native `connectionFailed` signal.
    pub(crate) fn on_connection_failed(&self, device: &Device, message: String) {
        let canonical = self.registry.canonical(device);
        debug!(device_id = %canonical.id(), %message, "Native connect failure");

        self.events.emit(AdapterEvent::ConnectionError {
            device: canonical.clone(),
            message: message.clone(),
        });
        self.connect_failed.publish(&FailureSignal {
            device: canonical,
            message,
        });
    }

    /// Native disconnect failure.
    pub(crate) fn on_disconnect_failed(&self, device: &Device, message: String) {
        let canonical = self.registry.canonical(device);
        debug!(device_id = %canonical.id(), %message, "Native disconnect failure");
        self.disconnect_failed.publish(&FailureSignal {
            device: canonical,
            message,
        });
    }

    /// Waiters currently registered across every signal hub.
    #[must_use]
    pub fn pending_signal_subscribers(&self) -> usize {
        self.connected.subscriber_count()
            + self.connect_failed.subscriber_count()
            + self.disconnected.subscriber_count()
            + self.disconnect_failed.subscriber_count()
    }
}
