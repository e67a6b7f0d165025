//! Scan lifecycle management.
//!
//! State machine: `Idle → Scanning → (Elapsed | Cancelled | Error) → Idle`.
//!
//! At most one session is active. Starting a scan while another runs cancels
//! the running one and waits a short grace period for the native side to
//! unwind before the new session begins. Whatever way a session ends, the
//! native stop-scan primitive is invoked and the controller returns to idle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use utoipa::ToSchema;

use crate::config::AdapterConfig;
use crate::device::Device;
use crate::error::Result;
use crate::events::{AdapterEvent, EventBus};
use crate::filter::{DeviceFilter, ScanFilterOptions};
use crate::port::{ScanSettings, SharedPort};
use crate::registry::DeviceRegistry;

/// Whether a scan session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// No session.
    Idle,
    /// A session is running or tearing down.
    Scanning,
}

/// How a scan session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The scan timeout elapsed.
    Elapsed,
    /// The caller, [`ScanController::stop_scan`], or a restart cancelled it.
    Cancelled,
}

struct ActiveSession {
    id: u64,
    scope: CancellationToken,
    filter: DeviceFilter,
    /// Set once the grace period is over and the discovered set was cleared.
    live: bool,
}

/// Owns the scan state of one adapter.
pub struct ScanController {
    port: SharedPort,
    registry: Arc<DeviceRegistry>,
    events: EventBus,
    settings: ScanSettings,
    timeout: Duration,
    restart_grace: Duration,
    session: Mutex<Option<ActiveSession>>,
    next_session: AtomicU64,
    /// Held from native start until native stop has returned.
    native: Arc<AsyncMutex<()>>,
}

impl ScanController {
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
            settings: ScanSettings {
                allow_duplicates: config.allow_duplicates,
                mode: config.scan_mode,
                match_mode: config.scan_match_mode,
            },
            timeout: config.scan_timeout(),
            restart_grace: config.scan_restart_grace(),
            session: Mutex::new(None),
            next_session: AtomicU64::new(1),
            native: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Current scan state. A session waiting out its restart grace period
    /// already counts as scanning.
    #[must_use]
    pub fn state(&self) -> ScanState {
        if self.session.lock().is_some() {
            ScanState::Scanning
        } else {
            ScanState::Idle
        }
    }

    /// Returns `true` while a session is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.state() == ScanState::Scanning
    }

    /// Run one scan session to completion.
    ///
    /// Resolves when the scan timeout elapses (emitting
    /// [`AdapterEvent::ScanTimeoutElapsed`]) or the session is cancelled.
    /// Cancellation is a normal outcome, not an error. `filter` defaults to
    /// accepting every device.
    ///
    /// # Errors
    ///
    /// Returns an error if `options` is invalid or the native start-scan
    /// primitive fails. The native scan is stopped either way.
    pub async fn start_scan(
        &self,
        options: ScanFilterOptions,
        filter: Option<DeviceFilter>,
        cancel: CancellationToken,
    ) -> Result<ScanOutcome> {
        self.start_scan_for(options, filter, self.timeout, cancel).await
    }

    /// [`start_scan`](Self::start_scan) with an explicit session timeout.
    ///
    /// # Errors
    ///
    /// Same as [`start_scan`](Self::start_scan).
    #[instrument(skip_all, fields(session = tracing::field::Empty, timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)))]
    pub async fn start_scan_for(
        &self,
        options: ScanFilterOptions,
        filter: Option<DeviceFilter>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ScanOutcome> {
        options.validate()?;
        if cancel.is_cancelled() {
            return Ok(ScanOutcome::Cancelled);
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        tracing::Span::current().record("session", id);
        let scope = cancel.child_token();
        let previous = self.session.lock().replace(ActiveSession {
            id,
            scope: scope.clone(),
            filter: filter.unwrap_or_default(),
            live: false,
        });

        let mut guard = SessionGuard {
            controller: self,
            id,
            scope: scope.clone(),
            native: None,
        };

        if let Some(previous) = previous {
            previous.scope.cancel();
            debug!(
                previous = previous.id,
                grace_ms = u64::try_from(self.restart_grace.as_millis()).unwrap_or(u64::MAX),
                "Scan already active, restarting"
            );
            tokio::select! {
                biased;
                () = scope.cancelled() => {
                    debug!(session = id, "Restart cancelled during grace period");
                    return Ok(ScanOutcome::Cancelled);
                }
                () = tokio::time::sleep(self.restart_grace) => {}
            }
        }

        // The previous session's native stop must land before our native start.
        let native = tokio::select! {
            biased;
            () = scope.cancelled() => return Ok(ScanOutcome::Cancelled),
            native = Arc::clone(&self.native).lock_owned() => native,
        };

        {
            let mut session = self.session.lock();
            match session.as_mut() {
                Some(active) if active.id == id && !scope.is_cancelled() => {
                    self.registry.clear_discovered();
                    active.live = true;
                }
                _ => return Ok(ScanOutcome::Cancelled),
            }
        }
        guard.native = Some(native);
        info!(session = id, "Scan started");

        let outcome = self.run_session(&options, timeout, &scope).await;
        scope.cancel();

        if let Err(e) = self.port.stop_scan().await {
            warn!(session = id, error = %e, "Native stop-scan failed");
        }
        guard.finish();

        match &outcome {
            Ok(result) => info!(session = id, ?result, "Scan finished"),
            Err(e) => warn!(session = id, error = %e, "Scan failed"),
        }
        outcome
    }

    async fn run_session(
        &self,
        options: &ScanFilterOptions,
        timeout: Duration,
        scope: &CancellationToken,
    ) -> Result<ScanOutcome> {
        tokio::select! {
            biased;
            () = scope.cancelled() => return Ok(ScanOutcome::Cancelled),
            started = self.port.start_scan(options, self.settings, scope.clone()) => started?,
        }

        tokio::select! {
            biased;
            () = scope.cancelled() => Ok(ScanOutcome::Cancelled),
            () = tokio::time::sleep(timeout) => {
                self.events.emit(AdapterEvent::ScanTimeoutElapsed);
                Ok(ScanOutcome::Elapsed)
            }
        }
    }

    /// Cancel the running session, if any and not already cancelling.
    ///
    /// Returns `true` if a session was cancelled.
    pub fn stop_scan(&self) -> bool {
        let session = self.session.lock();
        match session.as_ref() {
            Some(active) if !active.scope.is_cancelled() => {
                debug!(session = active.id, "Stopping scan");
                active.scope.cancel();
                true
            }
            _ => false,
        }
    }

    /// Handle an advertisement reported by the native radio.
    pub(crate) fn on_native_discovered(&self, device: &Device) {
        let filter = {
            let session = self.session.lock();
            match session.as_ref() {
                Some(active) if active.live && !active.scope.is_cancelled() => active.filter.clone(),
                _ => {
                    trace!(device_id = %device.id(), "Advertisement outside a scan session, ignored");
                    return;
                }
            }
        };

        if !filter.accepts(device) {
            trace!(device_id = %device.id(), "Advertisement rejected by device filter");
            return;
        }

        let (stored, is_new) = self.registry.upsert_discovered(device);
        self.events.emit(AdapterEvent::Advertised(stored.clone()));
        if is_new {
            debug!(device_id = %stored.id(), name = ?stored.name(), "Device discovered");
            self.events.emit(AdapterEvent::Discovered(stored));
        }
    }

    fn release(&self, id: u64) {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|active| active.id == id) {
            *session = None;
        }
    }
}

/// Returns the controller to idle on every exit path. A session that reached
/// the native layer but was dropped before stopping it gets its native stop
/// on a spawned task, still holding the native lock.
struct SessionGuard<'a> {
    controller: &'a ScanController,
    id: u64,
    scope: CancellationToken,
    native: Option<OwnedMutexGuard<()>>,
}

impl SessionGuard<'_> {
    fn finish(mut self) {
        // Native stop already ran; releasing the lock lets the next session start.
        self.native = None;
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.scope.cancel();
        self.controller.release(self.id);
        let Some(native) = self.native.take() else {
            return;
        };
        debug!(session = self.id, "Scan dropped before completion");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let port = Arc::clone(&self.controller.port);
            runtime.spawn(async move {
                if let Err(e) = port.stop_scan().await {
                    warn!(error = %e, "Native stop-scan failed");
                }
                drop(native);
            });
        }
    }
}
