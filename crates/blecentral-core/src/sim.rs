//! In-process radio for tests and hosts without Bluetooth hardware.
//!
//! Connect and disconnect outcomes are scripted per device and delivered from
//! spawned tasks, the way a real stack reports them from its own threads.
//! Advertisement and link-loss injection is synchronous and stands in for the
//! radio's callback thread.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::ConnectParameters;
use crate::device::{Device, DeviceId};
use crate::error::{CentralError, Result};
use crate::filter::{DeviceFilter, ScanFilterOptions};
use crate::port::{NativeEventSink, NativeRadioPort, ScanSettings};

/// What the simulated radio does with a connect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Report `connected`.
    Succeed,
    /// Report `connectionFailed` with the message.
    Fail(String),
    /// Reject the request itself with a native error.
    Reject(String),
    /// Report nothing.
    Silent,
}

/// What the simulated radio does with a disconnect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// Report a requested `disconnected`.
    Succeed,
    /// Report a disconnect failure with the message.
    Fail(String),
    /// Report nothing.
    Silent,
}

/// How often each primitive was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    /// `start_scan` calls.
    pub start_scan: usize,
    /// `stop_scan` calls.
    pub stop_scan: usize,
    /// `connect` calls.
    pub connect: usize,
    /// `disconnect` calls.
    pub disconnect: usize,
    /// `connect_by_id` calls.
    pub connect_by_id: usize,
}

#[derive(Default)]
struct SimState {
    sink: Option<NativeEventSink>,
    scan: Option<ScanFilterOptions>,
    scan_failure: Option<String>,
    connect_scripts: HashMap<DeviceId, VecDeque<ConnectOutcome>>,
    disconnect_scripts: HashMap<DeviceId, DisconnectOutcome>,
    resolvable: HashMap<DeviceId, Device>,
    last_connect_cancel: Option<CancellationToken>,
    stop_scan_delay: Duration,
    stats: CallStats,
}

/// Scriptable [`NativeRadioPort`].
///
/// Unscripted devices connect and disconnect successfully.
#[derive(Default)]
pub struct SimulatedRadio {
    state: Mutex<SimState>,
    latency: Duration,
}

impl SimulatedRadio {
    /// A radio that reports outcomes without delay.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A radio that waits `latency` before reporting each outcome.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::default(),
            latency,
        })
    }

    /// Script connect outcomes for `id`, consumed one per attempt. The last
    /// outcome repeats once the script runs out.
    pub fn script_connect(&self, id: DeviceId, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.state
            .lock()
            .connect_scripts
            .insert(id, outcomes.into_iter().collect());
    }

    /// Script the outcome of every disconnect request for `id`.
    pub fn script_disconnect(&self, id: DeviceId, outcome: DisconnectOutcome) {
        self.state.lock().disconnect_scripts.insert(id, outcome);
    }

    /// Make the next start-scan call fail with `message`.
    pub fn fail_next_scan(&self, message: impl Into<String>) {
        self.state.lock().scan_failure = Some(message.into());
    }

    /// Make every native stop-scan take `delay` before the radio goes quiet.
    pub fn delay_stop_scan(&self, delay: Duration) {
        self.state.lock().stop_scan_delay = delay;
    }

    /// Make `device` resolvable through `connect_by_id`.
    pub fn register_resolvable(&self, device: Device) {
        self.state.lock().resolvable.insert(device.id(), device);
    }

    /// Call counters so far.
    #[must_use]
    pub fn stats(&self) -> CallStats {
        self.state.lock().stats
    }

    /// The cancellation token passed with the most recent connect request.
    #[must_use]
    pub fn last_connect_token(&self) -> Option<CancellationToken> {
        self.state.lock().last_connect_cancel.clone()
    }

    /// Returns `true` while a platform scan is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.state.lock().scan.is_some()
    }

    /// Receive an advertisement from `device`.
    ///
    /// Reported only while scanning and only if it passes the scan's filter
    /// options. Returns whether it was reported.
    pub fn advertise(&self, device: Device) -> bool {
        let (options, sink) = {
            let state = self.state.lock();
            (state.scan.clone(), state.sink.clone())
        };
        let (Some(options), Some(sink)) = (options, sink) else {
            trace!(device_id = %device.id(), "Not scanning, advertisement not reported");
            return false;
        };
        if !options.matches(&device.advertisement()) {
            trace!(device_id = %device.id(), "Advertisement filtered out");
            return false;
        }
        sink.discovered(device)
    }

    /// Drop the link to `device` without anyone asking.
    pub fn drop_link(&self, device: &Device) -> bool {
        self.sink()
            .is_some_and(|sink| sink.disconnected(false, device.clone()))
    }

    fn sink(&self) -> Option<NativeEventSink> {
        self.state.lock().sink.clone()
    }

    fn next_connect_outcome(state: &mut SimState, id: DeviceId) -> ConnectOutcome {
        match state.connect_scripts.get_mut(&id) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(ConnectOutcome::Succeed),
            Some(script) => script.front().cloned().unwrap_or(ConnectOutcome::Succeed),
            None => ConnectOutcome::Succeed,
        }
    }

    /// Report through the sink from a spawned task.
    fn deliver(&self, report: impl FnOnce(&NativeEventSink) + Send + 'static) {
        let Some(sink) = self.sink() else {
            warn!("Simulated radio used before being attached");
            return;
        };
        let latency = self.latency;
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            report(&sink);
        });
    }
}

#[async_trait]
impl NativeRadioPort for SimulatedRadio {
    fn attach(&self, sink: NativeEventSink) {
        self.state.lock().sink = Some(sink);
    }

    async fn start_scan(
        &self,
        options: &ScanFilterOptions,
        settings: ScanSettings,
        _cancel: CancellationToken,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.stats.start_scan += 1;
        if let Some(message) = state.scan_failure.take() {
            return Err(CentralError::ScanFailed(message));
        }
        debug!(?settings, "Simulated scan started");
        state.scan = Some(options.clone());
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let delay = self.state.lock().stop_scan_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.stats.stop_scan += 1;
        state.scan = None;
        Ok(())
    }

    async fn connect(
        &self,
        device: &Device,
        _params: &ConnectParameters,
        cancel: CancellationToken,
    ) -> Result<()> {
        let outcome = {
            let mut state = self.state.lock();
            state.stats.connect += 1;
            state.last_connect_cancel = Some(cancel);
            Self::next_connect_outcome(&mut state, device.id())
        };
        trace!(device_id = %device.id(), ?outcome, "Simulated connect");

        let device = device.clone();
        match outcome {
            ConnectOutcome::Succeed => self.deliver(move |sink| {
                sink.connected(device);
            }),
            ConnectOutcome::Fail(message) => self.deliver(move |sink| {
                sink.connection_failed(device, message);
            }),
            ConnectOutcome::Reject(message) => return Err(CentralError::NativeFailure(message)),
            ConnectOutcome::Silent => {}
        }
        Ok(())
    }

    async fn disconnect(&self, device: &Device) -> Result<()> {
        let outcome = {
            let mut state = self.state.lock();
            state.stats.disconnect += 1;
            state
                .disconnect_scripts
                .get(&device.id())
                .cloned()
                .unwrap_or(DisconnectOutcome::Succeed)
        };
        trace!(device_id = %device.id(), ?outcome, "Simulated disconnect");

        let device = device.clone();
        match outcome {
            DisconnectOutcome::Succeed => self.deliver(move |sink| {
                sink.disconnected(true, device);
            }),
            DisconnectOutcome::Fail(message) => self.deliver(move |sink| {
                sink.disconnect_failed(device, message);
            }),
            DisconnectOutcome::Silent => {}
        }
        Ok(())
    }

    async fn connect_by_id(
        &self,
        id: DeviceId,
        filter: &DeviceFilter,
        _cancel: CancellationToken,
    ) -> Result<Option<Device>> {
        let mut state = self.state.lock();
        state.stats.connect_by_id += 1;
        Ok(state
            .resolvable
            .get(&id)
            .filter(|device| filter.accepts(device))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Advertisement, NativeHandle};

    fn device(n: u128) -> Device {
        Device::new(DeviceId::from_u128(n), NativeHandle::new(format!("dev-{n}")))
    }

    #[test]
    fn test_script_repeats_last_outcome() {
        let mut state = SimState::default();
        let id = DeviceId::from_u128(1);
        state.connect_scripts.insert(
            id,
            [ConnectOutcome::Fail("x".into()), ConnectOutcome::Silent].into(),
        );

        assert_eq!(SimulatedRadio::next_connect_outcome(&mut state, id), ConnectOutcome::Fail("x".into()));
        assert_eq!(SimulatedRadio::next_connect_outcome(&mut state, id), ConnectOutcome::Silent);
        assert_eq!(SimulatedRadio::next_connect_outcome(&mut state, id), ConnectOutcome::Silent);
        assert_eq!(
            SimulatedRadio::next_connect_outcome(&mut state, DeviceId::from_u128(2)),
            ConnectOutcome::Succeed
        );
    }

    #[tokio::test]
    async fn test_reject_fails_the_primitive() {
        let radio = SimulatedRadio::new();
        let target = device(1);
        radio.script_connect(target.id(), [ConnectOutcome::Reject("no adapter".into())]);

        let err = radio
            .connect(&target, &ConnectParameters::default(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CentralError::NativeFailure(_)));
        assert_eq!(radio.stats().connect, 1);
    }

    #[tokio::test]
    async fn test_connect_by_id_respects_filter() {
        let radio = SimulatedRadio::new();
        radio.register_resolvable(device(1).with_name("Sensor"));
        let reject_all = DeviceFilter::new(|_| false);

        let found = radio
            .connect_by_id(DeviceId::from_u128(1), &reject_all, CancellationToken::new())
            .await
            .unwrap();

        assert!(found.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_advertise_honors_filter_options() {
        let radio = SimulatedRadio::new();
        let adapter = crate::Adapter::new(crate::AdapterConfig::default(), radio.clone());
        let options = ScanFilterOptions {
            device_names: vec!["Sensor".into()],
            ..ScanFilterOptions::default()
        };

        let scanning = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.start_scan(options, None, CancellationToken::new()).await })
        };
        while !radio.is_scanning() {
            tokio::task::yield_now().await;
        }

        let named = device(1).with_advertisement(Advertisement {
            local_name: Some("Sensor".into()),
            ..Advertisement::default()
        });
        assert!(radio.advertise(named));
        assert!(!radio.advertise(device(2)));

        adapter.stop_scan();
        scanning.await.unwrap().unwrap();
        assert!(!radio.is_scanning());
        assert_eq!(adapter.discovered_devices().len(), 1);
    }
}
