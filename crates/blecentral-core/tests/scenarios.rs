//! End-to-end adapter scenarios against the simulated radio.
//!
//! Every test runs on a paused clock, so the 1 s / 5 s / 20 s bounds are
//! checked exactly.

use std::sync::Arc;
use std::time::Duration;

use blecentral_core::sim::{ConnectOutcome, SimulatedRadio};
use blecentral_core::{
    Adapter, AdapterConfig, AdapterEvent, CentralError, ConnectParameters, ConnectionState,
    Device, DeviceId, NativeHandle, ScanFilterOptions, ScanOutcome,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

fn device(n: u128, name: &str) -> Device {
    Device::new(DeviceId::from_u128(n), NativeHandle::new(format!("sim-{n}"))).with_name(name)
}

fn setup() -> (Arc<SimulatedRadio>, Adapter) {
    let radio = SimulatedRadio::new();
    let adapter = Adapter::new(AdapterConfig::default(), radio.clone());
    (radio, adapter)
}

fn spawn_scan(adapter: &Adapter) -> JoinHandle<blecentral_core::Result<ScanOutcome>> {
    let adapter = adapter.clone();
    tokio::spawn(async move {
        adapter
            .start_scan(ScanFilterOptions::default(), None, CancellationToken::new())
            .await
    })
}

async fn wait_for_radio_scan(radio: &SimulatedRadio) {
    while !radio.is_scanning() {
        tokio::task::yield_now().await;
    }
}

fn drain(events: &mut broadcast::Receiver<AdapterEvent>) -> Vec<AdapterEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn count(events: &[AdapterEvent], kind: &str) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

async fn connect(adapter: &Adapter, target: &Device) -> blecentral_core::Result<()> {
    adapter
        .connect(target, &ConnectParameters::default(), CancellationToken::new())
        .await
}

#[tokio::test(start_paused = true)]
async fn repeated_advertisements_are_discovered_once() {
    let (radio, adapter) = setup();
    let mut events = adapter.subscribe();
    let scan = spawn_scan(&adapter);
    wait_for_radio_scan(&radio).await;

    let a = device(0xA, "A");
    assert!(radio.advertise(a.clone()));
    assert!(radio.advertise(device(0xA, "A").with_rssi(-40)));

    let seen = drain(&mut events);
    assert_eq!(count(&seen, "advertised"), 2);
    assert_eq!(count(&seen, "discovered"), 1);

    let discovered = adapter.discovered_devices();
    assert_eq!(discovered.len(), 1);
    assert!(discovered[0].same_record(&a));
    assert_eq!(a.rssi(), Some(-40));

    let outcome = assert_ok!(scan.await.unwrap());
    assert_eq!(outcome, ScanOutcome::Elapsed);
}

#[tokio::test(start_paused = true)]
async fn scan_elapses_after_five_seconds() {
    let (radio, adapter) = setup();
    let mut events = adapter.subscribe();
    let started = Instant::now();

    let outcome = assert_ok!(
        adapter
            .start_scan(ScanFilterOptions::default(), None, CancellationToken::new())
            .await
    );

    assert_eq!(outcome, ScanOutcome::Elapsed);
    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(count(&drain(&mut events), "scan_timeout_elapsed"), 1);
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn connect_retries_transient_failures() {
    let (radio, adapter) = setup();
    let a = device(0xA, "A");
    radio.script_connect(
        a.id(),
        [
            ConnectOutcome::Fail("GATT error 133".into()),
            ConnectOutcome::Fail("GATT error 133".into()),
            ConnectOutcome::Succeed,
        ],
    );
    let mut events = adapter.subscribe();

    assert_ok!(connect(&adapter, &a).await);

    assert_eq!(radio.stats().connect, 3);
    let connected: Vec<DeviceId> = adapter.connected_devices().iter().map(Device::id).collect();
    assert_eq!(connected, vec![a.id()]);

    let seen = drain(&mut events);
    assert_eq!(count(&seen, "connection_error"), 2);
    assert_eq!(count(&seen, "connected"), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_native_requests_are_retried_too() {
    let (radio, adapter) = setup();
    let a = device(0xA, "A");
    radio.script_connect(
        a.id(),
        [ConnectOutcome::Reject("busy".into()), ConnectOutcome::Succeed],
    );

    assert_ok!(connect(&adapter, &a).await);
    assert_eq!(radio.stats().connect, 2);
}

#[tokio::test(start_paused = true)]
async fn silent_radio_times_out_at_twenty_seconds() {
    let (radio, adapter) = setup();
    let b = device(0xB, "B");
    radio.script_connect(b.id(), [ConnectOutcome::Silent]);
    let started = Instant::now();

    let err = assert_err!(connect(&adapter, &b).await);

    assert!(matches!(err, CentralError::ConnectionTimeout { device, .. } if device == b.id()));
    assert_eq!(started.elapsed(), Duration::from_secs(20));
    assert_eq!(b.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn always_failing_radio_stops_at_the_deadline() {
    let (radio, adapter) = setup();
    let d = device(0xD, "D");
    radio.script_connect(d.id(), [ConnectOutcome::Fail("unreachable".into())]);
    let started = Instant::now();

    let err = assert_err!(connect(&adapter, &d).await);

    assert!(err.is_connection_error());
    assert!(started.elapsed() <= Duration::from_secs(20));
    assert!(radio.stats().connect > 100);
    assert_eq!(adapter.pending_signal_subscribers(), 0);
}

#[tokio::test(start_paused = true)]
async fn link_loss_removes_device_from_both_sets() {
    let (radio, adapter) = setup();
    let scan = spawn_scan(&adapter);
    wait_for_radio_scan(&radio).await;

    let c = device(0xC, "C");
    radio.advertise(c.clone());
    assert_ok!(connect(&adapter, &c).await);
    assert!(adapter.discovered_device(c.id()).is_some());
    assert!(adapter.connected_device(c.id()).is_some());

    let mut events = adapter.subscribe();
    assert!(radio.drop_link(&c));

    assert!(adapter.connected_device(c.id()).is_none());
    assert!(adapter.discovered_device(c.id()).is_none());
    assert_eq!(c.connection_state(), ConnectionState::Disconnected);
    let seen = drain(&mut events);
    assert_eq!(count(&seen, "connection_lost"), 1);
    assert_eq!(count(&seen, "disconnected"), 0);

    adapter.stop_scan();
    assert_ok!(scan.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn disconnecting_an_unconnected_device_is_a_no_op() {
    let (radio, adapter) = setup();

    assert_ok!(adapter.disconnect(&device(0xE, "E")).await);

    assert_eq!(radio.stats().disconnect, 0);
}

#[tokio::test(start_paused = true)]
async fn cancelling_connect_mid_retry_leaves_no_subscribers() {
    let (radio, adapter) = setup();
    let f = device(0xF, "F");
    radio.script_connect(f.id(), [ConnectOutcome::Fail("busy".into())]);
    let cancel = CancellationToken::new();

    let pending = {
        let adapter = adapter.clone();
        let f = f.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            adapter
                .connect(&f, &ConnectParameters::default(), cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_secs(3)).await;
    let attempts = radio.stats().connect;
    cancel.cancel();

    let err = assert_err!(pending.await.unwrap());
    assert!(matches!(err, CentralError::Cancelled));
    assert_eq!(adapter.pending_signal_subscribers(), 0);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(radio.stats().connect, attempts);
}

#[tokio::test(start_paused = true)]
async fn restarting_a_scan_replaces_the_session() {
    let (radio, adapter) = setup();
    let first = spawn_scan(&adapter);
    wait_for_radio_scan(&radio).await;
    radio.advertise(device(1, "stale"));
    assert_eq!(adapter.discovered_devices().len(), 1);

    let restarted_at = Instant::now();
    let second = spawn_scan(&adapter);

    let first_outcome = assert_ok!(first.await.unwrap());
    assert_eq!(first_outcome, ScanOutcome::Cancelled);

    wait_for_radio_scan(&radio).await;
    assert!(restarted_at.elapsed() >= Duration::from_secs(1));
    assert!(adapter.is_scanning());
    assert!(adapter.discovered_devices().is_empty());
    assert_eq!(radio.stats().start_scan, 2);

    radio.advertise(device(2, "fresh"));
    adapter.stop_scan();
    assert_ok!(second.await.unwrap());

    let names: Vec<Option<String>> = adapter.discovered_devices().iter().map(Device::name).collect();
    assert_eq!(names, vec![Some("fresh".to_string())]);
    assert_eq!(radio.stats().stop_scan, 2);
    assert!(!adapter.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn connect_by_id_uses_discovered_record() {
    let (radio, adapter) = setup();
    let scan = spawn_scan(&adapter);
    wait_for_radio_scan(&radio).await;
    let g = device(0x6, "G");
    radio.advertise(g.clone());

    let connected = assert_ok!(
        adapter
            .connect_by_id(
                g.id(),
                &ConnectParameters::default(),
                &blecentral_core::DeviceFilter::accept_all(),
                CancellationToken::new(),
            )
            .await
    );

    assert!(connected.same_record(&g));
    assert_eq!(g.connection_state(), ConnectionState::Connected);
    assert_eq!(radio.stats().connect_by_id, 0);

    adapter.stop_scan();
    assert_ok!(scan.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn slow_radio_still_connects_within_deadline() {
    let radio = SimulatedRadio::with_latency(Duration::from_secs(3));
    let adapter = Adapter::new(AdapterConfig::default(), radio.clone());
    let h = device(0x7, "H");
    let started = Instant::now();

    assert_ok!(connect(&adapter, &h).await);

    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(radio.stats().connect, 1);
}

#[tokio::test(start_paused = true)]
async fn scan_started_during_restart_grace_waits_its_turn() {
    let (radio, adapter) = setup();
    let first = spawn_scan(&adapter);
    wait_for_radio_scan(&radio).await;

    let second = spawn_scan(&adapter);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(assert_ok!(first.await.unwrap()), ScanOutcome::Cancelled);
    assert!(adapter.is_scanning());
    assert!(!radio.is_scanning());

    let third = spawn_scan(&adapter);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(assert_ok!(second.await.unwrap()), ScanOutcome::Cancelled);
    assert!(adapter.is_scanning());
    assert!(radio.is_scanning());
    assert_eq!(radio.stats().start_scan, 2);
    assert_eq!(radio.stats().stop_scan, 1);

    assert!(radio.advertise(device(0x9, "late")));
    assert_eq!(adapter.discovered_devices().len(), 1);

    adapter.stop_scan();
    assert_eq!(assert_ok!(third.await.unwrap()), ScanOutcome::Cancelled);
    assert_eq!(radio.stats().stop_scan, 2);
    assert!(!adapter.is_scanning());
}
