//! Native callback → awaited result bridging.
//!
//! Native radio stacks report completion through callbacks, not futures. A
//! [`SignalHub`] is a correlation table of pending waiters keyed by device id;
//! the native event sink publishes every signal into the matching hub.
//! [`await_signal`] arms one waiter on a "complete" hub and one on a "reject"
//! hub, triggers the native operation, and resolves with whichever matching
//! signal arrives first.
//!
//! Both waiters are held as [`Subscription`] guards inside the awaiting future,
//! so they are removed from their hubs on every exit path: success, rejection,
//! cancellation, or the future simply being dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::device::{Device, DeviceId};
use crate::error::{CentralError, Result};

/// A signal that belongs to exactly one device.
pub trait Correlated {
    /// Id of the device the signal is about.
    fn correlation_key(&self) -> DeviceId;
}

impl Correlated for Device {
    fn correlation_key(&self) -> DeviceId {
        self.id()
    }
}

/// Failure signal carrying the native message.
#[derive(Debug, Clone)]
pub struct FailureSignal {
    /// Device the failure is about.
    pub device: Device,
    /// Native failure description.
    pub message: String,
}

impl Correlated for FailureSignal {
    fn correlation_key(&self) -> DeviceId {
        self.device.id()
    }
}

type Handler<S> = Arc<dyn Fn(&S) + Send + Sync>;

/// Correlation table of pending waiters for one kind of signal.
pub struct SignalHub<S> {
    next_token: AtomicU64,
    table: Mutex<HashMap<DeviceId, Vec<(u64, Handler<S>)>>>,
}

impl<S: Correlated + 'static> SignalHub<S> {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_token: AtomicU64::new(0),
            table: Mutex::new(HashMap::new()),
        })
    }

    /// Register `handler` for signals correlated to `key`.
    ///
    /// The handler stays registered until the returned guard is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        key: DeviceId,
        handler: impl Fn(&S) + Send + Sync + 'static,
    ) -> Subscription {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.table
            .lock()
            .entry(key)
            .or_default()
            .push((token, Arc::new(handler)));

        let hub: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(hub) = hub.upgrade() {
                hub.unsubscribe(key, token);
            }
        })
    }

    /// Deliver a signal to every waiter registered for its device.
    ///
    /// Handlers run after the table lock is released, so a handler may
    /// subscribe or unsubscribe without deadlocking. Returns how many
    /// handlers were invoked.
    pub fn publish(&self, signal: &S) -> usize {
        let handlers: Vec<Handler<S>> = self
            .table
            .lock()
            .get(&signal.correlation_key())
            .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(signal);
        }
        handlers.len()
    }

    /// Number of registered waiters across all devices.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.table.lock().values().map(Vec::len).sum()
    }

    fn unsubscribe(&self, key: DeviceId, token: u64) {
        let mut table = self.table.lock();
        if let Some(entries) = table.get_mut(&key) {
            entries.retain(|(t, _)| *t != token);
            if entries.is_empty() {
                table.remove(&key);
            }
        }
    }
}

/// Guard for a hub registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Which hub to listen on, for which device, and how to turn a matching
/// signal into a value. Returning `None` from `extract` ignores the signal.
pub struct Matcher<S, T> {
    hub: Arc<SignalHub<S>>,
    key: DeviceId,
    extract: Box<dyn Fn(&S) -> Option<T> + Send + Sync>,
}

impl<S: Correlated + 'static, T: Send + 'static> Matcher<S, T> {
    /// Build a matcher.
    pub fn new(
        hub: &Arc<SignalHub<S>>,
        key: DeviceId,
        extract: impl Fn(&S) -> Option<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            hub: Arc::clone(hub),
            key,
            extract: Box::new(extract),
        }
    }

    fn arm<U: Send + 'static>(
        self,
        slot: &Arc<Mutex<Option<oneshot::Sender<Result<U>>>>>,
        wrap: impl Fn(T) -> Result<U> + Send + Sync + 'static,
    ) -> Subscription {
        let Self { hub, key, extract } = self;
        let slot = Arc::clone(slot);
        hub.subscribe(key, move |signal| {
            let Some(value) = extract(signal) else {
                return;
            };
            // First matching signal wins; later ones find the slot empty.
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(wrap(value));
            }
        })
    }
}

/// Trigger a native operation and wait for its correlated outcome.
///
/// `complete` resolves the call with a value, `reject` with an error. Both
/// are subscribed before `execute` runs so a synchronous callback from the
/// port cannot be missed. Cancelling `cancel` fails the call with
/// [`CentralError::Cancelled`]; the native operation itself is left alone.
///
/// # Errors
///
/// Returns the error from `execute`, the rejection produced by `reject`, or
/// [`CentralError::Cancelled`].
pub async fn await_signal<T, C, R, F>(
    execute: F,
    complete: Matcher<C, T>,
    reject: Matcher<R, CentralError>,
    cancel: &CancellationToken,
) -> Result<T>
where
    T: Send + 'static,
    C: Correlated + 'static,
    R: Correlated + 'static,
    F: Future<Output = Result<()>>,
{
    if cancel.is_cancelled() {
        return Err(CentralError::Cancelled);
    }

    let (tx, rx) = oneshot::channel::<Result<T>>();
    let slot = Arc::new(Mutex::new(Some(tx)));
    let _complete = complete.arm(&slot, Ok);
    let _reject = reject.arm(&slot, Err);
    drop(slot);

    tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(CentralError::Cancelled),
        issued = execute => issued?,
    }

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CentralError::Cancelled),
        outcome = rx => outcome.unwrap_or_else(|_| {
            Err(CentralError::NativeFailure("signal source went away".to_string()))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NativeHandle;
    use std::time::Duration;

    fn device(n: u128) -> Device {
        Device::new(DeviceId::from_u128(n), NativeHandle::new(format!("dev-{n}")))
    }

    struct Hubs {
        done: Arc<SignalHub<Device>>,
        failed: Arc<SignalHub<FailureSignal>>,
    }

    impl Hubs {
        fn new() -> Self {
            Self {
                done: SignalHub::new(),
                failed: SignalHub::new(),
            }
        }

        fn matchers(&self, id: DeviceId) -> (Matcher<Device, Device>, Matcher<FailureSignal, CentralError>) {
            (
                Matcher::new(&self.done, id, |d: &Device| Some(d.clone())),
                Matcher::new(&self.failed, id, |f: &FailureSignal| {
                    Some(CentralError::ConnectionError {
                        device: f.device.id(),
                        message: f.message.clone(),
                    })
                }),
            )
        }

        fn count(&self) -> usize {
            self.done.subscriber_count() + self.failed.subscriber_count()
        }
    }

    #[tokio::test]
    async fn test_complete_signal_resolves() {
        let hubs = Hubs::new();
        let target = device(1);
        let (complete, reject) = hubs.matchers(target.id());

        let done = Arc::clone(&hubs.done);
        let signal = target.clone();
        let execute = async move {
            tokio::spawn(async move {
                done.publish(&signal);
            });
            Ok(())
        };

        let got = await_signal(execute, complete, reject, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(got, target);
        assert_eq!(hubs.count(), 0);
    }

    #[tokio::test]
    async fn test_synchronous_signal_is_not_missed() {
        let hubs = Hubs::new();
        let target = device(1);
        let (complete, reject) = hubs.matchers(target.id());

        let done = Arc::clone(&hubs.done);
        let signal = target.clone();
        let execute = async move {
            done.publish(&signal);
            Ok(())
        };

        let got = await_signal(execute, complete, reject, &CancellationToken::new()).await;
        assert!(got.is_ok());
    }

    #[tokio::test]
    async fn test_reject_signal_fails_the_call() {
        let hubs = Hubs::new();
        let target = device(2);
        let (complete, reject) = hubs.matchers(target.id());

        let failed = Arc::clone(&hubs.failed);
        let signal = FailureSignal {
            device: target.clone(),
            message: "GATT 133".into(),
        };
        let execute = async move {
            failed.publish(&signal);
            Ok(())
        };

        let err = await_signal(execute, complete, reject, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CentralError::ConnectionError { message, .. } if message == "GATT 133"));
        assert_eq!(hubs.count(), 0);
    }

    #[tokio::test]
    async fn test_first_signal_wins() {
        let hubs = Hubs::new();
        let target = device(3);
        let (complete, reject) = hubs.matchers(target.id());

        let done = Arc::clone(&hubs.done);
        let failed = Arc::clone(&hubs.failed);
        let signal = target.clone();
        let execute = async move {
            done.publish(&signal);
            failed.publish(&FailureSignal {
                device: signal.clone(),
                message: "late".into(),
            });
            Ok(())
        };

        let got = await_signal(execute, complete, reject, &CancellationToken::new()).await;
        assert!(got.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_for_other_devices_are_ignored() {
        let hubs = Hubs::new();
        let target = device(4);
        let (complete, reject) = hubs.matchers(target.id());

        let done = Arc::clone(&hubs.done);
        let execute = async move {
            assert_eq!(done.publish(&device(5)), 0);
            Ok(())
        };

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = await_signal(execute, complete, reject, &cancel).await.unwrap_err();
        assert!(matches!(err, CentralError::Cancelled));
        assert_eq!(hubs.count(), 0);
    }

    #[tokio::test]
    async fn test_execute_failure_releases_subscriptions() {
        let hubs = Hubs::new();
        let (complete, reject) = hubs.matchers(device(6).id());

        let execute = async { Err(CentralError::NativeFailure("radio off".into())) };
        let err = await_signal(execute, complete, reject, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CentralError::NativeFailure(_)));
        assert_eq!(hubs.count(), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_short_circuits() {
        let hubs = Hubs::new();
        let (complete, reject) = hubs.matchers(device(7).id());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = await_signal(async { Ok(()) }, complete, reject, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, CentralError::Cancelled));
        assert_eq!(hubs.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_future_releases_subscriptions() {
        let hubs = Hubs::new();
        let (complete, reject) = hubs.matchers(device(8).id());

        let cancel = CancellationToken::new();
        let pending = await_signal(async { Ok(()) }, complete, reject, &cancel);
        let timed_out = tokio::time::timeout(Duration::from_millis(50), pending).await;

        assert!(timed_out.is_err());
        assert_eq!(hubs.count(), 0);
    }

    #[test]
    fn test_subscription_guard() {
        let hub: Arc<SignalHub<Device>> = SignalHub::new();
        let a = hub.subscribe(DeviceId::from_u128(1), |_| {});
        let b = hub.subscribe(DeviceId::from_u128(1), |_| {});
        assert_eq!(hub.subscriber_count(), 2);
        drop(a);
        assert_eq!(hub.subscriber_count(), 1);
        drop(b);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
