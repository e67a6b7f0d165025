//! BlueZ radio for Linux, via `bluer`.
//!
//! Devices are identified by their MAC address ([`DeviceId::from_mac`]) and
//! their [`NativeHandle`] is the address string. Service-uuid filters are
//! pushed into the BlueZ discovery filter; the other categories are applied
//! in software. A watcher task per connected device turns BlueZ's
//! `Connected = false` property change into link-loss reports.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bluer::{AdapterEvent, Address, DeviceEvent, DeviceProperty, DiscoveryFilter, DiscoveryTransport};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ConnectParameters;
use crate::device::{Advertisement, Device, DeviceId, NativeHandle};
use crate::error::{CentralError, Result};
use crate::filter::{DeviceFilter, ScanFilterOptions};
use crate::port::{NativeEventSink, NativeRadioPort, ScanSettings};

fn native(e: &bluer::Error) -> CentralError {
    CentralError::NativeFailure(e.to_string())
}

/// Build a core record from a BlueZ device's current properties.
async fn snapshot(device: &bluer::Device) -> bluer::Result<Device> {
    let address = device.address();
    let advertisement = Advertisement {
        local_name: device.name().await?,
        address: Some(address.to_string()),
        service_uuids: device.uuids().await?.unwrap_or_default().into_iter().collect(),
        service_data: device.service_data().await?.unwrap_or_default(),
        manufacturer_data: device.manufacturer_data().await?.unwrap_or_default(),
        tx_power: device.tx_power().await?,
    };

    let mut record = Device::new(
        DeviceId::from_mac(address.0),
        NativeHandle::new(address.to_string()),
    )
    .with_advertisement(advertisement);
    if let Some(rssi) = device.rssi().await? {
        record = record.with_rssi(rssi);
    }
    Ok(record)
}

#[derive(Default)]
struct Links {
    watchers: HashMap<DeviceId, JoinHandle<()>>,
    disconnecting: HashSet<DeviceId>,
}

/// [`NativeRadioPort`] backed by the system's default BlueZ adapter.
pub struct BluezRadio {
    adapter: bluer::Adapter,
    sink: Mutex<Option<NativeEventSink>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    links: Arc<Mutex<Links>>,
}

impl BluezRadio {
    /// Open a D-Bus session and power on the default adapter.
    ///
    /// # Errors
    ///
    /// Returns [`CentralError::AdapterUnavailable`] if BlueZ has no adapter.
    pub async fn new() -> Result<Arc<Self>> {
        let session = bluer::Session::new().await.map_err(|e| native(&e))?;
        let adapter = session.default_adapter().await.map_err(|e| {
            warn!(error = %e, "No default Bluetooth adapter");
            CentralError::AdapterUnavailable
        })?;
        adapter.set_powered(true).await.map_err(|e| native(&e))?;
        info!(adapter = adapter.name(), "Using Bluetooth adapter");

        Ok(Arc::new(Self {
            adapter,
            sink: Mutex::new(None),
            scan_task: Mutex::new(None),
            links: Arc::new(Mutex::new(Links::default())),
        }))
    }

    fn sink(&self) -> Result<NativeEventSink> {
        self.sink
            .lock()
            .clone()
            .ok_or_else(|| CentralError::NativeFailure("radio not attached".to_string()))
    }

    fn bluez_device(&self, device: &Device) -> Result<bluer::Device> {
        let address: Address = device
            .native()
            .as_str()
            .parse()
            .map_err(|_| CentralError::NativeFailure(format!("invalid address {}", device.native().as_str())))?;
        self.adapter.device(address).map_err(|e| native(&e))
    }
}

/// Report link loss for `device` until the watcher is aborted.
fn watch_link(links: &Arc<Mutex<Links>>, device: Device, bluez: bluer::Device, sink: NativeEventSink) {
    let id = device.id();
    let shared = Arc::clone(links);
    let watcher = tokio::spawn(async move {
        let Ok(mut events) = bluez.events().await else {
            warn!(device_id = %id, "Cannot watch link state");
            return;
        };
        while let Some(event) = events.next().await {
            if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                let requested = shared.lock().disconnecting.contains(&id);
                if !requested {
                    sink.disconnected(false, device.clone());
                }
                break;
            }
        }
        shared.lock().watchers.remove(&id);
    });

    if let Some(previous) = links.lock().watchers.insert(id, watcher) {
        previous.abort();
    }
}

#[async_trait]
impl NativeRadioPort for BluezRadio {
    fn attach(&self, sink: NativeEventSink) {
        *self.sink.lock() = Some(sink);
    }

    async fn start_scan(
        &self,
        options: &ScanFilterOptions,
        settings: ScanSettings,
        cancel: CancellationToken,
    ) -> Result<()> {
        let sink = self.sink()?;
        let filter = DiscoveryFilter {
            uuids: options.service_uuids.iter().copied().collect(),
            duplicate_data: settings.allow_duplicates,
            transport: DiscoveryTransport::Le,
            ..DiscoveryFilter::default()
        };
        self.adapter
            .set_discovery_filter(filter)
            .await
            .map_err(|e| CentralError::ScanFailed(e.to_string()))?;

        let stream: BoxStream<'static, AdapterEvent> = if settings.allow_duplicates {
            self.adapter
                .discover_devices_with_changes()
                .await
                .map_err(|e| CentralError::ScanFailed(e.to_string()))?
                .boxed()
        } else {
            self.adapter
                .discover_devices()
                .await
                .map_err(|e| CentralError::ScanFailed(e.to_string()))?
                .boxed()
        };

        let adapter = self.adapter.clone();
        let options = options.clone();
        let task = tokio::spawn(async move {
            let mut stream = stream;
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = stream.next() => event,
                };
                let address = match event {
                    Some(AdapterEvent::DeviceAdded(address)) => address,
                    Some(_) => continue,
                    None => break,
                };
                let Ok(bluez) = adapter.device(address) else {
                    continue;
                };
                match snapshot(&bluez).await {
                    Ok(device) if options.matches(&device.advertisement()) => {
                        sink.discovered(device);
                    }
                    Ok(_) => trace!(%address, "Advertisement filtered out"),
                    Err(e) => trace!(%address, error = %e, "Cannot read device properties"),
                }
            }
            debug!("BlueZ discovery stream closed");
        });

        if let Some(previous) = self.scan_task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        // Dropping the discovery stream ends the BlueZ discovery session.
        if let Some(task) = self.scan_task.lock().take() {
            task.abort();
        }
        Ok(())
    }

    async fn connect(
        &self,
        device: &Device,
        _params: &ConnectParameters,
        cancel: CancellationToken,
    ) -> Result<()> {
        let sink = self.sink()?;
        let bluez = self.bluez_device(device)?;
        let device = device.clone();
        let links = Arc::clone(&self.links);

        tokio::spawn(async move {
            let result = tokio::select! {
                () = cancel.cancelled() => return,
                result = bluez.connect() => result,
            };
            match result {
                Ok(()) => {
                    links.lock().disconnecting.remove(&device.id());
                    watch_link(&links, device.clone(), bluez, sink.clone());
                    sink.connected(device);
                }
                Err(e) => {
                    sink.connection_failed(device, e.to_string());
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self, device: &Device) -> Result<()> {
        let sink = self.sink()?;
        let bluez = self.bluez_device(device)?;
        let id = device.id();
        let device = device.clone();
        self.links.lock().disconnecting.insert(id);
        let links = Arc::clone(&self.links);

        tokio::spawn(async move {
            let result = bluez.disconnect().await;
            {
                // The watcher must be gone before `id` leaves `disconnecting`.
                let mut links = links.lock();
                if result.is_ok() {
                    if let Some(watcher) = links.watchers.remove(&id) {
                        watcher.abort();
                    }
                }
                links.disconnecting.remove(&id);
            }
            match result {
                Ok(()) => {
                    sink.disconnected(true, device);
                }
                Err(e) => {
                    sink.disconnect_failed(device, e.to_string());
                }
            }
        });
        Ok(())
    }

    async fn connect_by_id(
        &self,
        id: DeviceId,
        filter: &DeviceFilter,
        _cancel: CancellationToken,
    ) -> Result<Option<Device>> {
        let addresses = self.adapter.device_addresses().await.map_err(|e| native(&e))?;
        let Some(address) = addresses
            .into_iter()
            .find(|address| DeviceId::from_mac(address.0) == id)
        else {
            return Ok(None);
        };

        let bluez = self.adapter.device(address).map_err(|e| native(&e))?;
        let device = snapshot(&bluez).await.map_err(|e| native(&e))?;
        Ok(filter.accepts(&device).then_some(device))
    }
}

impl Drop for BluezRadio {
    fn drop(&mut self) {
        if let Some(task) = self.scan_task.lock().take() {
            task.abort();
        }
        for (_, watcher) in self.links.lock().watchers.drain() {
            watcher.abort();
        }
    }
}
