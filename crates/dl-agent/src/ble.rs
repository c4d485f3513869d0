//! Bluetooth LE transport backed by `btleplug`.
//!
//! Uses the first adapter on the host. `request_device` scans for a fixed
//! window and picks the first peripheral whose name satisfies the criteria;
//! there is no interactive chooser. All characteristic notifications arrive
//! on one peripheral-wide stream and are routed to callbacks by UUID.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::task::JoinHandle;

use dl_session::{
    ChannelHandle, ChannelProperties, DeviceCriteria, DeviceHandle, LinkHandle, LinkLostCallback,
    LinkLostSlot, NotifyCallback, ServiceHandle, Transport, TransportError, TransportResult,
};

#[derive(Default)]
struct BleState {
    peripheral: Option<Peripheral>,
    /// Notification callbacks keyed by characteristic UUID string.
    routes: HashMap<String, NotifyCallback>,
    tasks: Vec<JoinHandle<()>>,
    link_lost: LinkLostSlot,
}

/// Bluetooth LE transport on the host's first adapter.
pub struct BleTransport {
    adapter: Option<Adapter>,
    scan_window: Duration,
    state: Arc<Mutex<BleState>>,
}

impl BleTransport {
    /// Open the BLE manager. A host without adapters yields an unavailable
    /// transport rather than an error.
    pub async fn new(scan_window: Duration) -> anyhow::Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?.into_iter().next();
        if adapter.is_none() {
            tracing::warn!("no Bluetooth adapters found");
        }
        Ok(Self {
            adapter,
            scan_window,
            state: Arc::new(Mutex::new(BleState::default())),
        })
    }

    fn adapter(&self) -> TransportResult<&Adapter> {
        self.adapter.as_ref().ok_or(TransportError::Unsupported)
    }

    fn lock(&self) -> MutexGuard<'_, BleState> {
        lock_state(&self.state)
    }

    fn peripheral(&self) -> TransportResult<Peripheral> {
        self.lock().peripheral.clone().ok_or(TransportError::NotConnected)
    }
}

fn lock_state(state: &Mutex<BleState>) -> MutexGuard<'_, BleState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn other(err: btleplug::Error) -> TransportError {
    TransportError::Other(err.to_string())
}

#[async_trait]
impl Transport for BleTransport {
    fn is_available(&self) -> bool {
        self.adapter.is_some()
    }

    async fn request_device(&self, criteria: &DeviceCriteria) -> TransportResult<DeviceHandle> {
        let adapter = self.adapter()?;
        adapter.start_scan(ScanFilter::default()).await.map_err(other)?;
        tokio::time::sleep(self.scan_window).await;
        adapter.stop_scan().await.map_err(other)?;

        for peripheral in adapter.peripherals().await.map_err(other)? {
            let name = peripheral
                .properties()
                .await
                .ok()
                .flatten()
                .and_then(|p| p.local_name);
            if !criteria.matches_name(name.as_deref()) {
                continue;
            }
            let device = DeviceHandle {
                id: format!("{:?}", peripheral.id()),
                name,
                gatt: true,
            };
            tracing::debug!(device_id = %device.id, "peripheral matched criteria");
            self.lock().peripheral = Some(peripheral);
            return Ok(device);
        }
        Err(TransportError::Cancelled)
    }

    async fn connect(&self, device: &DeviceHandle) -> TransportResult<LinkHandle> {
        let adapter = self.adapter()?.clone();
        let peripheral = self.peripheral()?;
        self.lock().link_lost.reset();
        // Watch adapter events before connecting so an early drop is seen.
        let mut events = adapter.events().await.map_err(other)?;
        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::ConnectionRefused(e.to_string()))?;

        let mut notifications = peripheral.notifications().await.map_err(other)?;
        let routes_state = self.state.clone();
        let router = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let callback = lock_state(&routes_state)
                    .routes
                    .get(&notification.uuid.to_string())
                    .cloned();
                if let Some(callback) = callback {
                    callback(&notification.value);
                }
            }
        });

        let peripheral_id = peripheral.id();
        let lost_state = self.state.clone();
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id != peripheral_id {
                        continue;
                    }
                    let callback = {
                        let mut state = lock_state(&lost_state);
                        state.routes.clear();
                        state.link_lost.signal()
                    };
                    if let Some(callback) = callback {
                        callback();
                    }
                    break;
                }
            }
        });

        self.lock().tasks.extend([router, watcher]);
        Ok(LinkHandle {
            device_id: device.id.clone(),
        })
    }

    async fn services(&self, link: &LinkHandle) -> TransportResult<Vec<ServiceHandle>> {
        let peripheral = self.peripheral()?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::Discovery(e.to_string()))?;
        Ok(peripheral
            .services()
            .into_iter()
            .map(|s| ServiceHandle {
                device_id: link.device_id.clone(),
                uuid: s.uuid.to_string(),
            })
            .collect())
    }

    async fn sub_channels(&self, service: &ServiceHandle) -> TransportResult<Vec<ChannelHandle>> {
        let peripheral = self.peripheral()?;
        let found = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid.to_string() == service.uuid)
            .ok_or_else(|| TransportError::Discovery(format!("unknown service {}", service.uuid)))?;
        Ok(found
            .characteristics
            .into_iter()
            .map(|c| ChannelHandle {
                device_id: service.device_id.clone(),
                service_uuid: service.uuid.clone(),
                uuid: c.uuid.to_string(),
                properties: ChannelProperties {
                    read: c.properties.contains(CharPropFlags::READ),
                    write: c.properties.contains(CharPropFlags::WRITE),
                    notify: c.properties.contains(CharPropFlags::NOTIFY),
                },
            })
            .collect())
    }

    async fn subscribe(
        &self,
        channel: &ChannelHandle,
        on_data: NotifyCallback,
    ) -> TransportResult<()> {
        let peripheral = self.peripheral()?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid.to_string() == channel.uuid && c.service_uuid.to_string() == channel.service_uuid)
            .ok_or_else(|| TransportError::Subscribe(format!("unknown characteristic {}", channel.uuid)))?;

        // Route first so no notification is lost between subscribe and insert.
        self.lock().routes.insert(channel.uuid.clone(), on_data);
        if let Err(e) = peripheral.subscribe(&characteristic).await {
            self.lock().routes.remove(&channel.uuid);
            return Err(TransportError::Subscribe(e.to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self, _link: &LinkHandle) -> TransportResult<()> {
        let peripheral = {
            let mut state = self.lock();
            state.routes.clear();
            state.link_lost.reset();
            for task in state.tasks.drain(..) {
                task.abort();
            }
            state.peripheral.take()
        };
        if let Some(peripheral) = peripheral {
            peripheral.disconnect().await.map_err(other)?;
        }
        Ok(())
    }

    fn on_link_lost(&self, link: &LinkHandle, callback: LinkLostCallback) {
        let early = self.lock().link_lost.register(callback);
        if let Some(callback) = early {
            tracing::warn!(device_id = %link.device_id, "link dropped before loss callback was registered");
            callback();
        }
    }
}
