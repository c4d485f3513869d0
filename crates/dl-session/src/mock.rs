//! Mock transport for testing.
//!
//! Scripted device selection, service layout and failure injection, plus
//! manual notification delivery and link-loss triggering. All tests use this
//! instead of a real Bluetooth adapter so the suite runs in CI on any platform.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{TransportError, TransportResult};
use crate::transport::{
    ChannelHandle, ChannelProperties, DeviceCriteria, DeviceHandle, LinkHandle, LinkLostCallback,
    NotifyCallback, ServiceHandle, Transport,
};

/// Device id used by the default mock device.
pub const MOCK_DEVICE_ID: &str = "mock-adapter";

/// Default notify channel of [`MockTransport::new`].
pub const MOCK_NOTIFY_CHANNEL: &str = "fff1";

struct MockService {
    handle: ServiceHandle,
    channels: TransportResult<Vec<ChannelHandle>>,
}

#[derive(Default)]
struct MockState {
    /// Active subscriptions keyed by channel uuid.
    subscriptions: HashMap<String, NotifyCallback>,
    /// Subscriptions from links that were disconnected.
    detached: HashMap<String, NotifyCallback>,
    link_lost: Vec<LinkLostCallback>,
    link_open: bool,
    calls: Vec<String>,
}

/// Mock transport with a scripted peripheral.
pub struct MockTransport {
    available: bool,
    selection: TransportResult<DeviceHandle>,
    connect_error: Option<TransportError>,
    connect_gate: Option<Arc<Notify>>,
    services: Vec<MockService>,
    failing_subscriptions: HashSet<String>,
    state: Mutex<MockState>,
}

impl MockTransport {
    /// One GATT device with a single `fff0` service and notify channel `fff1`.
    pub fn new() -> Self {
        Self::bare().with_service(
            "fff0",
            vec![
                Self::channel("fff0", MOCK_NOTIFY_CHANNEL, ChannelProperties::notifying()),
                Self::channel(
                    "fff0",
                    "fff2",
                    ChannelProperties {
                        write: true,
                        ..ChannelProperties::default()
                    },
                ),
            ],
        )
    }

    /// A GATT device with no services.
    pub fn bare() -> Self {
        Self {
            available: true,
            selection: Ok(DeviceHandle {
                id: MOCK_DEVICE_ID.to_string(),
                name: Some("OBDII".to_string()),
                gatt: true,
            }),
            connect_error: None,
            connect_gate: None,
            services: Vec::new(),
            failing_subscriptions: HashSet::new(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Build a channel handle on the mock device.
    pub fn channel(service: &str, uuid: &str, properties: ChannelProperties) -> ChannelHandle {
        ChannelHandle {
            device_id: MOCK_DEVICE_ID.to_string(),
            service_uuid: service.to_string(),
            uuid: uuid.to_string(),
            properties,
        }
    }

    /// Report the transport as unavailable on this host.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self.selection = Err(TransportError::Unsupported);
        self
    }

    pub fn with_device(mut self, device: DeviceHandle) -> Self {
        self.selection = Ok(device);
        self
    }

    pub fn with_selection_error(mut self, err: TransportError) -> Self {
        self.selection = Err(err);
        self
    }

    pub fn with_connect_error(mut self, err: TransportError) -> Self {
        self.connect_error = Some(err);
        self
    }

    /// Make `connect` wait until `gate` is notified.
    pub fn with_connect_gate(mut self, gate: Arc<Notify>) -> Self {
        self.connect_gate = Some(gate);
        self
    }

    pub fn with_service(mut self, uuid: &str, channels: Vec<ChannelHandle>) -> Self {
        self.services.push(MockService {
            handle: ServiceHandle {
                device_id: MOCK_DEVICE_ID.to_string(),
                uuid: uuid.to_string(),
            },
            channels: Ok(channels),
        });
        self
    }

    /// Add a service whose channel enumeration fails.
    pub fn with_failing_service(mut self, uuid: &str, err: TransportError) -> Self {
        self.services.push(MockService {
            handle: ServiceHandle {
                device_id: MOCK_DEVICE_ID.to_string(),
                uuid: uuid.to_string(),
            },
            channels: Err(err),
        });
        self
    }

    /// Make `subscribe` fail for the channel with this uuid.
    pub fn with_failing_subscription(mut self, channel_uuid: &str) -> Self {
        self.failing_subscriptions.insert(channel_uuid.to_string());
        self
    }

    /// Deliver a notification on an active subscription.
    ///
    /// Returns `false` if nothing is subscribed to the channel.
    pub fn notify(&self, channel_uuid: &str, payload: &[u8]) -> bool {
        let callback = self.lock().subscriptions.get(channel_uuid).cloned();
        match callback {
            Some(cb) => {
                cb(payload);
                true
            }
            None => false,
        }
    }

    /// Deliver a notification through a callback from a disconnected link,
    /// as a late in-flight delivery would.
    pub fn notify_detached(&self, channel_uuid: &str, payload: &[u8]) -> bool {
        let callback = self.lock().detached.get(channel_uuid).cloned();
        match callback {
            Some(cb) => {
                cb(payload);
                true
            }
            None => false,
        }
    }

    /// Fire every registered link-loss callback, even for closed links.
    pub fn drop_link(&self) {
        let callbacks = {
            let mut state = self.lock();
            state.link_open = false;
            let subs = std::mem::take(&mut state.subscriptions);
            state.detached.extend(subs);
            std::mem::take(&mut state.link_lost)
        };
        for cb in callbacks {
            cb();
        }
    }

    /// Channel uuids with an active subscription, sorted.
    pub fn subscribed_channels(&self) -> Vec<String> {
        let mut uuids: Vec<String> = self.lock().subscriptions.keys().cloned().collect();
        uuids.sort();
        uuids
    }

    /// Names of the trait methods called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// How many times `method` was called.
    pub fn call_count(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == method).count()
    }

    pub fn is_link_open(&self) -> bool {
        self.lock().link_open
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, method: &str) {
        self.lock().calls.push(method.to_string());
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn request_device(&self, criteria: &DeviceCriteria) -> TransportResult<DeviceHandle> {
        self.record("request_device");
        let device = self.selection.clone()?;
        if !criteria.matches_name(device.name.as_deref()) {
            return Err(TransportError::Cancelled);
        }
        Ok(device)
    }

    async fn connect(&self, device: &DeviceHandle) -> TransportResult<LinkHandle> {
        self.record("connect");
        if let Some(gate) = &self.connect_gate {
            gate.notified().await;
        }
        if let Some(err) = &self.connect_error {
            return Err(err.clone());
        }
        self.lock().link_open = true;
        Ok(LinkHandle {
            device_id: device.id.clone(),
        })
    }

    async fn services(&self, _link: &LinkHandle) -> TransportResult<Vec<ServiceHandle>> {
        self.record("services");
        if !self.lock().link_open {
            return Err(TransportError::NotConnected);
        }
        Ok(self.services.iter().map(|s| s.handle.clone()).collect())
    }

    async fn sub_channels(&self, service: &ServiceHandle) -> TransportResult<Vec<ChannelHandle>> {
        self.record("sub_channels");
        self.services
            .iter()
            .find(|s| s.handle.uuid == service.uuid)
            .ok_or_else(|| TransportError::Discovery(format!("unknown service {}", service.uuid)))?
            .channels
            .clone()
    }

    async fn subscribe(
        &self,
        channel: &ChannelHandle,
        on_data: NotifyCallback,
    ) -> TransportResult<()> {
        self.record("subscribe");
        if !channel.properties.notify || self.failing_subscriptions.contains(&channel.uuid) {
            return Err(TransportError::Subscribe(format!(
                "cannot start notifications on {}",
                channel.uuid
            )));
        }
        self.lock()
            .subscriptions
            .insert(channel.uuid.clone(), on_data);
        Ok(())
    }

    async fn disconnect(&self, _link: &LinkHandle) -> TransportResult<()> {
        self.record("disconnect");
        let mut state = self.lock();
        state.link_open = false;
        let subs = std::mem::take(&mut state.subscriptions);
        state.detached.extend(subs);
        Ok(())
    }

    fn on_link_lost(&self, _link: &LinkHandle, callback: LinkLostCallback) {
        self.lock().link_lost.push(callback);
    }
}
