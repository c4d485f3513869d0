//! Wireless transport abstraction.
//!
//! The session engine only talks to the [`Transport`] trait. Impls:
//! - `MockTransport`: scripted devices and channels (in `mock.rs`)
//! - `ReplayTransport` / `BleTransport`: in the agent crate
//!
//! Handles are plain data so transports can key their own state on the ids.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportResult;

/// Called with the raw payload of every notification on a sub-channel.
pub type NotifyCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Called once when the transport detects that a link has dropped.
pub type LinkLostCallback = Box<dyn FnOnce() + Send>;

/// Link-loss registration slot for transport implementations.
///
/// A loss signalled before `on_link_lost` registers is remembered, and the
/// callback is handed straight back on registration. Methods return the
/// callback to run so callers can invoke it after releasing their lock.
#[derive(Default)]
pub struct LinkLostSlot {
    lost: bool,
    callback: Option<LinkLostCallback>,
}

impl LinkLostSlot {
    /// Forget any loss and callback; used when a link opens or closes.
    pub fn reset(&mut self) {
        self.lost = false;
        self.callback = None;
    }

    /// Record that the link dropped.
    pub fn signal(&mut self) -> Option<LinkLostCallback> {
        self.lost = true;
        self.callback.take()
    }

    /// Store `callback`, or return it if the link already dropped.
    pub fn register(&mut self, callback: LinkLostCallback) -> Option<LinkLostCallback> {
        if self.lost {
            return Some(callback);
        }
        self.callback = Some(callback);
        None
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }
}

/// Device selection criteria passed to `request_device`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCriteria {
    /// Offer every nearby device instead of filtering by name.
    #[serde(default = "default_accept_all")]
    pub accept_all_devices: bool,
    /// Only devices whose advertised name starts with this prefix.
    #[serde(default)]
    pub name_prefix: Option<String>,
    /// Services the session wants access to after connecting.
    #[serde(default = "default_optional_services")]
    pub optional_services: Vec<String>,
}

fn default_accept_all() -> bool {
    true
}

fn default_optional_services() -> Vec<String> {
    vec![
        "generic_access".to_string(),
        "device_information".to_string(),
        "fff0".to_string(),
    ]
}

impl Default for DeviceCriteria {
    fn default() -> Self {
        Self {
            accept_all_devices: default_accept_all(),
            name_prefix: None,
            optional_services: default_optional_services(),
        }
    }
}

impl DeviceCriteria {
    /// Whether a device advertising `name` satisfies these criteria.
    pub fn matches_name(&self, name: Option<&str>) -> bool {
        match (&self.name_prefix, name) {
            (Some(prefix), Some(name)) => name.starts_with(prefix.as_str()),
            (Some(_), None) => false,
            (None, _) => self.accept_all_devices,
        }
    }
}

/// A selected peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: String,
    pub name: Option<String>,
    /// Whether the device exposes a GATT server.
    pub gatt: bool,
}

/// An open connection to a peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    pub device_id: String,
}

/// A service advertised on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub device_id: String,
    pub uuid: String,
}

/// A characteristic within a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub device_id: String,
    pub service_uuid: String,
    pub uuid: String,
    pub properties: ChannelProperties,
}

/// Capability flags of a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelProperties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

impl ChannelProperties {
    pub fn notifying() -> Self {
        Self {
            notify: true,
            ..Self::default()
        }
    }
}

/// Capability set the session engine needs from a wireless link layer.
///
/// Every async method is a suspension point; the engine never holds a lock
/// across them. Callbacks may be invoked from any task.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether this host can use the transport at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Ask for a device matching `criteria`. May wait on a user.
    async fn request_device(&self, criteria: &DeviceCriteria) -> TransportResult<DeviceHandle>;

    /// Open a link to a selected device.
    async fn connect(&self, device: &DeviceHandle) -> TransportResult<LinkHandle>;

    /// Enumerate the services advertised on a link.
    async fn services(&self, link: &LinkHandle) -> TransportResult<Vec<ServiceHandle>>;

    /// Enumerate the sub-channels of a service.
    async fn sub_channels(&self, service: &ServiceHandle) -> TransportResult<Vec<ChannelHandle>>;

    /// Start notifications on a channel, delivering payloads to `on_data`.
    async fn subscribe(&self, channel: &ChannelHandle, on_data: NotifyCallback)
    -> TransportResult<()>;

    /// Close a link. Callbacks registered on it stop firing.
    async fn disconnect(&self, link: &LinkHandle) -> TransportResult<()>;

    /// Register a callback fired when `link` drops without `disconnect`.
    fn on_link_lost(&self, link: &LinkHandle, callback: LinkLostCallback);
}
