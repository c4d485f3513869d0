//! Replay transport: plays a capture file back as notifications.
//!
//! Each non-empty line of the capture is one payload. The file is exposed
//! as a single device with one `fff0` service and one notifying `fff1`
//! channel. When the last payload has been delivered the link is reported
//! lost, which ends the session the same way an unplugged adapter would.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use dl_session::{
    ChannelHandle, ChannelProperties, DeviceCriteria, DeviceHandle, LinkHandle, LinkLostCallback,
    LinkLostSlot, NotifyCallback, ServiceHandle, Transport, TransportError, TransportResult,
};

const REPLAY_DEVICE_ID: &str = "replay";
const REPLAY_SERVICE: &str = "fff0";
const REPLAY_CHANNEL: &str = "fff1";

#[derive(Default)]
struct ReplayState {
    connected: bool,
    task: Option<JoinHandle<()>>,
    link_lost: LinkLostSlot,
}

/// Transport that replays recorded payloads at a fixed interval.
pub struct ReplayTransport {
    name: String,
    payloads: Arc<Vec<Vec<u8>>>,
    interval: Duration,
    state: Arc<Mutex<ReplayState>>,
}

impl ReplayTransport {
    /// Load a capture file.
    pub fn from_file(path: impl AsRef<Path>, interval: Duration) -> std::io::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_bytes(name, &raw, interval))
    }

    /// Build from in-memory capture contents.
    pub fn from_bytes(name: impl Into<String>, raw: &[u8], interval: Duration) -> Self {
        let payloads = raw
            .split(|b| *b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(<[u8]>::to_vec)
            .collect();
        Self {
            name: name.into(),
            payloads: Arc::new(payloads),
            interval,
            state: Arc::new(Mutex::new(ReplayState::default())),
        }
    }

    pub fn payload_count(&self) -> usize {
        self.payloads.len()
    }

    fn lock(&self) -> MutexGuard<'_, ReplayState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<ReplayState>) -> MutexGuard<'_, ReplayState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn request_device(&self, criteria: &DeviceCriteria) -> TransportResult<DeviceHandle> {
        let name = format!("Replay: {}", self.name);
        if !criteria.matches_name(Some(&name)) {
            return Err(TransportError::Cancelled);
        }
        Ok(DeviceHandle {
            id: REPLAY_DEVICE_ID.to_string(),
            name: Some(name),
            gatt: true,
        })
    }

    async fn connect(&self, device: &DeviceHandle) -> TransportResult<LinkHandle> {
        let mut state = self.lock();
        if state.connected {
            return Err(TransportError::ConnectionRefused("replay already connected".into()));
        }
        state.connected = true;
        state.link_lost.reset();
        Ok(LinkHandle {
            device_id: device.id.clone(),
        })
    }

    async fn services(&self, _link: &LinkHandle) -> TransportResult<Vec<ServiceHandle>> {
        Ok(vec![ServiceHandle {
            device_id: REPLAY_DEVICE_ID.to_string(),
            uuid: REPLAY_SERVICE.to_string(),
        }])
    }

    async fn sub_channels(&self, service: &ServiceHandle) -> TransportResult<Vec<ChannelHandle>> {
        if service.uuid != REPLAY_SERVICE {
            return Err(TransportError::Discovery(format!("unknown service {}", service.uuid)));
        }
        Ok(vec![ChannelHandle {
            device_id: REPLAY_DEVICE_ID.to_string(),
            service_uuid: REPLAY_SERVICE.to_string(),
            uuid: REPLAY_CHANNEL.to_string(),
            properties: ChannelProperties::notifying(),
        }])
    }

    async fn subscribe(
        &self,
        channel: &ChannelHandle,
        on_data: NotifyCallback,
    ) -> TransportResult<()> {
        if channel.uuid != REPLAY_CHANNEL {
            return Err(TransportError::Subscribe(format!("unknown channel {}", channel.uuid)));
        }
        let mut state = self.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.task.is_some() {
            return Err(TransportError::Subscribe("already subscribed".into()));
        }

        let payloads = self.payloads.clone();
        let interval = self.interval;
        let shared = self.state.clone();
        state.task = Some(tokio::spawn(async move {
            for payload in payloads.iter() {
                tokio::time::sleep(interval).await;
                on_data(payload);
            }
            tracing::info!(payloads = payloads.len(), "replay finished");
            let callback = {
                let mut state = lock_state(&shared);
                state.connected = false;
                state.task = None;
                state.link_lost.signal()
            };
            if let Some(callback) = callback {
                callback();
            }
        }));
        Ok(())
    }

    async fn disconnect(&self, _link: &LinkHandle) -> TransportResult<()> {
        let mut state = self.lock();
        state.connected = false;
        state.link_lost.reset();
        if let Some(task) = state.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn on_link_lost(&self, _link: &LinkHandle, callback: LinkLostCallback) {
        let early = self.lock().link_lost.register(callback);
        if let Some(callback) = early {
            callback();
        }
    }
}
