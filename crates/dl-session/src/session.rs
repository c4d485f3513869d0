//! Diagnostic session: owns the link lifecycle and routes notification
//! payloads through the scanner into the aggregator.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! `.await`. Every connection attempt gets a new epoch; callbacks and
//! in-flight transport calls carry the epoch they were started under and
//! are discarded once it no longer matches, which is how `teardown()` and
//! link loss cancel work they cannot interrupt.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use dl_protocol::{
    CategoryFilter, DiagnosticCode, FailureReason, SessionEvent, SessionState, status,
};
use futures::future::join_all;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::aggregator::{EVENT_CAPACITY, ResultAggregator};
use crate::error::{SessionError, SessionResult, TransportError};
use crate::registry::CodeRegistry;
use crate::scanner;
use crate::transport::{ChannelHandle, DeviceCriteria, DeviceHandle, LinkHandle, NotifyCallback, Transport};

struct Inner {
    state: SessionState,
    status: String,
    epoch: u64,
    attempt_id: Option<Uuid>,
    device: Option<DeviceHandle>,
    link: Option<LinkHandle>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    aggregator: ResultAggregator,
    criteria: DeviceCriteria,
    events: broadcast::Sender<SessionEvent>,
    inner: Mutex<Inner>,
}

/// Outcome of a best-effort subscription pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscribeSummary {
    pub notify_channels: usize,
    pub subscribed: usize,
    pub failed: usize,
}

/// Handle to a diagnostic session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DiagnosticSession {
    shared: Arc<Shared>,
}

impl DiagnosticSession {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<CodeRegistry>) -> Self {
        Self::with_criteria(transport, registry, DeviceCriteria::default())
    }

    pub fn with_criteria(
        transport: Arc<dyn Transport>,
        registry: Arc<CodeRegistry>,
        criteria: DeviceCriteria,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let status = if transport.is_available() {
            status::READY
        } else {
            tracing::warn!("no compatible transport available");
            status::UNSUPPORTED
        };
        Self {
            shared: Arc::new(Shared {
                aggregator: ResultAggregator::with_events(registry, events.clone()),
                transport,
                criteria,
                events,
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    status: status.to_string(),
                    epoch: 0,
                    attempt_id: None,
                    device: None,
                    link: None,
                }),
            }),
        }
    }

    // ── Consumer view ─────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.shared.lock().state.clone()
    }

    pub fn status(&self) -> String {
        self.shared.lock().status.clone()
    }

    /// Device selected for the current connection, if any.
    pub fn device(&self) -> Option<DeviceHandle> {
        self.shared.lock().device.clone()
    }

    /// Subscribe to state changes and result-set changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn results(&self) -> Vec<DiagnosticCode> {
        self.shared.aggregator.snapshot()
    }

    pub fn filter_by_category(&self, filter: impl Into<CategoryFilter>) -> Vec<DiagnosticCode> {
        self.shared.aggregator.filter_by_category(filter)
    }

    pub fn aggregator(&self) -> &ResultAggregator {
        &self.shared.aggregator
    }

    /// Empty the result set. Valid in any state.
    pub fn clear(&self) {
        self.shared.aggregator.clear();
        let mut inner = self.shared.lock();
        inner.status = status::CLEARED.to_string();
        let state = inner.state.clone();
        self.shared.announce(&inner, state);
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Select a device and bring the link up to `Listening`.
    ///
    /// Transport failures do not produce an `Err`: they leave the session in
    /// `Failed(reason)` with a status line. Returns the state reached.
    pub async fn begin(&self) -> SessionResult<SessionState> {
        let epoch = {
            let mut inner = self.shared.lock();
            if !inner.state.can_begin() {
                return Err(SessionError::InvalidTransition {
                    operation: "begin",
                    state: inner.state.clone(),
                });
            }
            inner.epoch += 1;
            inner.attempt_id = Some(Uuid::now_v7());
            inner.device = None;
            inner.link = None;
            self.shared
                .transition(&mut inner, SessionState::Scanning, status::SEARCHING);
            inner.epoch
        };

        let device = match self
            .shared
            .transport
            .request_device(&self.shared.criteria)
            .await
        {
            Ok(device) => device,
            Err(err) => return Ok(self.shared.fail(epoch, err)),
        };

        {
            let mut inner = self.shared.lock();
            if inner.epoch != epoch {
                return Ok(inner.state.clone());
            }
            tracing::info!(
                device_id = %device.id,
                device_name = device.name.as_deref().unwrap_or("-"),
                "device selected"
            );
            inner.device = Some(device.clone());
            let status = status::connected_to(device.name.as_deref());
            self.shared
                .transition(&mut inner, SessionState::Connected, &status);
        }

        self.establish_link(device).await
    }

    /// Connect to `device`, discover its channels and subscribe to every
    /// notify-capable one.
    ///
    /// Valid only from `Connected`. Reaches `Listening` if at least one
    /// subscription succeeds; stays `Connected` with a status line if the
    /// device has no notifying channels.
    pub async fn establish_link(&self, device: DeviceHandle) -> SessionResult<SessionState> {
        let epoch = {
            let inner = self.shared.lock();
            if inner.state != SessionState::Connected || inner.link.is_some() {
                return Err(SessionError::InvalidTransition {
                    operation: "establish link",
                    state: inner.state.clone(),
                });
            }
            inner.epoch
        };

        if !device.gatt {
            return Ok(self.shared.fail(epoch, TransportError::NoGatt));
        }

        let transport = self.shared.transport.clone();
        let link = match transport.connect(&device).await {
            Ok(link) => link,
            Err(err) => return Ok(self.shared.fail(epoch, err)),
        };

        let superseded = {
            let mut inner = self.shared.lock();
            if inner.epoch == epoch {
                inner.link = Some(link.clone());
            }
            inner.epoch != epoch
        };
        if superseded {
            tracing::debug!("session moved on while connecting, closing stale link");
            self.shared.close_link(&link).await;
            return Ok(self.state());
        }

        let weak = Arc::downgrade(&self.shared);
        transport.on_link_lost(
            &link,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_link_lost(epoch);
                }
            }),
        );

        let services = match transport.services(&link).await {
            Ok(services) => services,
            Err(err) => {
                let reason = match err {
                    TransportError::Discovery(_) => err,
                    other => TransportError::Discovery(other.to_string()),
                };
                let state = self.shared.fail(epoch, reason);
                // A superseded attempt's link was already released by teardown.
                if matches!(state, SessionState::Failed(_)) {
                    self.shared.close_link(&link).await;
                }
                return Ok(state);
            }
        };
        tracing::debug!(count = services.len(), "services discovered");

        // Channel enumeration: best effort per service.
        let listings = join_all(services.iter().map(|s| transport.sub_channels(s))).await;
        let mut channels = Vec::new();
        for (service, listing) in services.iter().zip(listings) {
            match listing {
                Ok(found) => channels.extend(found),
                Err(err) => {
                    tracing::warn!(service = %service.uuid, error = %err, "failed to enumerate characteristics");
                }
            }
        }

        let summary = self.subscribe_all(epoch, &channels).await;

        let mut inner = self.shared.lock();
        if inner.epoch != epoch {
            return Ok(inner.state.clone());
        }
        if summary.subscribed > 0 {
            tracing::info!(
                subscribed = summary.subscribed,
                failed = summary.failed,
                "listening for notifications"
            );
            self.shared
                .transition(&mut inner, SessionState::Listening, status::RECEIVING);
        } else {
            tracing::warn!(
                notify_channels = summary.notify_channels,
                failed = summary.failed,
                "no notification subscriptions active"
            );
            inner.status = status::NO_NOTIFY_CHANNELS.to_string();
            self.shared.announce(&inner, SessionState::Connected);
        }
        Ok(inner.state.clone())
    }

    /// Release the link and move to `Disconnected`.
    ///
    /// No-op unless a device handle is held, so repeated calls are harmless.
    pub async fn teardown(&self) {
        let link = {
            let mut inner = self.shared.lock();
            if !inner.state.is_connected() {
                tracing::debug!(state = %inner.state, "teardown: nothing to release");
                return;
            }
            inner.epoch += 1;
            inner.device = None;
            let link = inner.link.take();
            self.shared
                .transition(&mut inner, SessionState::Disconnected, status::DISCONNECTED);
            link
        };

        if let Some(link) = link {
            self.shared.close_link(&link).await;
        }
    }

    async fn subscribe_all(&self, epoch: u64, channels: &[ChannelHandle]) -> SubscribeSummary {
        let notify: Vec<&ChannelHandle> = channels.iter().filter(|c| c.properties.notify).collect();
        let transport = &self.shared.transport;

        let attempts = notify.iter().map(|channel| {
            let callback = self.notification_callback(epoch, channel);
            async move { (channel, transport.subscribe(channel, callback).await) }
        });

        let mut summary = SubscribeSummary {
            notify_channels: notify.len(),
            ..SubscribeSummary::default()
        };
        for (channel, result) in join_all(attempts).await {
            match result {
                Ok(()) => {
                    tracing::debug!(channel = %channel.uuid, service = %channel.service_uuid, "subscribed");
                    summary.subscribed += 1;
                }
                Err(err) => {
                    tracing::warn!(channel = %channel.uuid, error = %err, "subscription failed");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Callback handed to the transport for one channel.
    ///
    /// Holds only a weak reference and the epoch it belongs to; the result
    /// set is reached through the aggregator on every delivery.
    fn notification_callback(&self, epoch: u64, channel: &ChannelHandle) -> NotifyCallback {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let channel_uuid = channel.uuid.clone();
        Arc::new(move |payload: &[u8]| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            shared.on_notification(epoch, &channel_uuid, payload);
        })
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut Inner, next: SessionState, status: &str) {
        if !inner.state.can_transition_to(&next) {
            tracing::error!(from = %inner.state, to = %next, "rejected invalid state transition");
            return;
        }
        tracing::info!(
            attempt_id = ?inner.attempt_id,
            from = %inner.state,
            to = %next,
            status,
            "session state changed"
        );
        inner.state = next.clone();
        inner.status = status.to_string();
        self.announce(inner, next);
    }

    fn announce(&self, inner: &Inner, state: SessionState) {
        let _ = self.events.send(SessionEvent::StateChanged {
            attempt_id: inner.attempt_id,
            state,
            status: inner.status.clone(),
            changed_at: Utc::now(),
        });
    }

    /// Move to `Failed` if `epoch` is still current. Returns the state after.
    fn fail(&self, epoch: u64, err: TransportError) -> SessionState {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            tracing::debug!(error = %err, "discarding failure from superseded attempt");
            return inner.state.clone();
        }
        let reason = FailureReason::from(err);
        tracing::warn!(reason = %reason, "session failed");
        let status = status::error(&reason);
        inner.link = None;
        self.transition(&mut inner, SessionState::Failed(reason), &status);
        inner.state.clone()
    }

    fn on_notification(&self, epoch: u64, channel: &str, payload: &[u8]) {
        if !self.accepts(&self.lock(), epoch) {
            tracing::debug!(channel, bytes = payload.len(), "dropping notification from closed link");
            return;
        }
        let tokens = scanner::scan(payload);
        tracing::trace!(channel, bytes = payload.len(), tokens = tokens.len(), "notification");
        for token in &tokens {
            // Held across the append so teardown cannot land between the
            // check and the write. Lock order is always inner, then results.
            let inner = self.lock();
            if !self.accepts(&inner, epoch) {
                return;
            }
            self.aggregator.ingest(token);
        }
    }

    fn accepts(&self, inner: &Inner, epoch: u64) -> bool {
        inner.epoch == epoch && inner.state.is_connected()
    }

    fn handle_link_lost(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch != epoch || !inner.state.is_connected() {
            tracing::debug!("ignoring link loss for a closed link");
            return;
        }
        tracing::warn!("link lost");
        inner.epoch += 1;
        inner.device = None;
        inner.link = None;
        self.transition(&mut inner, SessionState::Disconnected, status::LINK_LOST);
    }

    async fn close_link(&self, link: &LinkHandle) {
        if let Err(err) = self.transport.disconnect(link).await {
            tracing::warn!(device_id = %link.device_id, error = %err, "disconnect failed");
        }
    }
}
