//! Shared test harness for E2E integration tests.
//!
//! Wires a `DiagnosticSession` to a `MockTransport` and keeps an event
//! receiver open from construction, so every announcement can be asserted.

#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::broadcast;

use dl_protocol::{SessionEvent, SessionState};
use dl_session::mock::MOCK_NOTIFY_CHANNEL;
use dl_session::{CodeRegistry, DiagnosticSession, MockTransport};

/// Session plus the mock peripheral behind it.
pub struct TestHarness {
    pub session: DiagnosticSession,
    pub mock: Arc<MockTransport>,
    /// Receiver subscribed before any operation ran.
    pub events: broadcast::Receiver<SessionEvent>,
}

impl TestHarness {
    /// Default mock device (`fff0` service, notify channel `fff1`) and the
    /// built-in registry.
    pub fn new() -> Self {
        Self::with_transport(MockTransport::new())
    }

    pub fn with_transport(mock: MockTransport) -> Self {
        Self::with_registry(mock, CodeRegistry::builtin())
    }

    pub fn with_registry(mock: MockTransport, registry: CodeRegistry) -> Self {
        let mock = Arc::new(mock);
        let session = DiagnosticSession::new(mock.clone(), Arc::new(registry));
        let events = session.subscribe();
        Self {
            session,
            mock,
            events,
        }
    }

    /// Harness already in `Listening` on the default mock device.
    pub async fn listening() -> Self {
        let h = Self::new();
        let state = h.session.begin().await.unwrap();
        assert_eq!(state, SessionState::Listening);
        h
    }

    /// Deliver `text` on the default notify channel.
    pub fn notify(&self, text: &str) -> bool {
        self.mock.notify(MOCK_NOTIFY_CHANNEL, text.as_bytes())
    }

    /// Codes in the result set, in insertion order.
    pub fn codes(&self) -> Vec<String> {
        self.session.results().into_iter().map(|c| c.code).collect()
    }

    /// Every event announced since the last drain.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// States announced since the last drain, in order.
    pub fn drain_states(&mut self) -> Vec<SessionState> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }
}
