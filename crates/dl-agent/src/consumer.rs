//! Headless session consumer: logs every event and builds the final report.

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};

use dl_protocol::{CategoryFilter, DiagnosticCode, SessionEvent, SessionState};
use dl_session::DiagnosticSession;

/// Log events until the session is dropped.
pub async fn run(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event logger fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged { state, status, .. } => {
            tracing::info!(state = %state, status = %status, "session update");
        }
        SessionEvent::CodeDetected { code, total, .. } => {
            tracing::info!(
                code = %code.code,
                description = %code.description,
                category = code.category.label(),
                total,
                "fault code"
            );
        }
        SessionEvent::ResultsCleared { removed, .. } => {
            tracing::info!(removed, "fault codes cleared");
        }
    }
}

/// Wait until the session closes on its own (link loss, replay end or
/// failure). Returns the closing state, or `None` if the event stream ended.
pub async fn wait_until_closed(
    mut events: broadcast::Receiver<SessionEvent>,
) -> Option<SessionState> {
    loop {
        match events.recv().await {
            Ok(SessionEvent::StateChanged { state, .. })
                if matches!(state, SessionState::Disconnected | SessionState::Failed(_)) =>
            {
                return Some(state);
            }
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Fault summary for one category filter.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub filter: CategoryFilter,
    pub label: &'static str,
    /// Codes in the whole result set, before filtering.
    pub total: usize,
    pub codes: Vec<DiagnosticCode>,
}

impl Report {
    pub fn build(session: &DiagnosticSession, filter: CategoryFilter) -> Self {
        Self {
            filter,
            label: filter.label(),
            total: session.results().len(),
            codes: session.filter_by_category(filter),
        }
    }

    /// Line shown when the filtered view is empty.
    pub fn empty_message(&self) -> String {
        match self.filter {
            CategoryFilter::All => "No fault codes".to_string(),
            CategoryFilter::Only(_) => format!("No faults in {}", self.label),
        }
    }

    pub fn log(&self) {
        if self.codes.is_empty() {
            tracing::info!(filter = %self.filter, total = self.total, "{}", self.empty_message());
            return;
        }
        for code in &self.codes {
            tracing::info!(
                code = %code.code,
                description = %code.description,
                category = code.category.label(),
                "reported fault"
            );
        }
        tracing::info!(
            filter = %self.filter,
            shown = self.codes.len(),
            total = self.total,
            "fault report complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use dl_protocol::CodeCategory;
    use dl_session::mock::MOCK_NOTIFY_CHANNEL;
    use dl_session::{CodeRegistry, MockTransport};

    async fn listening_session() -> (DiagnosticSession, Arc<MockTransport>) {
        let mock = Arc::new(MockTransport::new());
        let session = DiagnosticSession::new(mock.clone(), Arc::new(CodeRegistry::builtin()));
        session.begin().await.unwrap();
        (session, mock)
    }

    #[tokio::test]
    async fn report_filters_by_category() {
        let (session, mock) = listening_session().await;
        mock.notify(MOCK_NOTIFY_CHANNEL, b"P0125 P0300 P0217");

        let report = Report::build(&session, CategoryFilter::Only(CodeCategory::Cooling));
        assert_eq!(report.total, 3);
        let codes: Vec<_> = report.codes.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["P0125", "P0217"]);
        assert_eq!(report.label, "Cooling system");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["filter"], "cooling");
    }

    #[tokio::test]
    async fn empty_report_messages() {
        let (session, _mock) = listening_session().await;
        let all = Report::build(&session, CategoryFilter::All);
        assert!(all.codes.is_empty());
        assert_eq!(all.empty_message(), "No fault codes");

        let brakes = Report::build(&session, CategoryFilter::Only(CodeCategory::Brakes));
        assert_eq!(brakes.empty_message(), "No faults in Brakes and stability");
    }

    #[tokio::test]
    async fn wait_until_closed_sees_link_loss() {
        let (session, mock) = listening_session().await;
        let events = session.subscribe();
        mock.notify(MOCK_NOTIFY_CHANNEL, b"P0300");
        mock.drop_link();
        assert_eq!(wait_until_closed(events).await, Some(SessionState::Disconnected));
    }

    #[tokio::test]
    async fn wait_until_closed_ends_with_session() {
        let (session, _mock) = listening_session().await;
        let events = session.subscribe();
        drop(session);
        assert_eq!(wait_until_closed(events).await, None);
    }
}
