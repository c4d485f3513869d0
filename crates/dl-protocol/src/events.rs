//! Events broadcast to session consumers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::code::DiagnosticCode;
use crate::session::SessionState;

/// Change notifications pushed to everyone subscribed to a session.
///
/// Each result-set mutation produces exactly one event, so a consumer that
/// replays `CodeDetected`/`ResultsCleared` in order reconstructs the set.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session moved to a new state or its status line changed.
    StateChanged {
        attempt_id: Option<Uuid>,
        state: SessionState,
        status: String,
        changed_at: DateTime<Utc>,
    },

    /// A registry-known code was seen for the first time.
    CodeDetected {
        code: DiagnosticCode,
        /// Size of the result set after the append.
        total: usize,
        detected_at: DateTime<Utc>,
    },

    /// The result set was emptied.
    ResultsCleared {
        removed: usize,
        cleared_at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::CodeCategory;

    #[test]
    fn state_change_serializes_with_type_tag() {
        let event = SessionEvent::StateChanged {
            attempt_id: Some(Uuid::nil()),
            state: SessionState::Listening,
            status: "Receiving data...".into(),
            changed_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"state_changed""#));
        assert!(json.contains(r#""state":"listening""#));
    }

    #[test]
    fn code_detected_serializes() {
        let event = SessionEvent::CodeDetected {
            code: DiagnosticCode::new("P0420", "Catalyst efficiency low", CodeCategory::Emission),
            total: 3,
            detected_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"code_detected""#));
        assert!(json.contains(r#""code":"P0420""#));
        assert!(json.contains(r#""category":"emission""#));
        assert!(json.contains(r#""total":3"#));
    }

    #[test]
    fn results_cleared_serializes() {
        let event = SessionEvent::ResultsCleared {
            removed: 2,
            cleared_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"results_cleared""#));
        assert!(json.contains(r#""removed":2"#));
    }
}
