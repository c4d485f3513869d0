//! Session lifecycle states and the transition graph between them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a diagnostic session.
///
/// ```text
/// Idle ──begin──▶ Scanning ──device found──▶ Connected ──subscribed──▶ Listening
///                    │                          │  │                      │
///                    └────────▶ Failed ◀────────┘  └──▶ Disconnected ◀────┘
/// ```
///
/// `Disconnected` and `Failed` both re-enter `Scanning` on the next `begin()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Scanning,
    Connected,
    Listening,
    Disconnected,
    Failed(FailureReason),
}

impl SessionState {
    /// Whether `begin()` may start a new attempt from this state.
    pub fn can_begin(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Disconnected | SessionState::Failed(_)
        )
    }

    /// Whether a device handle is held in this state.
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Listening)
    }

    /// Whether the edge `self -> next` exists in the lifecycle graph.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle | Disconnected | Failed(_), Scanning) => true,
            (Scanning, Connected | Failed(_)) => true,
            (Connected, Listening | Disconnected | Failed(_)) => true,
            (Listening, Disconnected) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Connected => "connected",
            SessionState::Listening => "listening",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Why a session ended up in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// No compatible wireless transport on this host.
    UnsupportedEnvironment,
    /// The user declined or cancelled device selection.
    SelectionCancelled,
    /// The selected device does not expose a GATT server.
    NoGatt,
    /// The link could not be opened.
    ConnectionRefused(String),
    /// Service discovery failed after the link was opened.
    Discovery(String),
    /// Any other transport-level failure.
    Transport(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::UnsupportedEnvironment => {
                f.write_str("no compatible Bluetooth transport available")
            }
            FailureReason::SelectionCancelled => f.write_str("device selection was cancelled"),
            FailureReason::NoGatt => f.write_str("device does not support GATT connections"),
            FailureReason::ConnectionRefused(msg) => write!(f, "connection refused: {msg}"),
            FailureReason::Discovery(msg) => write!(f, "service discovery failed: {msg}"),
            FailureReason::Transport(msg) => f.write_str(msg),
        }
    }
}

/// Status lines reported alongside state changes.
pub mod status {
    use super::FailureReason;

    pub const READY: &str = "Ready to connect";
    pub const UNSUPPORTED: &str = "Bluetooth is not supported in this environment";
    pub const SEARCHING: &str = "Searching for diagnostic device...";
    pub const RECEIVING: &str = "Receiving data...";
    pub const NO_NOTIFY_CHANNELS: &str =
        "Connected, but no notifying characteristics were found";
    pub const DISCONNECTED: &str = "Disconnected";
    pub const LINK_LOST: &str = "Device connection lost";
    pub const CLEARED: &str = "Codes cleared";

    pub fn connected_to(name: Option<&str>) -> String {
        format!("Connected to: {}", name.unwrap_or("Unknown device"))
    }

    pub fn error(reason: &FailureReason) -> String {
        match reason {
            FailureReason::UnsupportedEnvironment => UNSUPPORTED.to_string(),
            other => format!("Error: {other}"),
        }
    }
}
