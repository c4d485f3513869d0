//! Session engine error types.

use dl_protocol::{FailureReason, SessionState};
use thiserror::Error;

/// Errors reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("no compatible Bluetooth transport available")]
    Unsupported,

    #[error("device selection cancelled")]
    Cancelled,

    #[error("device does not support GATT")]
    NoGatt,

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("link is not open")]
    NotConnected,

    #[error("{0}")]
    Other(String),
}

impl From<TransportError> for FailureReason {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unsupported => FailureReason::UnsupportedEnvironment,
            TransportError::Cancelled => FailureReason::SelectionCancelled,
            TransportError::NoGatt => FailureReason::NoGatt,
            TransportError::ConnectionRefused(msg) => FailureReason::ConnectionRefused(msg),
            TransportError::Discovery(msg) => FailureReason::Discovery(msg),
            other => FailureReason::Transport(other.to_string()),
        }
    }
}

/// Convenience alias for transport results.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors returned directly to callers of the session API.
///
/// Transport failures never show up here: they become
/// `SessionState::Failed` plus a status line. Only misuse of the
/// lifecycle is an error.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("cannot {operation} while session is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },
}

/// Convenience alias for session results.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors loading a code registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid code {0:?}: expected a letter P, B, C or U followed by four digits")]
    InvalidCode(String),
}
