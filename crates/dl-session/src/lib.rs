//! Diagnostic session engine.
//!
//! - [`registry`]: injected code lookup table
//! - [`scanner`]: pulls DTC tokens out of raw notification payloads
//! - [`aggregator`]: validated, deduplicated, insertion-ordered result set
//! - [`transport`]: the link-layer capability set the engine depends on
//! - [`session`]: lifecycle state machine tying it all together
//! - [`mock`]: scripted transport for tests

pub mod aggregator;
pub mod error;
pub mod mock;
pub mod registry;
pub mod scanner;
pub mod session;
pub mod transport;

// Re-exports for convenience.
pub use aggregator::ResultAggregator;
pub use error::{
    RegistryError, SessionError, SessionResult, TransportError, TransportResult,
};
pub use mock::MockTransport;
pub use registry::{CodeRegistry, RegistryEntry};
pub use session::{DiagnosticSession, SubscribeSummary};
pub use transport::{
    ChannelHandle, ChannelProperties, DeviceCriteria, DeviceHandle, LinkHandle, LinkLostCallback,
    LinkLostSlot, NotifyCallback, ServiceHandle, Transport,
};
