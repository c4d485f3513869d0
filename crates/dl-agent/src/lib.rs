//! dtclink agent: headless consumer for a diagnostic session.
//!
//! Loads [`config::AgentConfig`], builds the configured transport, logs the
//! session's event stream and prints a fault report on exit. Exposed as a
//! library so the end-to-end tests can drive the same wiring.

pub mod config;
pub mod consumer;
pub mod replay;

#[cfg(feature = "ble")]
pub mod ble;

use std::sync::Arc;
use std::time::Duration;

use dl_session::{DeviceCriteria, Transport};

use config::TransportConfig;
use replay::ReplayTransport;

/// Build the transport named by `config`, along with the device criteria
/// the session should select with.
pub async fn build_transport(
    config: &TransportConfig,
) -> anyhow::Result<(Arc<dyn Transport>, DeviceCriteria)> {
    match config {
        TransportConfig::Replay { path, interval_ms } => {
            let replay = ReplayTransport::from_file(path, Duration::from_millis(*interval_ms))
                .map_err(|e| anyhow::anyhow!("failed to read capture {path}: {e}"))?;
            tracing::info!(path = %path, payloads = replay.payload_count(), "replay transport ready");
            Ok((Arc::new(replay), DeviceCriteria::default()))
        }
        #[cfg(feature = "ble")]
        TransportConfig::Ble { scan_secs, criteria } => {
            let ble = ble::BleTransport::new(Duration::from_secs(*scan_secs)).await?;
            tracing::info!(scan_secs, available = ble.is_available(), "BLE transport ready");
            Ok((Arc::new(ble), criteria.clone()))
        }
        #[cfg(not(feature = "ble"))]
        TransportConfig::Ble { .. } => {
            anyhow::bail!("BLE transport requested but dl-agent was built without the `ble` feature")
        }
    }
}
