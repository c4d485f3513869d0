//! Agent configuration, loadable from TOML.

use dl_protocol::CategoryFilter;
use dl_session::DeviceCriteria;
use serde::Deserialize;

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Where notification payloads come from.
    pub transport: TransportConfig,
    /// TOML code registry replacing the built-in table.
    #[serde(default)]
    pub registry_path: Option<String>,
    /// Category shown in the final report.
    #[serde(default)]
    pub report_filter: CategoryFilter,
    /// Tear the session down after this many seconds. None runs until
    /// Ctrl-C or until the link closes.
    #[serde(default)]
    pub run_secs: Option<u64>,
}

/// Transport selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Replay a capture file, one notification payload per line.
    Replay {
        path: String,
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
    },
    /// Bluetooth LE adapter (requires the `ble` feature).
    Ble {
        #[serde(default = "default_scan_secs")]
        scan_secs: u64,
        #[serde(default)]
        criteria: DeviceCriteria,
    },
}

fn default_interval_ms() -> u64 {
    250
}

fn default_scan_secs() -> u64 {
    5
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }
}
