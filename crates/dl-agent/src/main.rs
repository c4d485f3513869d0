//! dtclink agent: connects to a diagnostic adapter, logs every fault code
//! it reports and prints a filtered report on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use dl_agent::config::AgentConfig;
use dl_agent::consumer::{self, Report};
use dl_protocol::SessionState;
use dl_session::{CodeRegistry, DiagnosticSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dl-agent starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/dtclink/agent.toml".to_string());

    let config = AgentConfig::from_file(&config_path)?;
    tracing::info!(path = %config_path, filter = %config.report_filter, "config loaded");

    // ── Code registry ───────────────────────────────────────────
    let registry = match &config.registry_path {
        Some(path) => CodeRegistry::from_file(path)?,
        None => CodeRegistry::builtin(),
    };
    tracing::info!(codes = registry.len(), "code registry loaded");

    // ── Session ─────────────────────────────────────────────────
    let (transport, criteria) = dl_agent::build_transport(&config.transport).await?;
    let session = DiagnosticSession::with_criteria(transport, Arc::new(registry), criteria);

    let logger = tokio::spawn(consumer::run(session.subscribe()));
    let closed = session.subscribe();

    let reached = session.begin().await?;
    match reached {
        SessionState::Failed(reason) => {
            tracing::error!(%reason, status = %session.status(), "session failed to start");
        }
        state => {
            tracing::info!(%state, status = %session.status(), "dl-agent ready");
            let deadline = async {
                match config.run_secs {
                    Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                }
                () = deadline => {
                    tracing::info!("run time elapsed");
                }
                end = consumer::wait_until_closed(closed) => {
                    tracing::info!(state = ?end, "session closed");
                }
            }
            session.teardown().await;
        }
    }

    Report::build(&session, config.report_filter).log();

    drop(session);
    let _ = tokio::time::timeout(Duration::from_secs(1), logger).await;
    tracing::info!("dl-agent stopped");
    Ok(())
}
