//! Standalone agent runner
//!
//! Runs one role-agent as an independent process: parses the standard
//! flags, emits a `Heartbeat` event to `{api-url}/events` every 10 seconds
//! while running, and shuts down gracefully on SIGINT/SIGTERM. Heartbeat
//! delivery is best-effort; failures are logged and ignored.

use crate::agents::AgentRole;
use crate::config;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interval between heartbeat events.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Command-line arguments shared by all agent processes.
#[derive(Debug, Parser)]
#[command(name = "mnemosyne-agent", about = "Run an orchestration agent as an independent process")]
pub struct AgentCli {
    /// Agent identifier
    #[arg(long, default_value = "executor")]
    pub agent_id: String,

    /// API server URL for heartbeats
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    pub api_url: String,

    /// Database path (defaults to the standard resolution chain)
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Namespace for operations
    #[arg(long, default_value = "project:mnemosyne")]
    pub namespace: String,
}

impl AgentCli {
    /// The agent role implied by the agent id, defaulting to Executor.
    pub fn role(&self) -> AgentRole {
        AgentRole::parse(&self.agent_id).unwrap_or(AgentRole::Executor)
    }

    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(config::default_db_path)
    }
}

/// Post one heartbeat event; errors are reported to the caller for logging.
async fn send_heartbeat(
    client: &reqwest::Client,
    api_url: &str,
    agent_id: &str,
) -> Result<(), reqwest::Error> {
    client
        .post(format!("{}/events", api_url))
        .json(&json!({
            "event_type": "Heartbeat",
            "instance_id": agent_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

/// Run the agent process until a shutdown signal arrives.
pub async fn run(cli: AgentCli) -> crate::error::Result<()> {
    info!("Starting {} agent (ID: {})", cli.role(), cli.agent_id);
    info!("API Server: {}", cli.api_url);
    info!("Database: {}", cli.database_path().display());
    info!("Namespace: {}", cli.namespace);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let heartbeat = {
        let client = client.clone();
        let api_url = cli.api_url.clone();
        let agent_id = cli.agent_id.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                interval.tick().await;
                match send_heartbeat(&client, &api_url, &agent_id).await {
                    Ok(()) => debug!("Heartbeat sent from {}", agent_id),
                    Err(e) => warn!("Heartbeat failed: {}", e),
                }
            }
        })
    };

    info!("{} agent running (press Ctrl+C to stop)", cli.role());
    wait_for_shutdown().await;

    info!("Shutting down {} agent...", cli.role());
    heartbeat.abort();
    let _ = heartbeat.await;
    info!("{} agent stopped", cli.role());

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt");
    }
}
