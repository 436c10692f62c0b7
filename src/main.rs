//! mnemosyne-agent: run one orchestration agent as a standalone process

use clap::Parser;
use mnemosyne_engine::cli::{run, AgentCli};
use mnemosyne_engine::config::{LOG_FILE_VAR, LOG_LEVEL_VAR};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_VAR)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match std::env::var(LOG_FILE_VAR) {
        Ok(path) if !path.is_empty() => {
            match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    tracing_subscriber::fmt()
                        .with_env_filter(filter)
                        .with_writer(std::sync::Arc::new(file))
                        .with_ansi(false)
                        .init();
                }
                Err(e) => {
                    tracing_subscriber::fmt().with_env_filter(filter).init();
                    tracing::warn!("Could not open log file {}: {}", path, e);
                }
            }
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Warn early when the credential is missing; sessions fail later anyway
    let _ = mnemosyne_engine::config::resolve_api_key();

    let cli = AgentCli::parse();
    run(cli).await?;
    Ok(())
}
