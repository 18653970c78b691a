use clap::Parser;

use mcp_chat::config::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, config_path) = config::resolve(&cli)?;
    mcp_chat::init_tracing(&config.logging)?;

    match &config_path {
        Some(path) => tracing::info!(path = %path.display(), "loaded configuration"),
        None => tracing::info!("no config.yaml found, using defaults"),
    }
    tracing::info!(
        backend = ?config.model.backend,
        mcp_servers = config.mcp_servers.len(),
        "configuration resolved"
    );

    mcp_chat::run(config).await
}
