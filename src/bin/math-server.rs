//! Arithmetic MCP server on stdio.
//!
//! stdout carries the protocol, so logs go to stderr.

use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use mcp_chat::tool_server::ToolServer;

/// MCP server exposing add, subtract, multiply and divide over stdio.
#[derive(Debug, Parser)]
#[command(name = "math-server", version, about)]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "mcp_chat=info,warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let server = ToolServer::new();
    server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    Ok(())
}
