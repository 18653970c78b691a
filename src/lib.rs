pub mod agent;
pub mod config;
pub mod inference;
pub mod mcp_client;
pub mod protocol;
pub mod stream;
pub mod tool_server;
pub mod web;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use config::{AppConfig, LogFormat, LoggingConfig};
use mcp_client::McpClient;

/// Async mutex for types that require `.await` inside their methods.
pub type TokioMutex<T> = tokio::sync::Mutex<T>;

/// Filter used when neither `RUST_LOG` nor a configured level is set.
const DEFAULT_LOG_FILTER: &str = "mcp_chat=info,warn";

/// Return the platform-standard data directory for mcp-chat.
///
/// - macOS: `~/Library/Application Support/mcp-chat/`
/// - Linux: `$XDG_DATA_HOME/mcp-chat/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.mcp-chat/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-chat");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-chat")
}

/// Initialize the tracing subscriber.
///
/// Logs go to stderr unless `logging.file` is set, in which case existing
/// logs are rotated (mcp-chat.log → .1 → .2 → .3) and a fresh, line-flushed
/// mcp-chat.log is opened in the data directory. Returns the log file path
/// when one is used.
pub fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<Option<PathBuf>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(logging.level.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
    });

    let (writer, log_path) = if logging.file {
        let log_dir = data_dir();
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("creating log directory {}", log_dir.display()))?;
        let log_path = log_dir.join("mcp-chat.log");
        rotate_log_file(&log_path, 3);

        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("opening {}", log_path.display()))?;
        (BoxMakeWriter::new(FlushingWriter::new(log_file)), Some(log_path))
    } else {
        (BoxMakeWriter::new(std::io::stderr), None)
    };

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_path.is_none())
        .with_target(true)
        .with_thread_ids(false);

    let installed = match logging.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?log_path.as_ref().map(|p| p.display().to_string()),
        pid = std::process::id(),
        "=== mcp-chat starting ==="
    );
    Ok(log_path)
}

/// Rotate log files: `mcp-chat.log` → `mcp-chat.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A log file writer that flushes after every write, so lines survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run the chat server until Ctrl-C.
///
/// MCP servers that fail to start and a model backend that cannot be built
/// are logged, not fatal: the UI comes up and reports the model as not
/// initialized.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let mut mcp = build_mcp_client(&config);
    for (name, err) in mcp.start_all().await {
        tracing::warn!(server = %name, error = %err, "MCP server failed to start (non-fatal)");
    }
    tracing::info!(
        running_servers = mcp.running_server_count(),
        total_tools = mcp.tool_count(),
        call_timeout_ms = mcp.call_timeout_ms(),
        "MCP client initialized"
    );
    let mcp = Arc::new(TokioMutex::new(mcp));

    let model = match inference::build_chat_model(&config.model).await {
        Ok(model) => Some(model),
        Err(e) => {
            tracing::error!(error = %e, "chat model unavailable");
            None
        }
    };

    let state = web::AppState::new(
        model,
        mcp.clone(),
        config.model.clone(),
        config.mcp.clone(),
    );
    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(address = %addr, "chat UI listening");

    let served = axum::serve(listener, web::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    mcp.lock().await.shutdown_all().await;
    tracing::info!("MCP servers stopped");
    served.context("HTTP server failed")
}

/// The MCP client for the configured servers, not yet started.
fn build_mcp_client(config: &AppConfig) -> McpClient {
    let mut mcp = McpClient::new(config.mcp_config(), None);
    mcp.set_call_timeout(config.mcp.call_timeout_ms);
    mcp
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

// ─── Tests ───────────────────────────────────────────────────────────────────
