//! Server process lifecycle management.
//!
//! Spawning, the MCP initialization handshake, restart with backoff, and
//! shutdown of MCP server child processes.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::sleep;

use super::errors::McpError;
use super::transport::{extract_result, StdioTransport};
use super::types::{McpToolDefinition, ServerConfig};
use crate::protocol::{InitializeResult, ListToolsResult, PROTOCOL_VERSION};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Maximum restart attempts before giving up on a server.
pub const MAX_RESTART_ATTEMPTS: u32 = 3;

/// Base delay between restart attempts (doubles each time).
const RESTART_BASE_DELAY: Duration = Duration::from_secs(1);

/// Timeout for the initialize handshake plus tool discovery.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ─── ManagedServer ───────────────────────────────────────────────────────────

/// A running MCP server process with its transport and tool definitions.
pub struct ManagedServer {
    pub name: String,
    process: Child,
    pub transport: StdioTransport,
    /// Tool definitions received from `tools/list`.
    pub tools: Vec<McpToolDefinition>,
    /// Server name and version from `initialize`.
    pub server_info: String,
    restart_count: u32,
}

impl ManagedServer {
    /// How many times this server has been restarted.
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Ask the server to stop, force-killing it after a grace period.
    pub async fn shutdown(&mut self) {
        let _ = self.transport.notify("shutdown", None).await;

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.process.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, %status, "server exited");
            }
            _ => {
                tracing::warn!(server = %self.name, "server did not exit, killing");
                let _ = self.process.kill().await;
            }
        }
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a single MCP server process and perform the initialization handshake.
pub async fn spawn_server(
    name: &str,
    config: &ServerConfig,
    working_dir: Option<&str>,
) -> Result<ManagedServer, McpError> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);
    cmd.envs(&config.env);

    // Per-server cwd overrides the global working_dir
    if let Some(dir) = config.cwd.as_deref().or(working_dir) {
        cmd.current_dir(dir);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;

    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;

    let stderr_handle = child.stderr.take();

    let transport = StdioTransport::new(name, stdin, stdout);

    let handshake = tokio::time::timeout(INIT_TIMEOUT, initialize(&transport, name)).await;
    let (server_info, tools) = match handshake {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            let stderr_ctx = read_stderr_on_failure(stderr_handle).await;
            let _ = child.kill().await;
            return Err(McpError::InitFailed {
                name: name.to_string(),
                reason: format!("{e}{}", format_stderr_suffix(&stderr_ctx)),
            });
        }
        Err(_) => {
            let _ = child.kill().await;
            let stderr_ctx = read_stderr_on_failure(stderr_handle).await;
            return Err(McpError::InitFailed {
                name: name.to_string(),
                reason: format!(
                    "initialization timed out after {}s{}",
                    INIT_TIMEOUT.as_secs(),
                    format_stderr_suffix(&stderr_ctx)
                ),
            });
        }
    };

    if let Some(stderr) = stderr_handle {
        forward_stderr(name.to_string(), stderr);
    }

    tracing::info!(
        server = name,
        info = %server_info,
        tools = tools.len(),
        "MCP server initialized"
    );

    Ok(ManagedServer {
        name: name.to_string(),
        process: child,
        transport,
        tools,
        server_info,
        restart_count: 0,
    })
}

/// Relay a running server's stderr into our log so the pipe never fills.
fn forward_stderr(server: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, "{line}");
        }
    });
}

/// Read any available stderr output from a failed server process.
///
/// Bounded by a short timeout and truncated to 2000 chars.
async fn read_stderr_on_failure(stderr_handle: Option<ChildStderr>) -> String {
    use tokio::io::AsyncReadExt;

    let Some(mut stderr) = stderr_handle else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(Duration::from_millis(500), stderr.read_to_string(&mut buf)).await
    {
        Ok(Ok(_)) => {
            if buf.len() > 2000 {
                let mut cut = 2000;
                while !buf.is_char_boundary(cut) {
                    cut -= 1;
                }
                buf.truncate(cut);
                buf.push_str("...(truncated)");
            }
            buf
        }
        _ => String::new(),
    }
}

fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

/// MCP handshake: `initialize`, `notifications/initialized`, `tools/list`.
async fn initialize(
    transport: &StdioTransport,
    server_name: &str,
) -> Result<(String, Vec<McpToolDefinition>), McpError> {
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    let response = transport.request("initialize", Some(params)).await?;
    let init: InitializeResult =
        serde_json::from_value(extract_result(response)?).map_err(|e| McpError::InitFailed {
            name: server_name.to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    if init.protocol_version != PROTOCOL_VERSION {
        tracing::debug!(
            server = server_name,
            server_version = %init.protocol_version,
            "server negotiated a different protocol version"
        );
    }

    transport.notify("notifications/initialized", None).await?;

    let response = transport.request("tools/list", None).await?;
    let listed: ListToolsResult =
        serde_json::from_value(extract_result(response)?).map_err(|e| McpError::InitFailed {
            name: server_name.to_string(),
            reason: format!("failed to parse tools/list response: {e}"),
        })?;

    let info = format!("{} {}", init.server_info.name, init.server_info.version);
    Ok((info, listed.tools))
}

/// Restart a crashed server with exponential backoff (1s, 2s, 4s).
pub async fn restart_server(
    name: &str,
    config: &ServerConfig,
    working_dir: Option<&str>,
    current_restart_count: u32,
) -> Result<ManagedServer, McpError> {
    if current_restart_count >= MAX_RESTART_ATTEMPTS {
        return Err(McpError::RestartExhausted {
            name: name.to_string(),
            attempts: MAX_RESTART_ATTEMPTS,
        });
    }

    let delay = restart_delay(current_restart_count);
    tracing::warn!(
        server = name,
        attempt = current_restart_count + 1,
        delay_ms = delay.as_millis() as u64,
        "restarting MCP server"
    );
    sleep(delay).await;

    let mut server = spawn_server(name, config, working_dir).await?;
    server.restart_count = current_restart_count + 1;
    Ok(server)
}

fn restart_delay(restart_count: u32) -> Duration {
    RESTART_BASE_DELAY * 2u32.pow(restart_count)
}

// ─── Batch Operations ────────────────────────────────────────────────────────

/// Spawn all configured servers concurrently.
///
/// Servers that fail to start are returned as errors; partial startup is
/// acceptable.
pub async fn spawn_all_servers(
    configs: &HashMap<String, ServerConfig>,
    working_dir: Option<&str>,
) -> (HashMap<String, ManagedServer>, Vec<(String, McpError)>) {
    let mut servers = HashMap::new();
    let mut errors = Vec::new();

    let mut handles = Vec::new();
    for (name, config) in configs {
        let name = name.clone();
        let config = config.clone();
        let wd = working_dir.map(|s| s.to_string());
        handles.push((
            name.clone(),
            tokio::spawn(async move { spawn_server(&name, &config, wd.as_deref()).await }),
        ));
    }

    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(server)) => {
                servers.insert(name, server);
            }
            Ok(Err(e)) => errors.push((name, e)),
            Err(e) => {
                errors.push((
                    name.clone(),
                    McpError::SpawnFailed {
                        name,
                        reason: format!("join error: {e}"),
                    },
                ));
            }
        }
    }

    (servers, errors)
}

/// Shut down all managed servers gracefully.
pub async fn shutdown_all_servers(servers: &mut HashMap<String, ManagedServer>) {
    for server in servers.values_mut() {
        server.shutdown().await;
    }
    servers.clear();
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_delay_doubles() {
        assert_eq!(restart_delay(0), Duration::from_secs(1));
        assert_eq!(restart_delay(1), Duration::from_secs(2));
        assert_eq!(restart_delay(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_restart_exhausted_after_max_attempts() {
        let config = ServerConfig {
            command: "unused".into(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
        };
        let err = restart_server("math", &config, None, MAX_RESTART_ATTEMPTS)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::RestartExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let config = ServerConfig {
            command: "definitely-not-a-real-mcp-server-binary".into(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
        };
        let err = spawn_server("ghost", &config, None).await.err().unwrap();
        assert!(matches!(err, McpError::SpawnFailed { .. }));
    }

    #[test]
    fn test_stderr_suffix() {
        assert_eq!(format_stderr_suffix("  \n"), "");
        assert_eq!(format_stderr_suffix("boom\n"), " | stderr: boom");
    }
}
