//! MCP Client: high-level interface for tool execution.
//!
//! Owns the running servers and the aggregated tool registry, and routes
//! `tools/call` requests to whichever server advertised the tool.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::errors::McpError;
use super::lifecycle;
use super::registry::ToolRegistry;
use super::types::{McpServersConfig, ServerConfig, ServerStatus, ToolCallResult};
use crate::protocol::CallToolResult;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default timeout for tool call execution (ms).
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

// ─── McpClient ───────────────────────────────────────────────────────────────

/// High-level MCP client that manages multiple servers and routes tool calls.
pub struct McpClient {
    servers: HashMap<String, lifecycle::ManagedServer>,
    /// Server configurations (for restarts).
    configs: HashMap<String, ServerConfig>,
    /// Aggregated tool definitions from all servers.
    pub registry: ToolRegistry,
    working_dir: Option<String>,
    call_timeout_ms: u64,
}

impl McpClient {
    pub fn new(config: McpServersConfig, working_dir: Option<String>) -> Self {
        Self {
            servers: HashMap::new(),
            configs: config.servers,
            registry: ToolRegistry::new(),
            working_dir,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }

    /// Set the tool call timeout in milliseconds.
    pub fn set_call_timeout(&mut self, timeout_ms: u64) {
        self.call_timeout_ms = timeout_ms;
    }

    pub fn call_timeout_ms(&self) -> u64 {
        self.call_timeout_ms
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start all configured servers and build the tool registry.
    ///
    /// Returns the servers that failed to start (partial startup is OK).
    pub async fn start_all(&mut self) -> Vec<(String, McpError)> {
        let (servers, errors) =
            lifecycle::spawn_all_servers(&self.configs, self.working_dir.as_deref()).await;

        for (name, server) in &servers {
            self.registry.register_server_tools(name, server.tools.clone());
        }

        self.servers.extend(servers);
        errors
    }

    /// Start a configured server by name.
    pub async fn start_server(&mut self, name: &str) -> Result<(), McpError> {
        let config = self.configs.get(name).ok_or(McpError::ConfigError {
            reason: format!("no configuration for server '{name}'"),
        })?;

        let server = lifecycle::spawn_server(name, config, self.working_dir.as_deref()).await?;

        self.registry.register_server_tools(name, server.tools.clone());
        self.servers.insert(name.to_string(), server);

        Ok(())
    }

    /// Add a server at runtime and start it.
    ///
    /// An already-running server with the same name is shut down first. On
    /// failure the configuration is dropped again.
    pub async fn connect(&mut self, name: &str, config: ServerConfig) -> Result<Vec<String>, McpError> {
        if self.servers.contains_key(name) {
            tracing::info!(server = name, "reconnecting MCP server");
            self.shutdown_server(name).await;
        }

        self.configs.insert(name.to_string(), config);
        if let Err(e) = self.start_server(name).await {
            self.configs.remove(name);
            return Err(e);
        }

        Ok(self.registry.tools_for_server(name))
    }

    /// Stop a server and forget its configuration.
    pub async fn disconnect(&mut self, name: &str) -> Result<(), McpError> {
        if !self.configs.contains_key(name) && !self.servers.contains_key(name) {
            return Err(McpError::ConfigError {
                reason: format!("no server named '{name}'"),
            });
        }
        self.shutdown_server(name).await;
        self.configs.remove(name);
        tracing::info!(server = name, "disconnected MCP server");
        Ok(())
    }

    /// Shut down all servers gracefully.
    pub async fn shutdown_all(&mut self) {
        lifecycle::shutdown_all_servers(&mut self.servers).await;
        self.registry = ToolRegistry::new();
    }

    /// Shut down a specific server, keeping its configuration.
    pub async fn shutdown_server(&mut self, name: &str) {
        if let Some(mut server) = self.servers.remove(name) {
            server.shutdown().await;
        }
        self.registry.unregister_server(name);
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Execute a tool call, routing to the appropriate server.
    ///
    /// A JSON-RPC error from the server becomes an unsuccessful
    /// `ToolCallResult`; transport failures surface as `ServerCrashed`.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        let start = Instant::now();

        self.registry.validate_tool_call(tool_name, &arguments)?;

        let server_name = self
            .registry
            .get_server_for_tool(tool_name)
            .ok_or(McpError::UnknownTool {
                name: tool_name.to_string(),
            })?
            .to_string();

        let server = self
            .servers
            .get(&server_name)
            .ok_or(McpError::ServerCrashed {
                name: server_name.clone(),
                reason: "server not running".into(),
            })?;

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let response = tokio::time::timeout(
            Duration::from_millis(self.call_timeout_ms),
            server.transport.request("tools/call", Some(params)),
        )
        .await
        .map_err(|_| McpError::Timeout {
            tool: tool_name.to_string(),
            timeout_ms: self.call_timeout_ms,
        })?
        .map_err(|e| match e {
            McpError::TransportError { .. } => McpError::ServerCrashed {
                name: server_name.clone(),
                reason: e.to_string(),
            },
            other => other,
        })?;

        let elapsed = start.elapsed().as_millis() as u64;

        match super::transport::extract_result(response) {
            Ok(value) => {
                let result: CallToolResult =
                    serde_json::from_value(value).map_err(|e| McpError::TransportError {
                        server: server_name.clone(),
                        reason: format!("malformed tools/call result: {e}"),
                    })?;
                tracing::debug!(
                    tool = tool_name,
                    server = %server_name,
                    is_error = result.is_error,
                    elapsed_ms = elapsed,
                    "tool call completed"
                );
                Ok(ToolCallResult {
                    tool_name: tool_name.to_string(),
                    success: !result.is_error,
                    content: result.text(),
                    structured: result.structured_content,
                    execution_time_ms: elapsed,
                })
            }
            Err(McpError::ServerError { code, message, .. }) => Ok(ToolCallResult {
                tool_name: tool_name.to_string(),
                success: false,
                content: format!("[{code}] {message}"),
                structured: None,
                execution_time_ms: elapsed,
            }),
            Err(e) => Err(e),
        }
    }

    /// Restart a crashed server and re-register its tools.
    pub async fn restart_server(&mut self, name: &str) -> Result<(), McpError> {
        let config = self.configs.get(name).ok_or(McpError::ConfigError {
            reason: format!("no configuration for server '{name}'"),
        })?;

        let restart_count = self
            .servers
            .get(name)
            .map(|s| s.restart_count())
            .unwrap_or(0);

        self.registry.unregister_server(name);
        if let Some(mut old) = self.servers.remove(name) {
            old.shutdown().await;
        }

        let server =
            lifecycle::restart_server(name, config, self.working_dir.as_deref(), restart_count)
                .await?;

        self.registry.register_server_tools(name, server.tools.clone());
        self.servers.insert(name.to_string(), server);

        Ok(())
    }

    /// Name of the server that owns `tool_name`, if any.
    pub fn server_for_tool(&self, tool_name: &str) -> Option<String> {
        self.registry.get_server_for_tool(tool_name).map(String::from)
    }

    // ─── Status ──────────────────────────────────────────────────────────

    pub fn running_server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn tool_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_server_running(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    /// Names of all configured servers (including those that failed to start), sorted.
    pub fn configured_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Status of every configured server.
    pub fn status(&self) -> Vec<ServerStatus> {
        self.configured_servers()
            .into_iter()
            .map(|name| ServerStatus {
                running: self.is_server_running(&name),
                tools: self.registry.tools_for_server(&name),
                name,
            })
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
