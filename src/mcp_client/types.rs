//! Configuration and result types for the MCP client.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use crate::protocol::McpToolDefinition;

/// How to launch one MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-server working directory (overrides the global working_dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// The set of servers the client may start, keyed by server name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpServersConfig {
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
}

/// Result of a tool call execution.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    pub tool_name: String,
    /// False when the server reported `isError` or a JSON-RPC error.
    pub success: bool,
    /// Text content of the result (or the error message).
    pub content: String,
    /// `structuredContent`, when the server provided it.
    pub structured: Option<serde_json::Value>,
    pub execution_time_ms: u64,
}

/// Snapshot of one server for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub running: bool,
    pub tools: Vec<String>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"command": "math-server"}"#).unwrap();
        assert!(config.args.is_empty());
        assert!(config.env.is_empty());
        assert!(config.cwd.is_none());
    }

    #[test]
    fn test_servers_config_from_yaml() {
        let yaml = "servers:\n  math:\n    command: uv\n    args: [run, server.py]\n";
        let config: McpServersConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.servers["math"].args, vec!["run", "server.py"]);
    }
}
