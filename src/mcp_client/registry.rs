//! Tool registry: aggregates tool definitions across all MCP servers.
//!
//! Tools are registered under the name the server advertises. Model
//! providers restrict tool names to `[a-zA-Z0-9_-]`, so names are not
//! prefixed with the server; on a clash the most recently started server wins.

use std::collections::BTreeMap;

use super::errors::McpError;
use super::types::McpToolDefinition;

/// `tool_name → (server_name, definition)`, ordered by tool name.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, (String, McpToolDefinition)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the tools advertised by a server.
    pub fn register_server_tools(&mut self, server_name: &str, tools: Vec<McpToolDefinition>) {
        for tool in tools {
            if let Some((previous, _)) = self.tools.get(&tool.name) {
                if previous != server_name {
                    tracing::warn!(
                        tool = %tool.name,
                        previous = %previous,
                        server = %server_name,
                        "tool name registered by another server, replacing"
                    );
                }
            }
            self.tools
                .insert(tool.name.clone(), (server_name.to_string(), tool));
        }
    }

    /// Remove all tools belonging to a server.
    pub fn unregister_server(&mut self, server_name: &str) {
        self.tools.retain(|_, (srv, _)| srv != server_name);
    }

    pub fn get_tool(&self, name: &str) -> Option<&McpToolDefinition> {
        self.tools.get(name).map(|(_, def)| def)
    }

    /// Get the server name that owns a tool.
    pub fn get_server_for_tool(&self, tool_name: &str) -> Option<&str> {
        self.tools.get(tool_name).map(|(srv, _)| srv.as_str())
    }

    /// All registered tool definitions, ordered by name.
    pub fn all_tools(&self) -> Vec<&McpToolDefinition> {
        self.tools.values().map(|(_, def)| def).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names of the tools a server contributed.
    pub fn tools_for_server(&self, server_name: &str) -> Vec<String> {
        self.tools
            .iter()
            .filter(|(_, (srv, _))| srv == server_name)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Validate a tool call: tool exists, arguments are an object, and
    /// every required field is present. Type checking is left to the server.
    pub fn validate_tool_call(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<(), McpError> {
        let def = self.get_tool(tool_name).ok_or(McpError::UnknownTool {
            name: tool_name.to_string(),
        })?;

        let args_obj = arguments.as_object().ok_or(McpError::InvalidArguments {
            tool: tool_name.to_string(),
            reason: "arguments must be a JSON object".into(),
        })?;

        let required = def
            .input_schema
            .get("required")
            .and_then(|r| r.as_array())
            .into_iter()
            .flatten()
            .filter_map(|f| f.as_str());

        for field_name in required {
            if !args_obj.contains_key(field_name) {
                return Err(McpError::InvalidArguments {
                    tool: tool_name.to_string(),
                    reason: format!("missing required field: '{field_name}'"),
                });
            }
        }

        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
