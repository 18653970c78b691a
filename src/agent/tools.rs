//! The agent's view of the tool ecosystem.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;

use crate::inference::ToolSpec;
use crate::mcp_client::McpClient;

/// Result of one tool execution, as fed back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn error(tool_name: &str, reason: impl std::fmt::Display) -> Self {
        Self {
            content: format!("Error executing tool {tool_name}: {reason}"),
            is_error: true,
        }
    }
}

/// Anything that can list and execute tools.
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Tools currently available to the model.
    async fn tool_specs(&self) -> Vec<ToolSpec>;

    /// Execute a tool. Failures are reported in the outcome, never raised,
    /// so the model can react to them.
    async fn call(&self, name: &str, arguments: Value) -> ToolOutcome;
}

#[async_trait]
impl ToolHost for TokioMutex<McpClient> {
    async fn tool_specs(&self) -> Vec<ToolSpec> {
        let client = self.lock().await;
        client
            .registry
            .all_tools()
            .into_iter()
            .map(|tool| ToolSpec {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema.clone(),
            })
            .collect()
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolOutcome {
        let mut client = self.lock().await;

        let mut result = client.call_tool(name, arguments.clone()).await;

        // One restart-and-retry for crashed servers
        if let Err(e) = &result {
            if e.is_retriable() {
                if let Some(server) = client.server_for_tool(name) {
                    tracing::warn!(tool = name, server = %server, error = %e, "tool call failed, restarting server");
                    result = match client.restart_server(&server).await {
                        Ok(()) => client.call_tool(name, arguments).await,
                        Err(restart_err) => Err(restart_err),
                    };
                }
            }
        }

        match result {
            Ok(r) => {
                tracing::info!(
                    tool = name,
                    success = r.success,
                    elapsed_ms = r.execution_time_ms,
                    "tool executed"
                );
                ToolOutcome {
                    content: r.content,
                    is_error: !r.success,
                }
            }
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool call failed");
                ToolOutcome::error(name, e)
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::types::McpServersConfig;
    use crate::protocol::McpToolDefinition;
    use serde_json::json;

    #[tokio::test]
    async fn test_tool_specs_come_from_registry() {
        let mut client = McpClient::new(McpServersConfig::default(), None);
        client.registry.register_server_tools(
            "math",
            vec![McpToolDefinition {
                name: "add".into(),
                description: "Use this tool to add two numbers together.".into(),
                input_schema: json!({"type": "object", "required": ["a", "b"]}),
                output_schema: None,
            }],
        );
        let host = TokioMutex::new(client);

        let specs = host.tool_specs().await;
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "add");
        assert_eq!(specs[0].input_schema["required"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error_outcome() {
        let host = TokioMutex::new(McpClient::new(McpServersConfig::default(), None));
        let outcome = host.call("add", json!({"a": 1, "b": 2})).await;
        assert!(outcome.is_error);
        assert!(outcome.content.starts_with("Error executing tool add:"));
    }

    #[tokio::test]
    async fn test_registered_tool_without_running_server_is_an_error_outcome() {
        let mut client = McpClient::new(McpServersConfig::default(), None);
        client.registry.register_server_tools(
            "math",
            vec![McpToolDefinition {
                name: "add".into(),
                description: String::new(),
                input_schema: json!({"type": "object"}),
                output_schema: None,
            }],
        );
        let host = TokioMutex::new(client);
        // ServerCrashed is retriable, but the restart has no config to use
        let outcome = host.call("add", json!({})).await;
        assert!(outcome.is_error);
    }
}
