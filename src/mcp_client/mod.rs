//! MCP Client: JSON-RPC over stdio transport for MCP server management.
//!
//! This module handles:
//! - Spawning and managing MCP server child processes
//! - The `initialize` / `tools/list` handshake
//! - Tool aggregation across servers and `tools/call` routing
//! - Server lifecycle (connect, restart with backoff, graceful shutdown)

pub mod client;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use errors::McpError;
pub use registry::ToolRegistry;
pub use types::{McpServersConfig, McpToolDefinition, ServerConfig, ServerStatus, ToolCallResult};
