//! Agent: the tool-using chat loop behind each turn.
//!
//! Submodules:
//! - `react`: the ReAct loop driving model rounds and tool calls
//! - `accumulator`: rebuilds assistant messages from streamed chunks
//! - `tools`: the `ToolHost` seam, implemented by the MCP client
//! - `session`: per-session conversation history
//! - `errors`: agent-level error types

pub mod accumulator;
pub mod errors;
pub mod react;
pub mod session;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use accumulator::{AssistantTurn, ToolCall, TurnAccumulator};
pub use errors::AgentError;
pub use react::{Agent, MAX_ROUNDS, SYSTEM_PROMPT};
pub use session::{SessionHandle, SessionStore};
pub use tools::{ToolHost, ToolOutcome};
