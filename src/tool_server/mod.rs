//! Arithmetic MCP tool server.
//!
//! Registers `add`, `subtract`, `multiply` and `divide` and serves them over
//! line-delimited JSON-RPC on stdio. Used by the `math-server` binary.

pub mod arithmetic;
pub mod errors;
pub mod server;

pub use arithmetic::{Number, Operation};
pub use errors::ToolError;
pub use server::ToolServer;
