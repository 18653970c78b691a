//! Tool server error types.

use thiserror::Error;

/// Errors raised while executing an arithmetic tool.
///
/// These are reported in-band to the MCP caller (`isError: true`), never as
/// JSON-RPC protocol errors.
#[derive(Debug, Error, PartialEq)]
pub enum ToolError {
    /// A tool argument is outside the operation's domain (e.g. a zero divisor).
    #[error("{reason}")]
    InvalidArgument { reason: String },

    /// The call arguments did not match the tool's input schema.
    #[error("invalid arguments: {reason}")]
    InvalidParams { reason: String },
}

impl ToolError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        ToolError::InvalidArgument {
            reason: reason.into(),
        }
    }
}
