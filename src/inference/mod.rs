//! Inference: streaming chat completions from hosted Claude endpoints.
//!
//! Two interchangeable backends sit behind the [`ChatModel`] trait:
//! - `bedrock`: AWS Bedrock ConverseStream via the AWS SDK
//! - `databricks`: Databricks model serving (OpenAI-compatible SSE)
//!
//! Both produce the same [`ModelChunk`] stream, so switching backends is a
//! config change, not a code change.

pub mod bedrock;
pub mod config;
pub mod databricks;
pub mod errors;
pub mod model;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use config::{
    Backend, BedrockSettings, DatabricksSettings, InferenceConfig, ModelId, ModelSettings,
    ThinkingConfig,
};
pub use errors::InferenceError;
pub use model::{build_chat_model, ChatModel};
pub use types::{
    ChatRequest, ContentBlock, Message, ModelChunk, ModelStream, Role, StopReason, TokenUsage,
    ToolSpec,
};
