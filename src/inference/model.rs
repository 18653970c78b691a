//! The backend-neutral chat model interface.

use std::sync::Arc;

use async_trait::async_trait;

use super::bedrock::BedrockModel;
use super::config::{Backend, ModelSettings};
use super::databricks::DatabricksModel;
use super::errors::InferenceError;
use super::types::{ChatRequest, ModelStream};

/// A streaming chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a completion. Errors before the first chunk (connection, HTTP
    /// status, request encoding) are returned here; later ones arrive in
    /// the stream.
    async fn stream(&self, request: ChatRequest) -> Result<ModelStream, InferenceError>;

    /// Human-readable backend label for logs and the config endpoint.
    fn describe(&self) -> String;
}

/// Build the configured backend. Settings are validated first.
pub async fn build_chat_model(
    settings: &ModelSettings,
) -> Result<Arc<dyn ChatModel>, InferenceError> {
    settings.validate()?;
    let model: Arc<dyn ChatModel> = match settings.backend {
        Backend::Bedrock => Arc::new(BedrockModel::from_settings(settings).await),
        Backend::Databricks => Arc::new(DatabricksModel::from_settings(settings)?),
    };
    tracing::info!(backend = %model.describe(), model = ?settings.model, "chat model ready");
    Ok(model)
}
