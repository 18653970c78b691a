//! AWS Bedrock backend (Converse streaming API).
//!
//! The runtime client is configured with adaptive retries and a read
//! timeout. Credentials come from the standard AWS provider chain.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_bedrockruntime::error::DisplayErrorContext;
use aws_sdk_bedrockruntime::types as bedrock;
use aws_sdk_bedrockruntime::Client;
use aws_smithy_types::{Document, Number as DocumentNumber};
use futures::stream;
use serde_json::Value;

use super::config::{InferenceConfig, ModelSettings, ThinkingConfig};
use super::errors::InferenceError;
use super::model::ChatModel;
use super::types::{
    ChatRequest, ContentBlock, Message, ModelChunk, ModelStream, Role, StopReason, TokenUsage,
    ToolSpec,
};
use crate::stream::{ReasoningChunk, StreamEvent};

const PROVIDER: &str = "bedrock";

// ─── BedrockModel ────────────────────────────────────────────────────────────

pub struct BedrockModel {
    client: Client,
    model_id: String,
    inference: InferenceConfig,
    thinking: Option<ThinkingConfig>,
}

impl BedrockModel {
    pub async fn from_settings(settings: &ModelSettings) -> Self {
        let bedrock_settings = &settings.bedrock;
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(bedrock_settings.region.clone()))
            .retry_config(RetryConfig::adaptive().with_max_attempts(bedrock_settings.max_attempts))
            .timeout_config(
                TimeoutConfig::builder()
                    .read_timeout(Duration::from_secs(bedrock_settings.read_timeout_secs))
                    .build(),
            )
            .load()
            .await;

        Self {
            client: Client::new(&sdk_config),
            model_id: bedrock_settings.model_id(settings.model),
            inference: settings.inference,
            thinking: settings.thinking,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[async_trait]
impl ChatModel for BedrockModel {
    async fn stream(&self, request: ChatRequest) -> Result<ModelStream, InferenceError> {
        let messages = request
            .messages
            .iter()
            .map(to_bedrock_message)
            .collect::<Result<Vec<_>, _>>()?;

        let inference = bedrock::InferenceConfiguration::builder()
            .max_tokens(i32::try_from(self.inference.max_tokens).unwrap_or(i32::MAX))
            .temperature(self.inference.temperature)
            .build();

        let mut call = self
            .client
            .converse_stream()
            .model_id(&self.model_id)
            .set_messages(Some(messages))
            .inference_config(inference);

        if let Some(system) = &request.system {
            call = call.system(bedrock::SystemContentBlock::Text(system.clone()));
        }
        if !request.tools.is_empty() {
            call = call.tool_config(tool_configuration(&request.tools)?);
        }
        if let Some(thinking) = &self.thinking {
            let fields = serde_json::json!({ "thinking": thinking.to_json() });
            call = call.additional_model_request_fields(json_to_document(&fields));
        }

        tracing::info!(
            model_id = %self.model_id,
            message_count = request.messages.len(),
            tool_count = request.tools.len(),
            max_tokens = self.inference.max_tokens,
            thinking = self.thinking.is_some(),
            "bedrock converse_stream request"
        );

        let output = call.send().await.map_err(|e| InferenceError::ServiceError {
            provider: PROVIDER,
            reason: DisplayErrorContext(&e).to_string(),
        })?;

        let events = stream::unfold(
            (output.stream, VecDeque::new(), false),
            |(mut receiver, mut pending, mut done)| async move {
                loop {
                    if let Some(chunk) = pending.pop_front() {
                        return Some((Ok(chunk), (receiver, pending, done)));
                    }
                    if done {
                        return None;
                    }
                    match receiver.recv().await {
                        Ok(Some(event)) => pending.extend(map_stream_output(event)),
                        Ok(None) => return None,
                        Err(e) => {
                            done = true;
                            let err = InferenceError::StreamError {
                                reason: DisplayErrorContext(&e).to_string(),
                            };
                            return Some((Err(err), (receiver, pending, done)));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(events))
    }

    fn describe(&self) -> String {
        format!("bedrock ({})", self.model_id)
    }
}

// ─── Stream event mapping ────────────────────────────────────────────────────

/// Map one ConverseStream event to model chunks.
fn map_stream_output(event: bedrock::ConverseStreamOutput) -> Vec<ModelChunk> {
    use bedrock::ConverseStreamOutput as Out;

    match event {
        Out::ContentBlockStart(start) => {
            let index = block_index(start.content_block_index());
            match start.start() {
                Some(bedrock::ContentBlockStart::ToolUse(tool)) => {
                    vec![ModelChunk::Event(StreamEvent::ToolUse {
                        index,
                        id: Some(tool.tool_use_id().to_string()),
                        name: Some(tool.name().to_string()),
                        input: None,
                    })]
                }
                _ => Vec::new(),
            }
        }
        Out::ContentBlockDelta(delta) => {
            let index = block_index(delta.content_block_index());
            match delta.delta() {
                Some(bedrock::ContentBlockDelta::Text(text)) => {
                    vec![ModelChunk::Event(StreamEvent::Text {
                        index,
                        text: text.clone(),
                    })]
                }
                Some(bedrock::ContentBlockDelta::ToolUse(tool)) => {
                    vec![ModelChunk::Event(StreamEvent::ToolUse {
                        index,
                        id: None,
                        name: None,
                        input: Some(tool.input().to_string()),
                    })]
                }
                Some(bedrock::ContentBlockDelta::ReasoningContent(reasoning)) => match reasoning {
                    bedrock::ReasoningContentBlockDelta::Text(text) => {
                        vec![ModelChunk::Event(StreamEvent::Reasoning(
                            ReasoningChunk::Text(text.clone()),
                        ))]
                    }
                    bedrock::ReasoningContentBlockDelta::Signature(signature) => {
                        vec![ModelChunk::Event(StreamEvent::Reasoning(
                            ReasoningChunk::Signature(signature.clone()),
                        ))]
                    }
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            }
        }
        Out::MessageStop(stop) => vec![ModelChunk::Stop(StopReason::from_provider(
            stop.stop_reason().as_str(),
        ))],
        Out::Metadata(metadata) => metadata
            .usage()
            .map(|usage| {
                vec![ModelChunk::Usage(TokenUsage {
                    input_tokens: usage.input_tokens().max(0) as u64,
                    output_tokens: usage.output_tokens().max(0) as u64,
                })]
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn block_index(index: i32) -> usize {
    usize::try_from(index).unwrap_or(0)
}

// ─── Request encoding ────────────────────────────────────────────────────────

fn build_error(e: impl std::fmt::Display) -> InferenceError {
    InferenceError::RequestBuild {
        reason: e.to_string(),
    }
}

fn to_bedrock_message(message: &Message) -> Result<bedrock::Message, InferenceError> {
    let role = match message.role {
        Role::User => bedrock::ConversationRole::User,
        Role::Assistant => bedrock::ConversationRole::Assistant,
    };

    let mut content = Vec::with_capacity(message.content.len());
    for block in &message.content {
        let converted = match block {
            // Converse rejects blank text blocks
            ContentBlock::Text { text } if text.trim().is_empty() => continue,
            ContentBlock::Text { text } => bedrock::ContentBlock::Text(text.clone()),
            ContentBlock::Reasoning { text, signature } => {
                let reasoning = bedrock::ReasoningTextBlock::builder()
                    .text(text)
                    .set_signature(signature.clone())
                    .build()
                    .map_err(build_error)?;
                bedrock::ContentBlock::ReasoningContent(
                    bedrock::ReasoningContentBlock::ReasoningText(reasoning),
                )
            }
            ContentBlock::ToolUse { id, name, input } => bedrock::ContentBlock::ToolUse(
                bedrock::ToolUseBlock::builder()
                    .tool_use_id(id)
                    .name(name)
                    .input(json_to_document(input))
                    .build()
                    .map_err(build_error)?,
            ),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let status = if *is_error {
                    bedrock::ToolResultStatus::Error
                } else {
                    bedrock::ToolResultStatus::Success
                };
                bedrock::ContentBlock::ToolResult(
                    bedrock::ToolResultBlock::builder()
                        .tool_use_id(tool_use_id)
                        .content(bedrock::ToolResultContentBlock::Text(content.clone()))
                        .status(status)
                        .build()
                        .map_err(build_error)?,
                )
            }
        };
        content.push(converted);
    }

    bedrock::Message::builder()
        .role(role)
        .set_content(Some(content))
        .build()
        .map_err(build_error)
}

fn tool_configuration(tools: &[ToolSpec]) -> Result<bedrock::ToolConfiguration, InferenceError> {
    let specs = tools
        .iter()
        .map(|tool| {
            bedrock::ToolSpecification::builder()
                .name(&tool.name)
                .description(&tool.description)
                .input_schema(bedrock::ToolInputSchema::Json(json_to_document(
                    &tool.input_schema,
                )))
                .build()
                .map(bedrock::Tool::ToolSpec)
                .map_err(build_error)
        })
        .collect::<Result<Vec<_>, _>>()?;

    bedrock::ToolConfiguration::builder()
        .set_tools(Some(specs))
        .build()
        .map_err(build_error)
}

/// Convert JSON into a Smithy document.
pub fn json_to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(*b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Document::Number(DocumentNumber::PosInt(u))
            } else if let Some(i) = n.as_i64() {
                Document::Number(DocumentNumber::NegInt(i))
            } else {
                Document::Number(DocumentNumber::Float(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        Value::String(s) => Document::String(s.clone()),
        Value::Array(items) => Document::Array(items.iter().map(json_to_document).collect()),
        Value::Object(map) => Document::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_document(v)))
                .collect(),
        ),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
