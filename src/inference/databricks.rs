//! Databricks model-serving backend.
//!
//! Speaks the OpenAI-compatible chat-completions API exposed at
//! `{host}/serving-endpoints/{endpoint}/invocations`. Claude endpoints stream
//! reasoning as structured content parts inside `delta.content`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};

use super::config::{InferenceConfig, ModelSettings, ThinkingConfig};
use super::errors::InferenceError;
use super::model::ChatModel;
use super::streaming::{parse_sse_stream, SseDecoder};
use super::types::{
    ChatRequest, ContentBlock, Message, ModelChunk, ModelStream, Role, StopReason, TokenUsage,
    ToolSpec,
};
use crate::stream::{ReasoningChunk, StreamEvent};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for streaming calls.
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Text always streams at this index; tool call `i` at `i + 1`.
const TEXT_INDEX: usize = 0;

// ─── DatabricksModel ─────────────────────────────────────────────────────────

pub struct DatabricksModel {
    http: HttpClient,
    url: String,
    token: String,
    inference: InferenceConfig,
    thinking: Option<ThinkingConfig>,
}

impl DatabricksModel {
    pub fn from_settings(settings: &ModelSettings) -> Result<Self, InferenceError> {
        let url = settings.databricks.invocations_url(settings.model);
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(STREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: url.clone(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            url,
            token: settings.databricks.token.clone(),
            inference: settings.inference,
            thinking: settings.thinking,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        build_request_body(request, &self.inference, self.thinking.as_ref())
    }
}

#[async_trait]
impl ChatModel for DatabricksModel {
    async fn stream(&self, request: ChatRequest) -> Result<ModelStream, InferenceError> {
        let body = self.request_body(&request);

        tracing::info!(
            url = %self.url,
            message_count = request.messages.len(),
            tool_count = request.tools.len(),
            max_tokens = self.inference.max_tokens,
            thinking = self.thinking.is_some(),
            "databricks request"
        );

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&body)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout {
                        duration_secs: STREAM_REQUEST_TIMEOUT.as_secs(),
                    }
                } else {
                    InferenceError::ConnectionFailed {
                        endpoint: self.url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(Box::pin(parse_sse_stream(response, ChunkDecoder::default())))
    }

    fn describe(&self) -> String {
        format!("databricks ({})", self.url)
    }
}

// ─── Request encoding ────────────────────────────────────────────────────────

/// Build the chat-completions request body.
pub fn build_request_body(
    request: &ChatRequest,
    inference: &InferenceConfig,
    thinking: Option<&ThinkingConfig>,
) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    for message in &request.messages {
        encode_message(message, &mut messages);
    }

    let mut body = json!({
        "messages": messages,
        "stream": true,
        "temperature": inference.temperature,
        "max_tokens": inference.max_tokens,
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(encode_tool).collect());
    }
    if let Some(thinking) = thinking {
        body["thinking"] = thinking.to_json();
    }
    body
}

fn encode_tool(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

/// One history message may expand to several wire messages: every tool
/// result becomes its own `tool` role message.
fn encode_message(message: &Message, out: &mut Vec<Value>) {
    match message.role {
        Role::User => {
            let mut text = String::new();
            for block in &message.content {
                match block {
                    ContentBlock::Text { text: t } => text.push_str(t),
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => out.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    })),
                    _ => {}
                }
            }
            if !text.is_empty() {
                out.push(json!({"role": "user", "content": text}));
            }
        }
        Role::Assistant => {
            let mut parts = Vec::new();
            let mut tool_calls = Vec::new();
            for block in &message.content {
                match block {
                    ContentBlock::Reasoning { text, signature } => parts.push(json!({
                        "type": "reasoning",
                        "summary": [{
                            "type": "summary_text",
                            "text": text,
                            "signature": signature,
                        }],
                    })),
                    ContentBlock::Text { text } => {
                        parts.push(json!({"type": "text", "text": text}))
                    }
                    ContentBlock::ToolUse { id, name, input } => tool_calls.push(json!({
                        "id": id,
                        "type": "function",
                        "function": {"name": name, "arguments": input.to_string()},
                    })),
                    ContentBlock::ToolResult { .. } => {}
                }
            }
            let mut wire = json!({"role": "assistant", "content": parts});
            if !tool_calls.is_empty() {
                wire["tool_calls"] = Value::Array(tool_calls);
            }
            out.push(wire);
        }
    }
}

// ─── Chunk decoding ──────────────────────────────────────────────────────────

/// Decodes `chat.completion.chunk` payloads.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    stopped: bool,
}

impl SseDecoder for ChunkDecoder {
    fn decode(&mut self, data: &str) -> Result<Vec<ModelChunk>, InferenceError> {
        let chunk: Value =
            serde_json::from_str(data).map_err(|e| InferenceError::StreamError {
                reason: format!("failed to parse SSE chunk: {e} (data: {data})"),
            })?;

        if let Some(err) = chunk.get("error") {
            return Err(InferenceError::StreamError {
                reason: format!("endpoint reported error: {err}"),
            });
        }

        let mut out = Vec::new();
        if let Some(choice) = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
        {
            if let Some(delta) = choice.get("delta") {
                decode_content(delta.get("content"), &mut out);
                decode_tool_calls(delta.get("tool_calls"), &mut out)?;
            }
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                if !self.stopped {
                    self.stopped = true;
                    out.push(ModelChunk::Stop(StopReason::from_provider(reason)));
                }
            }
        }

        if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
            out.push(ModelChunk::Usage(TokenUsage {
                input_tokens: usage
                    .get("prompt_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                output_tokens: usage
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            }));
        }

        Ok(out)
    }
}

/// `delta.content` is either a plain string or a list of typed parts.
fn decode_content(content: Option<&Value>, out: &mut Vec<ModelChunk>) {
    match content {
        Some(Value::String(text)) if !text.is_empty() => out.push(text_chunk(text)),
        Some(Value::Array(parts)) => {
            for part in parts {
                match part.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            if !text.is_empty() {
                                out.push(text_chunk(text));
                            }
                        }
                    }
                    Some("reasoning") => decode_reasoning(part, out),
                    other => tracing::debug!(part_type = ?other, "ignoring content part"),
                }
            }
        }
        _ => {}
    }
}

fn decode_reasoning(part: &Value, out: &mut Vec<ModelChunk>) {
    let Some(summary) = part.get("summary").and_then(Value::as_array) else {
        return;
    };
    for entry in summary {
        if let Some(text) = entry.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                out.push(ModelChunk::Event(StreamEvent::Reasoning(
                    ReasoningChunk::Text(text.to_string()),
                )));
            }
        }
        if let Some(signature) = entry.get("signature").and_then(Value::as_str) {
            if !signature.is_empty() {
                out.push(ModelChunk::Event(StreamEvent::Reasoning(
                    ReasoningChunk::Signature(signature.to_string()),
                )));
            }
        }
    }
}

/// Tool calls take the slots after the text block. A missing `index` falls
/// back to the call's position in the list.
fn decode_tool_calls(
    tool_calls: Option<&Value>,
    out: &mut Vec<ModelChunk>,
) -> Result<(), InferenceError> {
    let Some(calls) = tool_calls.and_then(Value::as_array) else {
        return Ok(());
    };
    for (position, call) in calls.iter().enumerate() {
        let slot = match call.get("index") {
            None | Some(Value::Null) => Some(position),
            Some(v) => v.as_u64().and_then(|i| usize::try_from(i).ok()),
        }
        .and_then(|slot| slot.checked_add(1))
        .ok_or_else(|| InferenceError::StreamError {
            reason: format!("invalid tool call index: {}", call["index"]),
        })?;
        let function = call.get("function");
        let str_of = |v: Option<&Value>| v.and_then(Value::as_str).map(String::from);
        out.push(ModelChunk::Event(StreamEvent::ToolUse {
            index: slot,
            id: str_of(call.get("id")).filter(|s| !s.is_empty()),
            name: str_of(function.and_then(|f| f.get("name"))).filter(|s| !s.is_empty()),
            input: str_of(function.and_then(|f| f.get("arguments"))),
        }));
    }
    Ok(())
}

fn text_chunk(text: &str) -> ModelChunk {
    ModelChunk::Event(StreamEvent::Text {
        index: TEXT_INDEX,
        text: text.to_string(),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: Value) -> Vec<ModelChunk> {
        ChunkDecoder::default().decode(&data.to_string()).unwrap()
    }

    #[test]
    fn test_plain_string_content_is_index_zero_text() {
        let chunks = decode(json!({"choices": [{"delta": {"content": "Hello"}}]}));
        assert_eq!(chunks, vec![text_chunk("Hello")]);
    }

    #[test]
    fn test_empty_content_emits_nothing() {
        let chunks = decode(json!({"choices": [{"delta": {"role": "assistant", "content": ""}}]}));
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_reasoning_parts_map_to_reasoning_chunks() {
        let chunks = decode(json!({"choices": [{"delta": {"content": [
            {"type": "reasoning", "summary": [{"type": "summary_text", "text": "Let me add"}]},
        ]}}]}));
        assert_eq!(
            chunks,
            vec![ModelChunk::Event(StreamEvent::Reasoning(ReasoningChunk::Text(
                "Let me add".into()
            )))]
        );

        let chunks = decode(json!({"choices": [{"delta": {"content": [
            {"type": "reasoning", "summary": [{"type": "summary_text", "text": "", "signature": "sig=="}]},
        ]}}]}));
        assert_eq!(
            chunks,
            vec![ModelChunk::Event(StreamEvent::Reasoning(
                ReasoningChunk::Signature("sig==".into())
            ))]
        );
    }

    #[test]
    fn test_tool_call_deltas_are_offset_past_text() {
        let first = decode(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "call_1", "type": "function",
             "function": {"name": "add", "arguments": ""}}
        ]}}]}));
        assert_eq!(
            first,
            vec![ModelChunk::Event(StreamEvent::ToolUse {
                index: 1,
                id: Some("call_1".into()),
                name: Some("add".into()),
                input: Some(String::new()),
            })]
        );

        let next = decode(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "{\"a\": 1"}}
        ]}}]}));
        assert_eq!(
            next,
            vec![ModelChunk::Event(StreamEvent::ToolUse {
                index: 1,
                id: None,
                name: None,
                input: Some("{\"a\": 1".into()),
            })]
        );
    }

    #[test]
    fn test_tool_call_without_index_uses_position() {
        let chunks = decode(json!({"choices": [{"delta": {"tool_calls": [
            {"function": {"name": "add"}},
            {"function": {"name": "subtract"}}
        ]}}]}));
        let slots: Vec<usize> = chunks
            .iter()
            .map(|c| match c {
                ModelChunk::Event(StreamEvent::ToolUse { index, .. }) => *index,
                other => panic!("unexpected chunk {other:?}"),
            })
            .collect();
        assert_eq!(slots, vec![1, 2]);
    }

    #[test]
    fn test_bad_tool_call_index_is_stream_error() {
        let mut decoder = ChunkDecoder::default();
        for index in [json!(-1), json!("0"), json!(u64::MAX)] {
            let data = json!({"choices": [{"delta": {"tool_calls": [
                {"index": index, "function": {"name": "add"}}
            ]}}]});
            let result = decoder.decode(&data.to_string());
            assert!(
                matches!(result, Err(InferenceError::StreamError { .. })),
                "index {index} should be rejected"
            );
        }
    }

    #[test]
    fn test_finish_reason_and_usage() {
        let chunks = decode(json!({
            "choices": [{"delta": {}, "finish_reason": "tool_calls"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5}
        }));
        assert_eq!(
            chunks,
            vec![
                ModelChunk::Stop(StopReason::ToolUse),
                ModelChunk::Usage(TokenUsage {
                    input_tokens: 12,
                    output_tokens: 5
                }),
            ]
        );
    }

    #[test]
    fn test_finish_reason_reported_once() {
        let mut decoder = ChunkDecoder::default();
        let data = json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}).to_string();
        assert_eq!(decoder.decode(&data).unwrap().len(), 1);
        assert!(decoder.decode(&data).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_json_and_error_payloads() {
        let mut decoder = ChunkDecoder::default();
        assert!(decoder.decode("{not json").is_err());
        let err = decoder
            .decode(r#"{"error": {"message": "rate limited"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest {
            system: Some("be helpful".into()),
            messages: vec![
                Message::user("what is 1+2?"),
                Message::assistant(vec![
                    ContentBlock::Reasoning {
                        text: "add".into(),
                        signature: Some("sig".into()),
                    },
                    ContentBlock::ToolUse {
                        id: "call_1".into(),
                        name: "add".into(),
                        input: json!({"a": 1, "b": 2}),
                    },
                ]),
                Message::tool_results(vec![ContentBlock::ToolResult {
                    tool_use_id: "call_1".into(),
                    content: "3".into(),
                    is_error: false,
                }]),
            ],
            tools: vec![ToolSpec {
                name: "add".into(),
                description: "Add".into(),
                input_schema: json!({"type": "object"}),
            }],
        };
        let inference = InferenceConfig {
            temperature: 1.0,
            max_tokens: 32768,
        };
        let body = build_request_body(&request, &inference, Some(&ThinkingConfig::default()));

        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 32768);
        assert_eq!(body["thinking"]["budget_tokens"], 1024);
        assert_eq!(body["tools"][0]["function"]["name"], "add");

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "what is 1+2?");
        assert_eq!(messages[2]["content"][0]["summary"][0]["signature"], "sig");
        assert_eq!(
            messages[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"a":1,"b":2}"#
        );
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_request_body_without_tools_or_thinking() {
        let request = ChatRequest {
            system: None,
            messages: vec![Message::user("hi")],
            tools: vec![],
        };
        let inference = InferenceConfig {
            temperature: 0.0,
            max_tokens: 100,
        };
        let body = build_request_body(&request, &inference, None);
        assert!(body.get("tools").is_none());
        assert!(body.get("thinking").is_none());
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }
}
