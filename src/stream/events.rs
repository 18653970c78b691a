//! Streamed agent events consumed by the dispatcher.
//!
//! Model backends and the agent loop produce `StreamEvent`s directly. For
//! content that arrives as loosely-typed JSON (message content items), use
//! [`StreamEvent::from_content_item`].

use serde_json::Value;

use super::errors::DispatchError;

/// A chunk of model "thinking".
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningChunk {
    Text(String),
    /// Closes the current reasoning block.
    Signature(String),
}

/// One event in an interleaved agent response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text for the content block at `index`.
    Text { index: usize, text: String },
    Reasoning(ReasoningChunk),
    /// A tool-call chunk. The name usually appears only on the first chunk
    /// for an index; `input` carries partial JSON arguments.
    ToolUse {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        input: Option<String>,
    },
    /// The result of an executed tool call.
    ToolOutput {
        content: String,
        tool_name: Option<String>,
    },
    EndTurn,
}

impl StreamEvent {
    /// Decode a message content item.
    ///
    /// Accepted shapes (`index` defaults to 0 where omitted):
    /// - `{"type": "text", "text", "index"}`
    /// - `{"type": "reasoning_content", "reasoning_content": {"type": "text", "text"}}`
    ///   or `{... {"type": "signature", "signature"}}`
    /// - `{"type": "tool_use", "index", "id"?, "name"?, "input"?}`
    /// - `{"type": "tool_output", "content", "name"?}`
    /// - `{"type": "end_turn"}`
    pub fn from_content_item(item: &Value) -> Result<Self, DispatchError> {
        let kind = str_field(item, "type")?;
        let index = || -> Result<usize, DispatchError> {
            match item.get("index") {
                None | Some(Value::Null) => Ok(0),
                Some(v) => v
                    .as_u64()
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(|| DispatchError::malformed("'index' is not a valid block index")),
            }
        };

        match kind {
            "text" => Ok(StreamEvent::Text {
                index: index()?,
                text: str_field(item, "text")?.to_string(),
            }),
            "reasoning_content" => {
                let reasoning = item
                    .get("reasoning_content")
                    .ok_or_else(|| DispatchError::malformed("missing 'reasoning_content'"))?;
                match str_field(reasoning, "type")? {
                    "text" => Ok(StreamEvent::Reasoning(ReasoningChunk::Text(
                        str_field(reasoning, "text")?.to_string(),
                    ))),
                    "signature" => Ok(StreamEvent::Reasoning(ReasoningChunk::Signature(
                        str_field(reasoning, "signature")?.to_string(),
                    ))),
                    other => Err(DispatchError::malformed(format!(
                        "unknown reasoning_content type '{other}'"
                    ))),
                }
            }
            "tool_use" => Ok(StreamEvent::ToolUse {
                index: index()?,
                id: opt_str(item, "id"),
                name: opt_str(item, "name"),
                input: match item.get("input") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    // Fully-formed argument objects are re-serialized.
                    Some(other) => Some(other.to_string()),
                },
            }),
            "tool_output" => Ok(StreamEvent::ToolOutput {
                content: str_field(item, "content")?.to_string(),
                tool_name: opt_str(item, "name"),
            }),
            "end_turn" => Ok(StreamEvent::EndTurn),
            other => Err(DispatchError::malformed(format!(
                "unknown content item type '{other}'"
            ))),
        }
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Text { .. } => "text",
            StreamEvent::Reasoning(_) => "reasoning",
            StreamEvent::ToolUse { .. } => "tool_use",
            StreamEvent::ToolOutput { .. } => "tool_output",
            StreamEvent::EndTurn => "end_turn",
        }
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Result<&'a str, DispatchError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::malformed(format!("missing string field '{key}'")))
}

fn opt_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
