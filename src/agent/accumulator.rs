//! Rebuilds a complete assistant message from one streamed model round.

use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use crate::inference::{ContentBlock, Message, ModelChunk, StopReason, TokenUsage};
use crate::stream::{ReasoningChunk, StreamEvent};

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed arguments, or the reason they could not be parsed.
    pub arguments: Result<Value, String>,
}

/// Everything one model round produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantTurn {
    pub message: Message,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<StopReason>,
    pub usage: TokenUsage,
}

#[derive(Debug)]
enum BlockBuilder {
    Text(String),
    Tool {
        id: Option<String>,
        name: Option<String>,
        input: String,
    },
}

/// Collects a round's chunks by content-block index.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    blocks: BTreeMap<usize, BlockBuilder>,
    reasoning: Vec<(String, String)>,
    open_reasoning: Option<String>,
    stop_reason: Option<StopReason>,
    usage: TokenUsage,
}

impl TurnAccumulator {
    pub fn push(&mut self, chunk: ModelChunk) {
        match chunk {
            ModelChunk::Event(event) => self.push_event(event),
            ModelChunk::Stop(reason) => self.stop_reason = Some(reason),
            ModelChunk::Usage(usage) => {
                self.usage.input_tokens += usage.input_tokens;
                self.usage.output_tokens += usage.output_tokens;
            }
        }
    }

    fn push_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Text { index, text } => {
                let block = self
                    .blocks
                    .entry(index)
                    .or_insert_with(|| BlockBuilder::Text(String::new()));
                match block {
                    BlockBuilder::Text(buffer) => buffer.push_str(&text),
                    BlockBuilder::Tool { .. } => *block = BlockBuilder::Text(text),
                }
            }
            StreamEvent::ToolUse {
                index,
                id,
                name,
                input,
            } => {
                let block = self.blocks.entry(index).or_insert_with(|| BlockBuilder::Tool {
                    id: None,
                    name: None,
                    input: String::new(),
                });
                if let BlockBuilder::Text(_) = block {
                    *block = BlockBuilder::Tool {
                        id: None,
                        name: None,
                        input: String::new(),
                    };
                }
                if let BlockBuilder::Tool {
                    id: block_id,
                    name: block_name,
                    input: block_input,
                } = block
                {
                    if id.is_some() {
                        *block_id = id;
                    }
                    if name.is_some() {
                        *block_name = name;
                    }
                    if let Some(fragment) = input {
                        block_input.push_str(&fragment);
                    }
                }
            }
            StreamEvent::Reasoning(ReasoningChunk::Text(text)) => {
                self.open_reasoning.get_or_insert_with(String::new).push_str(&text);
            }
            StreamEvent::Reasoning(ReasoningChunk::Signature(signature)) => {
                let text = self.open_reasoning.take().unwrap_or_default();
                self.reasoning.push((text, signature));
            }
            StreamEvent::ToolOutput { .. } | StreamEvent::EndTurn => {}
        }
    }

    /// Finish the round. Reasoning blocks come first, then content blocks
    /// in index order.
    pub fn finish(self) -> AssistantTurn {
        if let Some(text) = &self.open_reasoning {
            tracing::debug!(chars = text.len(), "dropping unsigned reasoning block");
        }

        let mut content: Vec<ContentBlock> = self
            .reasoning
            .into_iter()
            .map(|(text, signature)| ContentBlock::Reasoning {
                text,
                signature: Some(signature),
            })
            .collect();
        let mut tool_calls = Vec::new();

        for (index, block) in self.blocks {
            match block {
                BlockBuilder::Text(text) => {
                    if !text.is_empty() {
                        content.push(ContentBlock::Text { text });
                    }
                }
                BlockBuilder::Tool { id, name, input } => {
                    let Some(name) = name else {
                        tracing::warn!(index, "dropping tool call without a name");
                        continue;
                    };
                    let id = id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                    let arguments = parse_arguments(&input);
                    content.push(ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: arguments
                            .clone()
                            .unwrap_or_else(|_| Value::Object(Default::default())),
                    });
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments,
                    });
                }
            }
        }

        AssistantTurn {
            message: Message::assistant(content),
            tool_calls,
            stop_reason: self.stop_reason,
            usage: self.usage,
        }
    }
}

/// Tools without parameters stream no argument text at all.
fn parse_arguments(input: &str) -> Result<Value, String> {
    if input.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(input).map_err(|e| format!("invalid JSON arguments: {e}"))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
