//! ReAct agent loop: reason, call tools, observe, repeat.
//!
//! Each round streams one model response. Content events are forwarded to
//! the turn's consumer as they arrive; tool calls are executed once the
//! round completes and their outputs are both streamed and fed back to the
//! model. A round without tool calls ends the turn.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use super::accumulator::TurnAccumulator;
use super::errors::AgentError;
use super::tools::{ToolHost, ToolOutcome};
use crate::inference::{ChatModel, ChatRequest, ContentBlock, Message, ModelChunk};
use crate::stream::StreamEvent;

// ─── Constants ───────────────────────────────────────────────────────────────

pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant. You must use the tools provided to you to answer the user's question.";

/// Model rounds allowed per turn.
pub const MAX_ROUNDS: usize = 25;

// ─── Agent ───────────────────────────────────────────────────────────────────

pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: Arc<dyn ToolHost>,
    system_prompt: String,
    max_rounds: usize,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>, tools: Arc<dyn ToolHost>) -> Self {
        Self {
            model,
            tools,
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_rounds: MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Run one turn. `messages` must end with the user's message; the
    /// assistant messages and tool results of every round are appended.
    pub async fn run(
        &self,
        messages: &mut Vec<Message>,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), AgentError> {
        let tools = self.tools.tool_specs().await;

        for round in 0..self.max_rounds {
            let request = ChatRequest {
                system: Some(self.system_prompt.clone()),
                messages: messages.clone(),
                tools: tools.clone(),
            };

            let mut stream = self.model.stream(request).await?;
            let mut accumulator = TurnAccumulator::default();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                if let ModelChunk::Event(event) = &chunk {
                    emit(events, event.clone()).await?;
                }
                accumulator.push(chunk);
            }

            let turn = accumulator.finish();
            tracing::debug!(
                round,
                tool_calls = turn.tool_calls.len(),
                stop_reason = ?turn.stop_reason,
                input_tokens = turn.usage.input_tokens,
                output_tokens = turn.usage.output_tokens,
                "model round complete"
            );

            if !turn.message.content.is_empty() {
                messages.push(turn.message);
            }

            if turn.tool_calls.is_empty() {
                emit(events, StreamEvent::EndTurn).await?;
                return Ok(());
            }

            let mut results = Vec::with_capacity(turn.tool_calls.len());
            for call in turn.tool_calls {
                let outcome = match call.arguments {
                    Ok(arguments) => self.tools.call(&call.name, arguments).await,
                    Err(reason) => ToolOutcome::error(&call.name, reason),
                };
                emit(
                    events,
                    StreamEvent::ToolOutput {
                        content: outcome.content.clone(),
                        tool_name: Some(call.name.clone()),
                    },
                )
                .await?;
                results.push(ContentBlock::ToolResult {
                    tool_use_id: call.id,
                    content: outcome.content,
                    is_error: outcome.is_error,
                });
            }
            messages.push(Message::tool_results(results));
        }

        Err(AgentError::RoundLimit {
            limit: self.max_rounds,
        })
    }
}

async fn emit(events: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), AgentError> {
    events
        .send(event)
        .await
        .map_err(|_| AgentError::ChannelClosed)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
