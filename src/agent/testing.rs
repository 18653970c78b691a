//! Scripted model and tool host for agent and web tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

use super::tools::{ToolHost, ToolOutcome};
use crate::inference::{ChatModel, ChatRequest, InferenceError, ModelChunk, ModelStream, ToolSpec};
use crate::stream::StreamEvent;
use crate::tool_server::Operation;

/// A complete tool call in one chunk.
pub fn tool_use(index: usize, id: &str, name: &str, input: &str) -> ModelChunk {
    ModelChunk::Event(StreamEvent::ToolUse {
        index,
        id: Some(id.to_string()),
        name: Some(name.to_string()),
        input: Some(input.to_string()),
    })
}

enum Script {
    Rounds(VecDeque<Vec<ModelChunk>>),
    Fail(String),
}

/// Replays one scripted chunk list per request.
pub struct ScriptedModel {
    script: Mutex<Script>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(rounds: Vec<Vec<ModelChunk>>) -> Self {
        Self {
            script: Mutex::new(Script::Rounds(rounds.into())),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request yields a stream whose only item is this error.
    pub fn failing(error: InferenceError) -> Self {
        Self {
            script: Mutex::new(Script::Fail(error.to_string())),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream(&self, request: ChatRequest) -> Result<ModelStream, InferenceError> {
        self.requests.lock().unwrap().push(request);
        let items: Vec<Result<ModelChunk, InferenceError>> = match &mut *self.script.lock().unwrap() {
            Script::Rounds(rounds) => rounds
                .pop_front()
                .expect("model called more times than scripted")
                .into_iter()
                .map(Ok)
                .collect(),
            Script::Fail(reason) => vec![Err(InferenceError::StreamError {
                reason: reason.clone(),
            })],
        };
        Ok(Box::pin(stream::iter(items)))
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

/// Executes the arithmetic tools in-process and records every call.
#[derive(Default)]
pub struct ScriptedTools {
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTools {
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolHost for ScriptedTools {
    async fn tool_specs(&self) -> Vec<ToolSpec> {
        Operation::ALL
            .iter()
            .map(|op| ToolSpec {
                name: op.name().to_string(),
                description: op.description().to_string(),
                input_schema: op.input_schema(),
            })
            .collect()
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        let Some(op) = Operation::from_name(name) else {
            return ToolOutcome::error(name, "unknown tool");
        };
        match op.call(arguments) {
            Ok(value) => ToolOutcome {
                content: value.to_string(),
                is_error: false,
            },
            Err(e) => ToolOutcome::error(name, e),
        }
    }
}
