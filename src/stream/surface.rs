//! Render surfaces: where the dispatcher's output goes.
//!
//! A surface exposes the six render operations of the chat UI (open, append
//! and send a message; open, append to and send a tool step). The web layer
//! uses [`ChannelSurface`], which turns each operation into a [`UiEvent`]
//! frame for the browser.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::errors::SurfaceClosed;

/// Identifier of one render object (message or step) within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderId(pub String);

impl std::fmt::Display for RenderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a message should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Assistant,
    Thinking,
}

/// Wire form of a render operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    MessageOpen {
        id: RenderId,
        kind: MessageKind,
        content: String,
    },
    MessageToken {
        id: RenderId,
        token: String,
    },
    MessageSend {
        id: RenderId,
    },
    StepOpen {
        id: RenderId,
        name: String,
    },
    StepToken {
        id: RenderId,
        token: String,
        is_input: bool,
    },
    StepSend {
        id: RenderId,
    },
}

impl UiEvent {
    pub fn id(&self) -> &RenderId {
        match self {
            UiEvent::MessageOpen { id, .. }
            | UiEvent::MessageToken { id, .. }
            | UiEvent::MessageSend { id }
            | UiEvent::StepOpen { id, .. }
            | UiEvent::StepToken { id, .. }
            | UiEvent::StepSend { id } => id,
        }
    }
}

/// Sink for incremental chat rendering.
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Create a message with initial content.
    async fn open_message(
        &self,
        id: &RenderId,
        kind: MessageKind,
        content: &str,
    ) -> Result<(), SurfaceClosed>;

    /// Append a token to an open message.
    async fn stream_token(&self, id: &RenderId, token: &str) -> Result<(), SurfaceClosed>;

    /// Finalize a message.
    async fn send_message(&self, id: &RenderId) -> Result<(), SurfaceClosed>;

    /// Create a tool step titled `name`.
    async fn open_step(&self, id: &RenderId, name: &str) -> Result<(), SurfaceClosed>;

    /// Append an input (arguments) or output (result) token to a step.
    async fn stream_step(
        &self,
        id: &RenderId,
        token: &str,
        is_input: bool,
    ) -> Result<(), SurfaceClosed>;

    /// Finalize a step.
    async fn send_step(&self, id: &RenderId) -> Result<(), SurfaceClosed>;
}

// ─── ChannelSurface ──────────────────────────────────────────────────────────

/// Surface that forwards every operation as a `UiEvent` on a bounded channel.
///
/// The receiving half is drained by the SSE response; once it is dropped
/// every operation fails with `SurfaceClosed`.
#[derive(Debug, Clone)]
pub struct ChannelSurface {
    tx: mpsc::Sender<UiEvent>,
}

impl ChannelSurface {
    pub fn new(tx: mpsc::Sender<UiEvent>) -> Self {
        Self { tx }
    }

    /// A surface plus the receiver its events arrive on.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<UiEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    async fn emit(&self, event: UiEvent) -> Result<(), SurfaceClosed> {
        self.tx.send(event).await.map_err(|_| SurfaceClosed)
    }
}

#[async_trait]
impl RenderSurface for ChannelSurface {
    async fn open_message(
        &self,
        id: &RenderId,
        kind: MessageKind,
        content: &str,
    ) -> Result<(), SurfaceClosed> {
        self.emit(UiEvent::MessageOpen {
            id: id.clone(),
            kind,
            content: content.to_string(),
        })
        .await
    }

    async fn stream_token(&self, id: &RenderId, token: &str) -> Result<(), SurfaceClosed> {
        self.emit(UiEvent::MessageToken {
            id: id.clone(),
            token: token.to_string(),
        })
        .await
    }

    async fn send_message(&self, id: &RenderId) -> Result<(), SurfaceClosed> {
        self.emit(UiEvent::MessageSend { id: id.clone() }).await
    }

    async fn open_step(&self, id: &RenderId, name: &str) -> Result<(), SurfaceClosed> {
        self.emit(UiEvent::StepOpen {
            id: id.clone(),
            name: name.to_string(),
        })
        .await
    }

    async fn stream_step(
        &self,
        id: &RenderId,
        token: &str,
        is_input: bool,
    ) -> Result<(), SurfaceClosed> {
        self.emit(UiEvent::StepToken {
            id: id.clone(),
            token: token.to_string(),
            is_input,
        })
        .await
    }

    async fn send_step(&self, id: &RenderId) -> Result<(), SurfaceClosed> {
        self.emit(UiEvent::StepSend { id: id.clone() }).await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
