//! Chat sessions and streamed turns.
//!
//! A turn runs in its own task: the agent feeds `StreamEvent`s into a
//! bounded channel, a fresh `StreamDispatcher` renders them onto a
//! `ChannelSurface`, and the surface's `UiEvent`s are the SSE response body.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::agent::{Agent, AgentError, SessionHandle};
use crate::inference::Message;
use crate::stream::{
    ChannelSurface, DispatchError, MessageKind, RenderId, RenderSurface, StreamDispatcher,
    SurfaceClosed,
};

/// Agent → dispatcher buffer.
const EVENT_BUFFER: usize = 64;

/// Dispatcher → SSE buffer.
const UI_EVENT_BUFFER: usize = 64;

pub const MODEL_NOT_INITIALIZED: &str = "Chat model not initialized.";

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessage {
    pub content: String,
}

/// `POST /api/sessions`
pub async fn create_session(State(state): State<AppState>) -> Json<SessionCreated> {
    Json(SessionCreated {
        session_id: state.sessions.create(),
    })
}

/// `POST /api/sessions/:id/messages`
pub async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<SendMessage>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    if body.content.trim().is_empty() {
        return Err(ApiError::BadRequest("message content is empty".into()));
    }
    let session = state
        .sessions
        .session(&session_id)
        .map_err(|e| ApiError::NotFound(e.to_string()))?;

    let (surface, ui_rx) = ChannelSurface::channel(UI_EVENT_BUFFER);
    let agent = state.agent().await;
    let span = tracing::info_span!("turn", session_id = %session_id);

    tokio::spawn(run_turn(agent, session, body.content, surface).instrument(span));

    let frames = ReceiverStream::new(ui_rx).map(|event| Event::default().json_data(event));
    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

/// Run one turn to completion, rendering onto `surface`.
///
/// The session stays locked for the whole turn; a second message on the
/// same session waits and then sees this turn's messages. History is only
/// updated when the agent finishes; a failed or abandoned turn leaves it as
/// it was.
pub async fn run_turn<S>(
    agent: Option<Agent>,
    session: SessionHandle,
    content: String,
    surface: S,
) where
    S: RenderSurface + Clone + 'static,
{
    let Some(agent) = agent else {
        tracing::warn!("message received before a model and MCP server were ready");
        let _ = render_error(&surface, MODEL_NOT_INITIALIZED).await;
        return;
    };

    let mut saved = session.lock().await;
    let mut history = saved.clone();
    history.push(Message::user(content));

    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let mut dispatcher = StreamDispatcher::new(surface.clone(), tracing::Span::current());
    let agent_run = async {
        let result = agent.run(&mut history, &event_tx).await;
        drop(event_tx);
        result
    };
    let (agent_result, dispatch_result) =
        tokio::join!(agent_run, dispatcher.run(ReceiverStream::new(event_rx)));

    match agent_result {
        Ok(()) => {
            *saved = history;
            if let Err(DispatchError::Closed) = dispatch_result {
                tracing::info!("client disconnected after the turn completed");
            }
        }
        Err(AgentError::ChannelClosed) => {
            tracing::info!("client disconnected, turn abandoned");
        }
        Err(e) => {
            if let Err(DispatchError::Closed) = dispatch_result {
                tracing::info!(error = %e, "turn failed after client disconnected");
                return;
            }
            tracing::error!(error = %e, "turn failed");
            let _ = render_error(&surface, &e.to_string()).await;
        }
    }
}

/// Show an error as a standalone assistant message.
async fn render_error<S: RenderSurface>(surface: &S, message: &str) -> Result<(), SurfaceClosed> {
    let id = RenderId(format!("error-{}", Uuid::new_v4().simple()));
    surface
        .open_message(&id, MessageKind::Assistant, &format!("Error: {message}"))
        .await?;
    surface.send_message(&id).await
}

// ─── Tests ───────────────────────────────────────────────────────────────────
