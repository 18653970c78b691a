//! HTTP front end: the chat page, chat turns streamed as SSE, and MCP server
//! management.
//!
//! Routes:
//! - `GET /`: the single-page chat UI
//! - `POST /api/sessions`: start a chat session
//! - `POST /api/sessions/:id/messages`: run one turn, streamed as `UiEvent`s
//! - `GET|POST /api/mcp`, `DELETE /api/mcp/:name`: MCP server status, connect, disconnect
//! - `GET /api/config`: active model settings

pub mod chat;
pub mod mcp;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;

use crate::agent::{Agent, SessionStore, ToolHost};
use crate::config::McpSettings;
use crate::inference::{ChatModel, ModelSettings};
use crate::mcp_client::McpClient;
use crate::TokioMutex;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

// ─── State ───────────────────────────────────────────────────────────────────

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// `None` when the configured backend could not be built.
    pub model: Option<Arc<dyn ChatModel>>,
    pub mcp: Arc<TokioMutex<McpClient>>,
    /// The tools the agent sees; the MCP client outside of tests.
    pub tools: Arc<dyn ToolHost>,
    pub sessions: Arc<SessionStore>,
    pub settings: Arc<ModelSettings>,
    pub mcp_settings: Arc<McpSettings>,
}

impl AppState {
    pub fn new(
        model: Option<Arc<dyn ChatModel>>,
        mcp: Arc<TokioMutex<McpClient>>,
        settings: ModelSettings,
        mcp_settings: McpSettings,
    ) -> Self {
        let tools: Arc<dyn ToolHost> = mcp.clone();
        Self {
            model,
            mcp,
            tools,
            sessions: Arc::new(SessionStore::new()),
            settings: Arc::new(settings),
            mcp_settings: Arc::new(mcp_settings),
        }
    }

    /// An agent exists once a model is built and at least one tool is
    /// available from a connected server.
    pub async fn agent(&self) -> Option<Agent> {
        let model = self.model.clone()?;
        if self.tools.tool_specs().await.is_empty() {
            return None;
        }
        Some(Agent::new(model, self.tools.clone()))
    }
}

// ─── Router ──────────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/sessions", post(chat::create_session))
        .route("/api/sessions/:id/messages", post(chat::send_message))
        .route("/api/mcp", get(mcp::list_servers).post(mcp::connect_server))
        .route("/api/mcp/:name", delete(mcp::disconnect_server))
        .route("/api/config", get(config))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn config(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "settings": &*state.settings,
        "model_ready": state.model.is_some(),
        "backend": state.model.as_ref().map(|m| m.describe()),
    }))
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        let payload = ErrorPayload {
            error: self.to_string(),
        };
        (status, Json(payload)).into_response()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
