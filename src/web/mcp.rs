//! MCP server management endpoints.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::mcp_client::{McpError, ServerConfig, ServerStatus};

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Connected {
    pub name: String,
    pub tools: Vec<String>,
}

/// `GET /api/mcp`
pub async fn list_servers(State(state): State<AppState>) -> Json<Vec<ServerStatus>> {
    Json(state.mcp.lock().await.status())
}

/// `POST /api/mcp`
pub async fn connect_server(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<Connected>, ApiError> {
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("server name is empty".into()));
    }
    if request.command.trim().is_empty() {
        return Err(ApiError::BadRequest("server command is empty".into()));
    }
    if !state.mcp_settings.allows(&request.command) {
        tracing::warn!(
            server = %name,
            command = %request.command,
            "MCP connect refused, command not allowed"
        );
        return Err(ApiError::Forbidden(format!(
            "command '{}' is not in mcp.allowed_executables",
            request.command
        )));
    }

    let config = ServerConfig {
        command: request.command,
        args: request.args,
        env: request.env,
        cwd: request.cwd,
    };
    let tools = state
        .mcp
        .lock()
        .await
        .connect(&name, config)
        .await
        .map_err(|e| {
            tracing::warn!(server = %name, error = %e, "MCP connect failed");
            ApiError::Upstream(e.to_string())
        })?;

    tracing::info!(server = %name, tools = tools.len(), "MCP server connected");
    Ok(Json(Connected { name, tools }))
}

/// `DELETE /api/mcp/:name`
pub async fn disconnect_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.mcp.lock().await.disconnect(&name).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(McpError::ConfigError { reason }) => Err(ApiError::NotFound(reason)),
        Err(e) => Err(ApiError::Upstream(e.to_string())),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::McpSettings;
    use crate::web::tests::{body_json, empty_state};
    use crate::web::{router, AppState};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_list_servers_empty() {
        let response = router(empty_state())
            .oneshot(Request::get("/api/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_command() {
        let response = router(empty_state())
            .oneshot(
                Request::post("/api/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name": "math", "command": " "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    const MISSING_SERVER: &str = "/nonexistent/mcp-chat-test-server";

    fn state_allowing(command: &str) -> AppState {
        AppState {
            mcp_settings: Arc::new(McpSettings {
                allowed_executables: vec![command.to_string()],
                ..McpSettings::default()
            }),
            ..empty_state()
        }
    }

    async fn post_connect(state: AppState, body: serde_json::Value) -> Response {
        router(state)
            .oneshot(
                Request::post("/api/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_refuses_command_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let state = state_allowing(MISSING_SERVER);

        let response = post_connect(
            state.clone(),
            serde_json::json!({
                "name": "shell",
                "command": "sh",
                "args": ["-c", format!("touch {}", marker.display())],
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("'sh'"));
        assert!(state.mcp.lock().await.status().is_empty());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_connect_refused_by_default() {
        let response = post_connect(
            empty_state(),
            serde_json::json!({"name": "ghost", "command": MISSING_SERVER}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_connect_spawn_failure_is_bad_gateway() {
        let state = state_allowing(MISSING_SERVER);
        let response = post_connect(
            state.clone(),
            serde_json::json!({"name": "ghost", "command": MISSING_SERVER}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("ghost"));
        assert!(state.mcp.lock().await.status().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_unknown_server_is_404() {
        let response = router(empty_state())
            .oneshot(
                Request::delete("/api/mcp/nothing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
