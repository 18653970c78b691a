//! MCP server loop: line-delimited JSON-RPC over a pair of async streams.
//!
//! The server is stateless. Each request line is answered independently; the
//! loop ends on EOF or a `shutdown` message.

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::arithmetic::{Number, Operation};
use crate::protocol::{
    error_codes, CallToolResult, ContentItem, Implementation, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, McpToolDefinition, RequestId, PROTOCOL_VERSION,
};

/// Instructions advertised to clients during `initialize`.
pub const INSTRUCTIONS: &str = "This is a server that can do basic math and arithmetic operations.";

/// Outcome of handling a single inbound line.
#[derive(Debug)]
pub enum Reply {
    /// Write this response back to the client.
    Respond(JsonRpcResponse),
    /// Notification handled; nothing to write.
    Silent,
    /// Stop serving, optionally acknowledging first.
    Shutdown(Option<JsonRpcResponse>),
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<serde_json::Value>,
}

/// The arithmetic MCP server.
#[derive(Debug, Clone)]
pub struct ToolServer {
    info: Implementation,
}

impl Default for ToolServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolServer {
    pub fn new() -> Self {
        Self {
            info: Implementation {
                name: "math-server".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        }
    }

    /// Serve requests until EOF or shutdown.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        tracing::info!(server = %self.info.name, "math server listening on stdio");

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match self.handle_line(&line) {
                Reply::Respond(resp) => write_response(&mut writer, &resp).await?,
                Reply::Silent => {}
                Reply::Shutdown(ack) => {
                    if let Some(resp) = ack {
                        write_response(&mut writer, &resp).await?;
                    }
                    tracing::info!("shutdown requested");
                    return Ok(());
                }
            }
        }

        tracing::info!("stdin closed, exiting");
        Ok(())
    }

    /// Handle one raw JSON-RPC line.
    pub fn handle_line(&self, line: &str) -> Reply {
        let value: serde_json::Value = match serde_json::from_str(line.trim()) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unparsable request line");
                return Reply::Respond(JsonRpcResponse::failure(
                    None,
                    error_codes::PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };

        let request: JsonRpcRequest = match serde_json::from_value(value.clone()) {
            Ok(r) => r,
            Err(e) => {
                let id = value
                    .get("id")
                    .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
                return Reply::Respond(JsonRpcResponse::failure(
                    id,
                    error_codes::INVALID_REQUEST,
                    format!("Invalid request: {e}"),
                ));
            }
        };

        self.handle_request(request)
    }

    pub fn handle_request(&self, request: JsonRpcRequest) -> Reply {
        tracing::debug!(method = %request.method, id = ?request.id, "handling message");

        let Some(id) = request.id.clone() else {
            return match request.method.as_str() {
                "shutdown" | "exit" => Reply::Shutdown(None),
                method => {
                    tracing::debug!(method, "notification acknowledged");
                    Reply::Silent
                }
            };
        };
        let id = Some(id);

        let result = match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(request.params),
            "shutdown" => {
                return Reply::Shutdown(Some(JsonRpcResponse::success(id, json!({}))));
            }
            other => Err((
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        };

        match result {
            Ok(value) => Reply::Respond(JsonRpcResponse::success(id, value)),
            Err((code, message)) => Reply::Respond(JsonRpcResponse::failure(id, code, message)),
        }
    }

    fn initialize(&self) -> serde_json::Value {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: json!({"tools": {"listChanged": false}}),
            server_info: self.info.clone(),
            instructions: Some(INSTRUCTIONS.into()),
        };
        to_value(&result)
    }

    fn list_tools(&self) -> serde_json::Value {
        let tools = Operation::ALL
            .into_iter()
            .map(|op| McpToolDefinition {
                name: op.name().into(),
                description: op.description().into(),
                input_schema: op.input_schema(),
                output_schema: Some(op.output_schema()),
            })
            .collect();
        to_value(&ListToolsResult { tools })
    }

    fn call_tool(&self, params: Option<serde_json::Value>) -> Result<serde_json::Value, (i32, String)> {
        let params: CallToolParams = params
            .ok_or_else(|| "missing params".to_string())
            .and_then(|p| serde_json::from_value(p).map_err(|e| e.to_string()))
            .map_err(|reason| {
                (
                    error_codes::INVALID_PARAMS,
                    format!("Invalid tools/call params: {reason}"),
                )
            })?;

        let op = Operation::from_name(&params.name).ok_or_else(|| {
            (
                error_codes::INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
            )
        })?;

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let result = match op.call(arguments) {
            Ok(value) => {
                tracing::info!(tool = op.name(), result = %value, "tool call succeeded");
                success_result(value)
            }
            Err(e) => {
                tracing::warn!(tool = op.name(), error = %e, "tool call failed");
                CallToolResult {
                    content: vec![ContentItem::Text {
                        text: format!("Error executing tool {}: {e}", op.name()),
                    }],
                    structured_content: None,
                    is_error: true,
                }
            }
        };
        Ok(to_value(&result))
    }
}

fn success_result(value: Number) -> CallToolResult {
    CallToolResult {
        content: vec![ContentItem::Text {
            text: value.to_string(),
        }],
        structured_content: Some(json!({ "result": value })),
        is_error: false,
    }
}

/// Protocol structs always serialize; fall back to `null` rather than panic.
fn to_value<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &JsonRpcResponse,
) -> std::io::Result<()> {
    let mut json = serde_json::to_string(response).map_err(std::io::Error::other)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn respond(server: &ToolServer, line: &str) -> JsonRpcResponse {
        match server.handle_line(line) {
            Reply::Respond(resp) => resp,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    #[test]
    fn test_initialize_advertises_tools_and_instructions() {
        let server = ToolServer::new();
        let resp = respond(
            &server,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        );
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
        assert_eq!(result["serverInfo"]["name"], "math-server");
        assert_eq!(result["instructions"], INSTRUCTIONS);
    }

    #[test]
    fn test_initialized_notification_is_silent() {
        let server = ToolServer::new();
        let reply =
            server.handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert!(matches!(reply, Reply::Silent));
    }

    #[test]
    fn test_ping_returns_empty_object() {
        let server = ToolServer::new();
        let resp = respond(&server, r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#);
        assert_eq!(resp.id, Some(RequestId::String("p".into())));
        assert_eq!(resp.result.unwrap(), json!({}));
    }

    #[test]
    fn test_tools_list_in_registration_order() {
        let server = ToolServer::new();
        let resp = respond(&server, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#);
        let result: ListToolsResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        let names: Vec<&str> = result.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["add", "subtract", "multiply", "divide"]);
        assert!(result.tools.iter().all(|t| t.output_schema.is_some()));
    }

    #[test]
    fn test_tools_call_success() {
        let server = ToolServer::new();
        let resp = respond(
            &server,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"add","arguments":{"a":1,"b":2}}}"#,
        );
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "3");
        assert_eq!(result.structured_content.unwrap()["result"], 3);
    }

    #[test]
    fn test_tools_call_divide_by_zero_is_in_band_error() {
        let server = ToolServer::new();
        let resp = respond(
            &server,
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"divide","arguments":{"a":1,"b":0}}}"#,
        );
        assert!(resp.error.is_none());
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(result.is_error);
        assert_eq!(
            result.text(),
            "Error executing tool divide: Cannot divide by zero"
        );
    }

    #[test]
    fn test_tools_call_unknown_tool_is_invalid_params() {
        let server = ToolServer::new();
        let resp = respond(
            &server,
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"sqrt","arguments":{}}}"#,
        );
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);
        assert!(err.message.contains("sqrt"));
    }

    #[test]
    fn test_unknown_method() {
        let server = ToolServer::new();
        let resp = respond(&server, r#"{"jsonrpc":"2.0","id":6,"method":"resources/list"}"#);
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_parse_error_has_null_id() {
        let server = ToolServer::new();
        let resp = respond(&server, "{not json");
        assert!(resp.id.is_none());
        assert_eq!(resp.error.unwrap().code, error_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_serve_answers_each_line_and_stops_on_shutdown() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"multiply","arguments":{"a":6,"b":7}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"shutdown"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#,
            "\n",
        );
        let mut output = Vec::new();
        ToolServer::new()
            .serve(tokio::io::BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2, "nothing is answered after shutdown");
        let second: JsonRpcResponse = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.result.unwrap()["structuredContent"]["result"], 42);
    }
}
