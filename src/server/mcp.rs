//! JSON-RPC 2.0 protocol loop over stdio.
//!
//! Requests arrive one per line on stdin and responses are written one per
//! line on stdout. Presentation events produced by running analyses are
//! interleaved on the same stream as notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info};

use super::{handle_method, SharedState, METHODS};
use crate::error::McpError;
use crate::presentation::PresentationEvent;

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null if it could not be determined).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-initiated notification.
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl From<&PresentationEvent> for JsonRpcNotification {
    fn from(event: &PresentationEvent) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: event.method().to_string(),
            params: event.params(),
        }
    }
}

/// Server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Methods this server answers.
    pub methods: Vec<String>,
    /// Notification methods this server emits.
    pub notifications: Vec<String>,
}

/// Result of the initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: Capabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Notification methods emitted for presentation events.
pub const NOTIFICATIONS: [&str; 5] = [
    "analysis/progress",
    "analysis/round",
    "analysis/partial",
    "analysis/completed",
    "analysis/failed",
];

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC error code for a method error.
pub fn error_code(err: &McpError) -> i32 {
    match err {
        McpError::InvalidRequest { .. } => -32600,
        McpError::UnknownMethod { .. } => -32601,
        McpError::InvalidParameters { .. } => -32602,
        McpError::Json(_) => -32603,
        McpError::ExecutionFailed { .. } => -32000,
    }
}

/// JSON-RPC server running over stdio.
pub struct McpServer {
    state: SharedState,
    events: UnboundedReceiver<PresentationEvent>,
}

impl McpServer {
    /// Create a server forwarding `events` as notifications.
    pub fn new(state: SharedState, events: UnboundedReceiver<PresentationEvent>) -> Self {
        Self { state, events }
    }

    /// Run the server using async stdio
    pub async fn run(self) -> std::io::Result<()> {
        info!("Fact-check verifier server starting...");
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Serve requests from `reader`, writing responses and notifications
    /// to `writer` until the reader reaches EOF.
    pub async fn serve<R, W>(mut self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut events_open = true;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("EOF received, shutting down");
                        break;
                    };

                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    debug!(request = %trimmed, "Received request");
                    let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                        Ok(request) => self.handle_request(request).await,
                        Err(e) => {
                            error!(error = %e, "Failed to parse request");
                            Some(JsonRpcResponse::error(
                                None,
                                -32700,
                                format!("Parse error: {}", e),
                            ))
                        }
                    };

                    // Only send response if not a notification (per JSON-RPC 2.0 spec)
                    if let Some(response) = response {
                        let response_json = serde_json::to_string(&response)?;
                        debug!(response = %response_json, "Sending response");
                        write_line(&mut writer, &response_json).await?;
                    }
                }
                event = self.events.recv(), if events_open => {
                    match event {
                        Some(event) => {
                            let notification = JsonRpcNotification::from(&event);
                            write_line(&mut writer, &serde_json::to_string(&notification)?).await?;
                        }
                        None => events_open = false,
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a single JSON-RPC request
    /// Returns None for notifications (requests without id) per JSON-RPC 2.0 spec
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        if request.jsonrpc != "2.0" {
            return (!is_notification).then(|| {
                JsonRpcResponse::error(request.id, -32600, "Invalid request: jsonrpc must be 2.0")
            });
        }

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" => {
                debug!("Received initialized notification");
                None
            }
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                let result = handle_method(&self.state, method, request.params).await;
                if is_notification {
                    if let Err(e) = result {
                        debug!(method = %method, error = %e, "Notification failed, ignoring");
                    }
                    return None;
                }
                Some(match result {
                    Ok(value) => JsonRpcResponse::success(request.id, value),
                    Err(e) => {
                        error!(method = %method, error = %e, "Method failed");
                        JsonRpcResponse::error(request.id, error_code(&e), e.to_string())
                    }
                })
            }
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: "2.0".to_string(),
            capabilities: Capabilities {
                methods: METHODS.iter().map(|m| m.to_string()).collect(),
                notifications: NOTIFICATIONS.iter().map(|m| m.to_string()).collect(),
            },
            server_info: ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
