//! MCP client: typed tool invocation over HTTP with streamed progress.

pub mod relay;

use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::mcp::progress::{ProgressParams, ProgressToken, PROGRESS_METHOD};
use crate::mcp::protocol::{
    error_codes, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, RequestId,
    ServerInfo, Tool, ToolResult, MCP_VERSION,
};

pub use relay::ProgressRelay;

/// Default per-read idle timeout while waiting on the event stream.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Typed parameters for the tools the client knows how to call.
///
/// Parsing validates names and argument shapes locally, so a malformed
/// call fails before any network round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolParams {
    Reverse { query: String },
    RandomNumber { min: i64, max: i64 },
}

impl ToolParams {
    /// Parse a tool name and JSON argument object into typed parameters.
    pub fn parse(tool: &str, args: &Value) -> Result<Self> {
        match tool {
            "reverse_tool" => {
                let query = args
                    .get("query")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        Error::InvalidToolArguments(
                            "reverse_tool requires a string argument 'query'".to_string(),
                        )
                    })?;
                Ok(Self::Reverse {
                    query: query.to_string(),
                })
            }
            "random_number_tool" => {
                let int_arg = |name: &str| {
                    args.get(name).and_then(|v| v.as_i64()).ok_or_else(|| {
                        Error::InvalidToolArguments(format!(
                            "random_number_tool requires an integer argument '{name}'"
                        ))
                    })
                };
                Ok(Self::RandomNumber {
                    min: int_arg("min")?,
                    max: int_arg("max")?,
                })
            }
            other => Err(Error::ToolNotFound(other.to_string())),
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::Reverse { .. } => "reverse_tool",
            Self::RandomNumber { .. } => "random_number_tool",
        }
    }

    fn arguments(&self) -> HashMap<String, Value> {
        let mut args = HashMap::new();
        match self {
            Self::Reverse { query } => {
                args.insert("query".to_string(), json!(query));
            }
            Self::RandomNumber { min, max } => {
                args.insert("min".to_string(), json!(min));
                args.insert("max".to_string(), json!(max));
            }
        }
        args
    }
}

/// Accumulates raw stream bytes and yields complete lines.
///
/// Decoding happens per line, never per chunk, so a multibyte character
/// split across chunk boundaries survives intact.
struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            lines.push(
                line.trim_end_matches(|c| c == '\n' || c == '\r')
                    .to_string(),
            );
        }
        lines
    }
}

/// Successful outcome of a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Concatenated textual content.
    pub text: String,
    /// Machine-readable payload, when the tool produced one.
    pub structured: Option<Value>,
}

/// Client for one MCP server endpoint.
///
/// Invocations are serialized: the internal mutex lets one `invoke` run
/// at a time per client, so interleaved progress streams cannot happen.
pub struct ToolClient {
    http: reqwest::Client,
    url: String,
    bearer: Option<String>,
    read_timeout: Duration,
    in_flight: Mutex<()>,
    next_id: AtomicI64,
    server: Option<ServerInfo>,
}

impl ToolClient {
    pub fn new(url: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            bearer,
            read_timeout: DEFAULT_READ_TIMEOUT,
            in_flight: Mutex::new(()),
            next_id: AtomicI64::new(1),
            server: None,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Info of the connected server, after [`connect`](Self::connect).
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server.as_ref()
    }

    /// Perform the MCP handshake: `initialize`, then the `initialized`
    /// notification.
    pub async fn connect(&mut self) -> Result<ServerInfo> {
        let result = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": MCP_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": crate::SERVER_NAME,
                        "version": crate::VERSION,
                    }
                })),
            )
            .await?;

        let init: InitializeResult = serde_json::from_value(result)?;
        debug!(server = %init.server_info.name, version = %init.server_info.version, "Connected");

        self.notify("notifications/initialized").await?;
        self.server = Some(init.server_info.clone());
        Ok(init.server_info)
    }

    /// List the tools the server offers.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result = self.request("tools/list", None).await?;
        let listing: ListToolsResult = serde_json::from_value(result)?;
        Ok(listing.tools)
    }

    /// Invoke a tool, feeding every progress event to `on_progress` as it
    /// arrives, and return the final outcome.
    pub async fn invoke(
        &self,
        params: ToolParams,
        mut on_progress: impl FnMut(&ProgressParams),
    ) -> Result<ToolOutput> {
        let _permit = self.in_flight.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = ProgressToken::String(Uuid::new_v4().to_string());
        let request = JsonRpcRequest::new(
            RequestId::Number(id),
            "tools/call",
            Some(json!({
                "name": params.tool_name(),
                "arguments": params.arguments(),
                "_meta": { "progressToken": token }
            })),
        );

        let response = self
            .apply_auth(self.http.post(&self.url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Auth("server rejected the bearer token".to_string()));
        }
        let response = response.error_for_status()?;

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);

        // Protocol-level rejections come back as a plain JSON response.
        if !is_event_stream {
            let rpc: JsonRpcResponse = response.json().await?;
            return Self::finish(rpc);
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::new();

        loop {
            let chunk = tokio::time::timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| Error::Timeout {
                    seconds: self.read_timeout.as_secs(),
                })?;

            let Some(chunk) = chunk else {
                return Err(Error::McpProtocol(
                    "event stream ended without a final response".to_string(),
                ));
            };

            for line in lines.push(&chunk?) {
                let Some(data) = line
                    .strip_prefix("data: ")
                    .or_else(|| line.strip_prefix("data:"))
                else {
                    continue;
                };
                let Ok(value) = serde_json::from_str::<Value>(data) else {
                    debug!(line = %data, "Skipping unparseable event");
                    continue;
                };

                if value.get("method").and_then(|m| m.as_str()) == Some(PROGRESS_METHOD) {
                    if let Some(params) = value.get("params") {
                        if let Ok(progress) =
                            serde_json::from_value::<ProgressParams>(params.clone())
                        {
                            on_progress(&progress);
                        }
                    }
                    continue;
                }

                if value.get("id").is_some() {
                    let rpc: JsonRpcResponse = serde_json::from_value(value)?;
                    return Self::finish(rpc);
                }
            }
        }
    }

    /// End the session. The transport is stateless; this only discards
    /// the handshake state.
    pub fn close(mut self) {
        self.server = None;
        debug!("Session closed");
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a plain (non-streaming) JSON-RPC request.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(RequestId::Number(id), method, params);

        let response = self
            .apply_auth(self.http.post(&self.url))
            .json(&request)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Auth("server rejected the bearer token".to_string()));
        }
        let rpc: JsonRpcResponse = response.error_for_status()?.json().await?;

        if let Some(error) = rpc.error {
            return Err(Error::McpProtocol(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }
        rpc.result
            .ok_or_else(|| Error::McpProtocol("response carried no result".to_string()))
    }

    /// Send a JSON-RPC notification (fire and forget).
    async fn notify(&self, method: &str) -> Result<()> {
        let notification = crate::mcp::protocol::JsonRpcNotification::new(method, None);
        self.apply_auth(self.http.post(&self.url))
            .json(&notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Interpret the final response of an invocation.
    fn finish(response: JsonRpcResponse) -> Result<ToolOutput> {
        if let Some(error) = response.error {
            return Err(match error.code {
                error_codes::REQUEST_CANCELLED => Error::Cancelled,
                error_codes::INVALID_PARAMS if error.message.starts_with("Tool not found") => {
                    Error::ToolNotFound(error.message)
                }
                error_codes::INVALID_PARAMS => Error::InvalidToolArguments(error.message),
                _ => Error::McpProtocol(format!("{} (code {})", error.message, error.code)),
            });
        }

        let result: ToolResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| Error::McpProtocol("response carried no result".to_string()))?,
        )?;

        let text = result
            .content
            .iter()
            .filter_map(|block| block.as_text())
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error {
            let reason = if text.is_empty() {
                "tool rejected the call".to_string()
            } else {
                text
            };
            return Err(Error::ToolRejected(reason));
        }

        Ok(ToolOutput {
            text,
            structured: result.structured_content,
        })
    }
}
