//! End-to-end round trip: a real client against a real server on an
//! ephemeral port, auth disabled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use toolgate::client::{ToolClient, ToolParams};
use toolgate::error::Error;
use toolgate::http::{router, HttpState};
use toolgate::mcp::handler::ToolRegistry;
use toolgate::tools::sample::{RandomNumberTool, ReverseTool};

/// Serve a registry on an ephemeral port, returning the MCP endpoint URL.
async fn spawn_with(registry: ToolRegistry) -> String {
    let state = HttpState::new(Arc::new(registry), None);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/mcp")
}

/// The standard tool set, with zero step delay so tests are instant.
async fn spawn_server() -> String {
    let mut registry = ToolRegistry::new();
    registry.register(ReverseTool::with_step_delay(Duration::ZERO));
    registry.register(RandomNumberTool);
    spawn_with(registry).await
}

async fn connected_client() -> ToolClient {
    let mut client = ToolClient::new(spawn_server().await, None);
    client.connect().await.unwrap();
    client
}

#[tokio::test]
async fn test_handshake_reports_server_info() {
    let mut client = ToolClient::new(spawn_server().await, None);
    let server = client.connect().await.unwrap();

    assert_eq!(server.name, "toolgate");
    assert_eq!(server.version, toolgate::VERSION);
    assert!(client.server_info().is_some());
}

#[tokio::test]
async fn test_list_tools() {
    let client = connected_client().await;

    let tools = client.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["random_number_tool", "reverse_tool"]);

    let reverse = tools.iter().find(|t| t.name == "reverse_tool").unwrap();
    assert!(reverse.input_schema["properties"]["query"].is_object());
}

#[tokio::test]
async fn test_reverse_round_trip_with_progress() {
    let client = connected_client().await;

    let mut events = Vec::new();
    let output = client
        .invoke(
            ToolParams::Reverse {
                query: "abc".to_string(),
            },
            |event| events.push((event.progress, event.total)),
        )
        .await
        .unwrap();

    assert_eq!(output.text, "cba");
    assert_eq!(
        output.structured,
        Some(serde_json::json!({ "reversed_query": "cba" }))
    );

    // The leading zero event and every step arrived, in order, ending at
    // the total.
    assert_eq!(events.len(), 6);
    assert_eq!(events[0], (0, Some(5)));
    assert!(events.windows(2).all(|w| w[0].0 < w[1].0));
    let (last_progress, last_total) = *events.last().unwrap();
    assert_eq!(Some(last_progress), last_total);
}

#[tokio::test]
async fn test_random_number_round_trip() {
    let client = connected_client().await;

    let output = client
        .invoke(ToolParams::RandomNumber { min: 10, max: 20 }, |_| {})
        .await
        .unwrap();

    let value = output.structured.unwrap()["random_number"].as_i64().unwrap();
    assert!((10..=20).contains(&value));
}

#[tokio::test]
async fn test_inverted_range_is_rejected_not_errored() {
    let client = connected_client().await;

    let err = client
        .invoke(ToolParams::RandomNumber { min: 9, max: 2 }, |_| {})
        .await
        .unwrap_err();

    // An application rejection, not a protocol failure: the call was
    // understood, the tool said no.
    match err {
        Error::ToolRejected(reason) => assert!(reason.contains("must not exceed")),
        other => panic!("expected ToolRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_call_fails_before_any_round_trip() {
    // No server at all: local validation must reject first.
    let err = ToolParams::parse("reverse_tool", &serde_json::json!({})).unwrap_err();
    assert!(matches!(err, Error::InvalidToolArguments(_)));

    let err = ToolParams::parse("mystery_tool", &serde_json::json!({})).unwrap_err();
    assert!(matches!(err, Error::ToolNotFound(_)));
}

#[tokio::test]
async fn test_sequential_invocations_on_one_client() {
    let client = connected_client().await;

    let first = client
        .invoke(
            ToolParams::Reverse {
                query: "one".to_string(),
            },
            |_| {},
        )
        .await
        .unwrap();
    let second = client
        .invoke(
            ToolParams::Reverse {
                query: "two".to_string(),
            },
            |_| {},
        )
        .await
        .unwrap();

    assert_eq!(first.text, "eno");
    assert_eq!(second.text, "owt");
}

/// Runs until cancelled, recording which way it ended.
struct StallTool {
    completed: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl toolgate::mcp::handler::ToolHandler for StallTool {
    fn definition(&self) -> toolgate::mcp::protocol::Tool {
        toolgate::mcp::protocol::Tool {
            name: "stall".to_string(),
            description: "Runs until told to stop".to_string(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(
        &self,
        _arguments: std::collections::HashMap<String, serde_json::Value>,
        ctx: toolgate::mcp::handler::ToolContext,
    ) -> toolgate::error::Result<toolgate::mcp::protocol::ToolResult> {
        for _ in 0..200 {
            if ctx.ensure_active().is_err() {
                self.cancelled.store(true, Ordering::SeqCst);
                return Err(Error::Cancelled);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.completed.store(true, Ordering::SeqCst);
        Ok(toolgate::mcp::handler::success_result("done", None))
    }
}

#[tokio::test]
async fn test_dropped_stream_cancels_running_tool() {
    let completed = Arc::new(AtomicBool::new(false));
    let cancelled = Arc::new(AtomicBool::new(false));

    let mut registry = ToolRegistry::new();
    registry.register(StallTool {
        completed: completed.clone(),
        cancelled: cancelled.clone(),
    });
    let url = spawn_with(registry).await;

    let http = reqwest::Client::new();
    let response = http
        .post(&url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": { "name": "stall" }
        }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // Let the handler get going, then walk away mid-stream.
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(response);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cancelled.load(Ordering::SeqCst) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // The handler observed cancellation; it never ran to completion.
    assert!(cancelled.load(Ordering::SeqCst));
    assert!(!completed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_health_endpoint() {
    let url = spawn_server().await;
    let health_url = url.replace("/mcp", "/health");

    let response = reqwest::get(&health_url).await.unwrap();
    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], toolgate::VERSION);
}
