//! HTTP server exposing the tool registry over MCP.
//!
//! One JSON-RPC endpoint at `/mcp`. Plain requests get JSON responses;
//! `tools/call` answers with an SSE stream carrying progress notifications
//! followed by the final response. A disconnecting caller cancels the
//! in-flight tool through a drop guard tied to the stream.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::{AuthContext, TokenVerifier};
use crate::error::{Error, Result};
use crate::mcp::handler::{error_result, ToolContext, ToolRegistry};
use crate::mcp::progress::ProgressReporter;
use crate::mcp::protocol::*;

/// HTTP server state.
#[derive(Clone)]
pub struct HttpState {
    registry: Arc<ToolRegistry>,
    /// Absent when the server runs without authentication.
    verifier: Option<Arc<TokenVerifier>>,
    server_info: ServerInfo,
}

impl HttpState {
    pub fn new(registry: Arc<ToolRegistry>, verifier: Option<Arc<TokenVerifier>>) -> Self {
        Self {
            registry,
            verifier,
            server_info: ServerInfo {
                name: crate::SERVER_NAME.to_string(),
                version: crate::VERSION.to_string(),
            },
        }
    }
}

/// Build the router. Exposed separately from [`start_server`] so tests can
/// drive it on an ephemeral port.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route(
            "/mcp",
            post(mcp_endpoint)
                .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer)),
        )
        .route("/health", get(health_check))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn start_server(
    port: u16,
    registry: Arc<ToolRegistry>,
    verifier: Option<Arc<TokenVerifier>>,
) -> Result<()> {
    let state = HttpState::new(registry, verifier);
    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    info!("Starting MCP server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint. Never authenticated.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION
    }))
}

/// Reject requests without a valid bearer token, attaching the verified
/// caller to the request otherwise. Pass-through when auth is disabled.
async fn require_bearer(State(state): State<HttpState>, mut request: Request, next: Next) -> Response {
    let Some(verifier) = state.verifier.clone() else {
        return next.run(request).await;
    };

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return unauthorized("missing bearer token");
    };

    match verifier.verify(token).await {
        Ok(ctx) => {
            request.extensions_mut().insert(Arc::new(ctx));
            next.run(request).await
        }
        Err(e) => {
            warn!(error = %e, "Rejected bearer token");
            unauthorized(&e.to_string())
        }
    }
}

fn unauthorized(reason: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(serde_json::json!({ "error": reason })),
    )
        .into_response()
}

/// The single MCP endpoint. Notifications are acknowledged without a
/// body; requests are dispatched by method.
async fn mcp_endpoint(
    State(state): State<HttpState>,
    auth: Option<Extension<Arc<AuthContext>>>,
    Json(payload): Json<Value>,
) -> Response {
    let auth = auth.map(|Extension(ctx)| ctx);

    // A message without an id is a notification.
    if payload.get("id").is_none() {
        if let Some(method) = payload.get("method").and_then(|m| m.as_str()) {
            debug!(method, "Received notification");
        }
        return StatusCode::ACCEPTED.into_response();
    }

    let request: JsonRpcRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => {
            let response = JsonRpcResponse::failure(
                RequestId::Number(0),
                error_codes::INVALID_REQUEST,
                format!("Malformed request: {e}"),
            );
            return Json(response).into_response();
        }
    };

    debug!(method = %request.method, id = ?request.id, "Handling request");

    match request.method.as_str() {
        "initialize" => {
            let result = InitializeResult {
                protocol_version: MCP_VERSION.to_string(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability { list_changed: false }),
                },
                server_info: state.server_info.clone(),
            };
            json_response(request.id, serde_json::to_value(result))
        }
        "ping" => Json(JsonRpcResponse::success(request.id, serde_json::json!({})))
            .into_response(),
        "tools/list" => {
            let result = ListToolsResult {
                tools: state.registry.list_tools(),
            };
            json_response(request.id, serde_json::to_value(result))
        }
        "tools/call" => call_tool(state, request, auth).await,
        other => Json(JsonRpcResponse::failure(
            request.id,
            error_codes::METHOD_NOT_FOUND,
            format!("Unknown method: {other}"),
        ))
        .into_response(),
    }
}

fn json_response(id: RequestId, result: serde_json::Result<Value>) -> Response {
    match result {
        Ok(value) => Json(JsonRpcResponse::success(id, value)).into_response(),
        Err(e) => Json(JsonRpcResponse::failure(
            id,
            error_codes::INTERNAL_ERROR,
            e.to_string(),
        ))
        .into_response(),
    }
}

/// Dispatch a `tools/call` and stream its progress plus final response as
/// server-sent events.
async fn call_tool(
    state: HttpState,
    request: JsonRpcRequest,
    auth: Option<Arc<AuthContext>>,
) -> Response {
    let params: CallToolParams = match request
        .params
        .ok_or_else(|| Error::InvalidToolArguments("missing params".to_string()))
        .and_then(|p| serde_json::from_value(p).map_err(Error::from))
    {
        Ok(p) => p,
        Err(e) => {
            return Json(JsonRpcResponse::failure(
                request.id,
                error_codes::INVALID_PARAMS,
                e.to_string(),
            ))
            .into_response();
        }
    };

    let cancel = CancellationToken::new();
    // Dropped together with the SSE stream when the caller disconnects.
    let guard = cancel.clone().drop_guard();

    let (event_tx, event_rx) = mpsc::channel::<String>(32);
    let (progress_tx, mut progress_rx) = mpsc::channel(32);
    let reporter = params
        .progress_token()
        .map(|token| ProgressReporter::new(token, progress_tx));

    let ctx = ToolContext {
        reporter,
        cancel: cancel.clone(),
        auth,
    };

    let registry = state.registry.clone();
    let id = request.id.clone();
    tokio::spawn(async move {
        let dispatch = registry.dispatch(&params.name, params.arguments, ctx);
        tokio::pin!(dispatch);

        let result = loop {
            tokio::select! {
                Some(progress) = progress_rx.recv() => {
                    forward(&event_tx, &progress.into_notification()).await;
                }
                result = &mut dispatch => break result,
            }
        };

        // The handler is done; flush whatever progress it emitted last.
        while let Ok(progress) = progress_rx.try_recv() {
            forward(&event_tx, &progress.into_notification()).await;
        }

        forward(&event_tx, &render(id, result)).await;
    });

    let stream = ReceiverStream::new(event_rx).map(move |payload| {
        // Keep the guard alive for exactly as long as the response body.
        let _held = &guard;
        Ok::<_, Infallible>(Event::default().data(payload))
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn forward<T: serde::Serialize>(events: &mpsc::Sender<String>, message: &T) {
    match serde_json::to_string(message) {
        Ok(payload) => {
            if events.send(payload).await.is_err() {
                debug!("Event stream closed, caller went away");
            }
        }
        Err(e) => warn!(error = %e, "Could not serialize outgoing message"),
    }
}

/// Render a dispatch outcome as the final JSON-RPC response.
///
/// Application rejections stay inside a result with `is_error` set;
/// protocol failures become JSON-RPC error objects with distinct codes.
fn render(id: RequestId, result: Result<ToolResult>) -> JsonRpcResponse {
    match result {
        Ok(tool_result) => match serde_json::to_value(tool_result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::failure(id, error_codes::INTERNAL_ERROR, e.to_string()),
        },
        Err(Error::ToolRejected(message)) => {
            let value = serde_json::to_value(error_result(message)).unwrap_or_default();
            JsonRpcResponse::success(id, value)
        }
        Err(e @ Error::ToolNotFound(_)) => {
            JsonRpcResponse::failure(id, error_codes::INVALID_PARAMS, e.to_string())
        }
        Err(e @ Error::InvalidToolArguments(_)) => {
            JsonRpcResponse::failure(id, error_codes::INVALID_PARAMS, e.to_string())
        }
        Err(e @ Error::InsufficientScope { .. }) => {
            JsonRpcResponse::failure(id, error_codes::INVALID_REQUEST, e.to_string())
        }
        Err(Error::Cancelled) => JsonRpcResponse::failure(
            id,
            error_codes::REQUEST_CANCELLED,
            "The request was cancelled",
        ),
        Err(e) => JsonRpcResponse::failure(id, error_codes::INTERNAL_ERROR, e.to_string()),
    }
}
