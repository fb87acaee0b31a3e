//! Tool handlers and the server-side registry.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::AuthContext;
use crate::error::{Error, Result};
use crate::mcp::progress::ProgressReporter;
use crate::mcp::protocol::{ContentBlock, Tool, ToolResult};

/// Per-invocation context handed to a running tool: progress reporting,
/// cooperative cancellation, and the verified caller identity (absent
/// when the server runs without authentication).
#[derive(Clone)]
pub struct ToolContext {
    pub reporter: Option<ProgressReporter>,
    pub cancel: CancellationToken,
    pub auth: Option<Arc<AuthContext>>,
}

impl ToolContext {
    /// A context with no progress channel, no caller, and a token nobody
    /// cancels. Used by direct invocations and tests.
    pub fn detached() -> Self {
        Self {
            reporter: None,
            cancel: CancellationToken::new(),
            auth: None,
        }
    }

    /// Fail fast if the invocation was cancelled. Tools call this at
    /// their step boundaries.
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Report progress when a caller is listening; a no-op otherwise.
    pub async fn progress(&self, progress: u64, total: Option<u64>, message: Option<String>) {
        if let Some(reporter) = &self.reporter {
            reporter.report(progress, total, message).await;
        }
    }
}

/// Handler for MCP tool calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> Tool;

    /// Scopes a caller must hold to invoke this tool. Empty means any
    /// authenticated caller (or anyone, when auth is off).
    fn required_scopes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: HashMap<String, Value>, ctx: ToolContext)
        -> Result<ToolResult>;
}

/// Registry of tool handlers.
///
/// Dispatch enforces existence and scope before the handler sees the
/// request, so a handler can assume an authorized caller.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool handler.
    pub fn register<T: ToolHandler + 'static>(&mut self, handler: T) {
        let tool = handler.definition();
        debug!(tool = %tool.name, "Registered tool");
        self.tools.insert(tool.name.clone(), Arc::new(handler));
    }

    /// Get all registered tools.
    pub fn list_tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.tools.values().map(|h| h.definition()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Dispatch one invocation: resolve the handler, check scopes against
    /// the caller, then run it.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: HashMap<String, Value>,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let handler = self
            .tools
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;

        if let Some(auth) = &ctx.auth {
            for scope in handler.required_scopes() {
                if !auth.has_scope(&scope) {
                    warn!(tool = %name, subject = %auth.subject, scope = %scope, "Caller lacks scope");
                    return Err(Error::InsufficientScope { required: scope });
                }
            }
        }

        handler.execute(arguments, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper to create a text content block.
pub fn text_content(text: impl Into<String>) -> ContentBlock {
    ContentBlock::Text { text: text.into() }
}

/// Helper to create a successful tool result.
pub fn success_result(text: impl Into<String>, structured: Option<Value>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        structured_content: structured,
        is_error: false,
    }
}

/// Helper to create an error tool result.
pub fn error_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        structured_content: None,
        is_error: true,
    }
}

/// Helper to extract a required string argument.
pub fn get_string_arg(args: &HashMap<String, Value>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| Error::InvalidToolArguments(format!("Missing required argument: {name}")))
}

/// Helper to extract a required integer argument.
pub fn get_int_arg(args: &HashMap<String, Value>, name: &str) -> Result<i64> {
    args.get(name)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::InvalidToolArguments(format!("Missing required argument: {name}")))
}
