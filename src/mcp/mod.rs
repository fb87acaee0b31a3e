//! MCP (Model Context Protocol) implementation: wire types, progress
//! reporting, and the tool registry.

pub mod handler;
pub mod progress;
pub mod protocol;

pub use handler::{ToolContext, ToolHandler, ToolRegistry};
pub use progress::{ProgressParams, ProgressReporter, ProgressToken};
pub use protocol::{
    CallToolParams, ContentBlock, InitializeResult, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, RequestId, ServerCapabilities, ServerInfo,
    Tool, ToolResult, JSONRPC_VERSION, MCP_VERSION,
};
