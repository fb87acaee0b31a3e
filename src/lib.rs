//! Toolgate - Authenticated Remote Tool Invocation
//!
//! A bearer-authenticated MCP tool server and client. The client acquires an
//! OAuth2 token through the device-code flow (with a persisted, silently
//! refreshed credential cache), attaches it to every request, and invokes
//! named tools while streaming progress updates. The server validates tokens
//! against a remote JWKS, enforces per-tool scopes, and relays progress
//! events back over the invocation's response stream.
//!
//! # Architecture
//!
//! 1. **Auth Layer** (`auth`) - token cache, device-code acquisition, JWKS
//!    resolution and bearer verification
//! 2. **MCP Layer** (`mcp`) - JSON-RPC protocol types, tool registry,
//!    progress reporting
//! 3. **Client Layer** (`client`) - HTTP/SSE transport, tool invocation,
//!    progress relay
//! 4. **HTTP Layer** (`http`) - axum server with bearer middleware and
//!    streamed tool-call responses
//! 5. **Tools Layer** (`tools`) - sample tool handlers exercising the
//!    protocol

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod mcp;
pub mod tools;

pub use error::{Error, Result};

/// Server and client version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name reported during the initialize handshake.
pub const SERVER_NAME: &str = "toolgate";
