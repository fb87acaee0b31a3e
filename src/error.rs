//! Error types for the toolgate client and server.

use thiserror::Error;

/// Result type alias for toolgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for toolgate.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Configuration Errors =====
    #[error("Configuration error: missing required settings: {}", .0.join(", "))]
    MissingSettings(Vec<String>),

    #[error("Configuration error: {0}")]
    Config(String),

    // ===== Authentication Errors =====
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Device flow rejected: {0}")]
    DeviceFlowRejected(String),

    #[error("Device flow expired before authorization completed")]
    DeviceFlowExpired,

    // ===== Token Validation Errors =====
    #[error("Token validation error: token header carries no key id")]
    NoKeyId,

    #[error("Token validation error: key id {0:?} not present in the key set")]
    KeyNotFound(String),

    #[error("Token validation error: signature verification failed")]
    SignatureInvalid,

    #[error("Token validation error: audience mismatch")]
    AudienceMismatch,

    #[error("Token validation error: issuer mismatch")]
    IssuerMismatch,

    #[error("Token validation error: token is expired")]
    TokenExpired,

    #[error("Token validation error: {0}")]
    TokenInvalid(String),

    // ===== Protocol Errors =====
    #[error("MCP protocol error: {0}")]
    McpProtocol(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidToolArguments(String),

    #[error("Insufficient scope: handler requires {required:?}")]
    InsufficientScope { required: String },

    // ===== Application Errors =====
    #[error("Tool rejected the call: {0}")]
    ToolRejected(String),

    // ===== I/O and Network Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timeout: operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Cancelled: operation was cancelled")]
    Cancelled,
}

impl Error {
    /// True for validation failures that must reject the request but carry
    /// a reason worth logging (never retried automatically).
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::NoKeyId
                | Self::KeyNotFound(_)
                | Self::SignatureInvalid
                | Self::AudienceMismatch
                | Self::IssuerMismatch
                | Self::TokenExpired
                | Self::TokenInvalid(_)
        )
    }

    /// Check if this error is retriable (transient failures).
    ///
    /// The crate never retries on its own; callers use this to decide.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}
