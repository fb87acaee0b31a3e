//! Progress notifications for long-running tool calls.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::mcp::protocol::JsonRpcNotification;

/// Method name of the progress notification.
pub const PROGRESS_METHOD: &str = "notifications/progress";

/// Opaque token correlating progress notifications with the originating
/// request (can be string or number, per JSON-RPC ids).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ProgressToken {
    String(String),
    Number(i64),
}

/// Payload of a `notifications/progress` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressParams {
    #[serde(rename = "progressToken")]
    pub progress_token: ProgressToken,
    /// Completed units so far. Monotonically non-decreasing within one
    /// invocation.
    pub progress: u64,
    /// Total units, when the tool knows it up front.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Human-readable status line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressParams {
    /// Whether this is the terminal event of a bounded operation.
    pub fn is_final(&self) -> bool {
        matches!(self.total, Some(total) if self.progress >= total)
    }

    pub fn into_notification(self) -> JsonRpcNotification {
        JsonRpcNotification::new(
            PROGRESS_METHOD,
            Some(serde_json::to_value(self).unwrap_or_default()),
        )
    }
}

/// Sends progress events from a running tool to whoever is streaming the
/// response. Cloneable; every clone reports under the same token.
///
/// Reporting never blocks the tool and never fails it: when the receiver
/// is gone (the caller went away) events are dropped silently.
#[derive(Clone)]
pub struct ProgressReporter {
    token: ProgressToken,
    sender: mpsc::Sender<ProgressParams>,
}

impl ProgressReporter {
    pub fn new(token: ProgressToken, sender: mpsc::Sender<ProgressParams>) -> Self {
        Self { token, sender }
    }

    /// Report completed/total units with an optional status message.
    pub async fn report(&self, progress: u64, total: Option<u64>, message: Option<String>) {
        let params = ProgressParams {
            progress_token: self.token.clone(),
            progress,
            total,
            message,
        };
        if self.sender.send(params).await.is_err() {
            debug!("Progress receiver dropped, discarding event");
        }
    }
}
