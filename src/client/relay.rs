//! Terminal-friendly rendering of progress notifications.

use std::time::{Duration, Instant};

use crate::mcp::progress::ProgressParams;

/// Default minimum spacing between rendered frames.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Turns a stream of progress events into display frames, throttled by
/// wall clock so a chatty tool does not flood the terminal.
///
/// Throttling applies to rendering only; callers observing the raw events
/// still see every one. The first event of an invocation and the terminal
/// event of a bounded one are always rendered, and the terminal event
/// resets the relay for the next invocation.
pub struct ProgressRelay {
    min_interval: Duration,
    last_frame: Option<Instant>,
    active: bool,
}

impl Default for ProgressRelay {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_INTERVAL)
    }
}

impl ProgressRelay {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_frame: None,
            active: false,
        }
    }

    /// Observe one event, returning a frame when it should be shown.
    pub fn observe(&mut self, event: &ProgressParams) -> Option<String> {
        let first = !self.active;
        let terminal = event.is_final();
        let now = Instant::now();

        if !first && !terminal {
            if let Some(last) = self.last_frame {
                if now.duration_since(last) < self.min_interval {
                    return None;
                }
            }
        }

        if terminal {
            self.active = false;
            self.last_frame = None;
        } else {
            self.active = true;
            self.last_frame = Some(now);
        }

        Some(Self::format(event))
    }

    fn format(event: &ProgressParams) -> String {
        let status = event.message.as_deref().unwrap_or("");
        match event.total {
            Some(total) if total > 0 => {
                let percent = (event.progress * 100) / total;
                format!("[{:>3}%] {}/{} {status}", percent, event.progress, total)
            }
            _ => format!("[....] {} {status}", event.progress),
        }
    }
}
