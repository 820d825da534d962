//! # events
//!
//! Link events for external remediation. The service itself never touches
//! the modem; a supervisor tails this JSON-lines file and power-cycles the
//! terminal when it sees `LINK_BLOCKED`.

use std::path::PathBuf;

use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkEventType {
    LinkBlocked,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkEvent {
    pub event: LinkEventType,
    /// Wall-clock time the event was raised, ms since epoch
    pub timestamp_ms: i64,
    /// GPS time of the fix that tripped the watchdog
    pub fix_timestamp: f64,
    /// |local - GPS| in seconds
    pub delta_secs: f64,
    pub stale_cycles: u32,
}

/// Append-only sink. Without a configured file, events only reach the log.
pub struct LinkEventSink {
    path: Option<PathBuf>,
}

impl LinkEventSink {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Append one event. Failures are logged and swallowed.
    pub async fn publish(&self, event: &LinkEvent) {
        let Some(path) = &self.path else {
            info!("Link event {:?} (no event file configured)", event.event);
            return;
        };

        let line = match serde_json::to_string(event) {
            Ok(l) => format!("{l}\n"),
            Err(e) => {
                warn!("Link event: failed to serialize: {e}");
                return;
            }
        };

        match OpenOptions::new().create(true).append(true).open(path).await {
            Ok(mut f) => {
                if let Err(e) = f.write_all(line.as_bytes()).await {
                    warn!("Link event: write to {} failed: {e}", path.display());
                }
            }
            Err(e) => warn!("Link event: could not open {}: {e}", path.display()),
        }
    }
}
