use std::path::PathBuf;

use tracing::debug;

/// Whether the service should be receiving at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Active,
    Waiting,
}

const ACTIVE_DIRECTIVE: &[u8] = b"active";

/// Reads the station's mode directive fresh on every call.
///
/// The defaults are intentionally asymmetric and match what the station
/// scripts rely on: a missing, unreadable or empty file means `Active`, but
/// a readable first line other than `active` means `Waiting`.
pub struct ControlGate {
    path: PathBuf,
}

impl ControlGate {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn current_mode(&self) -> ControlMode {
        match tokio::fs::read(&self.path).await {
            Ok(contents) => parse_directive(&contents),
            Err(e) => {
                debug!(path = %self.path.display(), "Control file unreadable ({e}), assuming active");
                ControlMode::Active
            }
        }
    }
}

/// Map control-file contents to a mode. Exact, case-sensitive byte match on
/// the first line with its newline removed; the file need not be UTF-8.
pub fn parse_directive(contents: &[u8]) -> ControlMode {
    if contents.is_empty() {
        return ControlMode::Active;
    }
    let first = contents.split(|&b| b == b'\n').next().unwrap_or_default();
    if first == ACTIVE_DIRECTIVE {
        ControlMode::Active
    } else {
        ControlMode::Waiting
    }
}
