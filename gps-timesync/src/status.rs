//! # status
//!
//! Publishes the current fix to the two ramdisk files other station tasks
//! read. Both layouts are a fixed contract with those readers: field order,
//! padding and the six-decimal formatting must not change.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::warn;

use crate::clock::CorrectionOutcome;
use crate::selector::Fix;

/// Marks a status record whose fix disagreed with the local clock.
const DRIFT_MARKER: &str = "***";

#[derive(Debug, Error)]
#[error("status write to {path} failed: {source}")]
pub struct StatusError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

/// Human-readable status block. `delta` is local time minus GPS time.
pub fn format_status(fix: &Fix, delta: f64, outcome: CorrectionOutcome) -> String {
    let marker = if outcome.drift_exceeded() { DRIFT_MARKER } else { "" };
    format!(
        "Time delta (RTC - GPS): {delta:.6} {marker}\n\
         Lat, Lon:               {:.6}, {:.6}\n\
         Altitude:               {}\n\
         Angle:                  {}\n\
         Speed:                  {}\n\
         Satellites:             {}\n\
         Message priority:       {}\n",
        fix.latitude, fix.longitude, fix.altitude, fix.angle, fix.speed, fix.satellites, fix.priority,
    )
}

/// Machine-friendly `lat, lon, altitude` line.
pub fn format_position(fix: &Fix) -> String {
    format!("{:.6}, {:.6}, {}\n", fix.latitude, fix.longitude, fix.altitude)
}

pub struct StatusPublisher {
    status_file: PathBuf,
    position_file: PathBuf,
}

impl StatusPublisher {
    pub fn new(status_file: PathBuf, position_file: PathBuf) -> Self {
        Self { status_file, position_file }
    }

    /// Overwrite both sinks. Each failure is logged; the second file is
    /// written even if the first one failed.
    pub async fn publish(&self, fix: &Fix, delta: f64, outcome: CorrectionOutcome) -> Vec<StatusError> {
        let mut failures = Vec::new();
        let writes = [
            (&self.status_file, format_status(fix, delta, outcome)),
            (&self.position_file, format_position(fix)),
        ];
        for (path, contents) in writes {
            if let Err(e) = overwrite(path, &contents).await {
                warn!(stage = "status", "{e}");
                failures.push(e);
            }
        }
        failures
    }
}

async fn overwrite(path: &Path, contents: &str) -> Result<(), StatusError> {
    fs::write(path, contents)
        .await
        .map_err(|source| StatusError { path: path.to_path_buf(), source })
}
