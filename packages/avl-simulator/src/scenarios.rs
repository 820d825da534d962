//! scenarios.rs — Injectable terminal faults for bench-testing the time-sync service
//!
//! Each scenario reproduces one failure mode seen (or feared) in the field:
//! - clock_skew: the station RTC drifted; the service must step the clock
//! - stale: the terminal keeps re-sending its last fix; the watchdog must trip
//! - empty_batch: terminal flushes with zero records; must still be acked
//! - garbage / foreign_codec: undecodable payloads; must be dropped, no ack

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    /// Fresh fixes, timestamps track the simulator's clock
    Nominal,
    /// GPS time offset from the simulator's clock by `clock_skew_secs`
    ClockSkew,
    /// Fix time freezes after `stale_after_frames` frames
    Stale,
    /// Frames with zero records
    EmptyBatch,
    /// Random bytes that cannot decode
    Garbage,
    /// Well-formed frame carrying a codec id other than 8
    ForeignCodec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub kind: ScenarioType,
    pub clock_skew_secs: f64,
    pub stale_after_frames: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            kind: ScenarioType::Nominal,
            clock_skew_secs: 0.0,
            stale_after_frames: 3,
        }
    }
}

impl ScenarioConfig {
    /// Whether the service is expected to ack frames produced under this scenario.
    pub fn expects_ack(&self) -> bool {
        !matches!(self.kind, ScenarioType::Garbage | ScenarioType::ForeignCodec)
    }

    /// Offset applied to GPS time, milliseconds.
    pub fn skew_ms(&self) -> i64 {
        if self.kind == ScenarioType::ClockSkew {
            (self.clock_skew_secs * 1000.0).round() as i64
        } else {
            0
        }
    }

    /// True once the stale scenario has frozen the fix time.
    pub fn is_frozen(&self, frame_index: u32) -> bool {
        self.kind == ScenarioType::Stale && frame_index >= self.stale_after_frames
    }
}

/// Preset parameters for a scenario picked from the command line.
pub fn preset(kind: ScenarioType) -> ScenarioConfig {
    match kind {
        ScenarioType::ClockSkew => ScenarioConfig { kind, clock_skew_secs: 120.0, ..Default::default() },
        ScenarioType::Stale => ScenarioConfig { kind, stale_after_frames: 3, ..Default::default() },
        _ => ScenarioConfig { kind, ..Default::default() },
    }
}
