//! # clock
//!
//! System clock correction from GPS time.
//!
//! All OS side effects go through [`ClockWriter`]; the corrector itself only
//! decides *whether* to step the clock. On the station the writer shells out
//! to `date -u` and `hwclock -w` (busybox syntax), which is what the rest of
//! the field tooling expects. Writers block, so the corrector runs them on
//! tokio's blocking pool.

use std::process::Command;
use std::sync::Arc;

use chrono::DateTime;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::selector::Fix;

// ── Clock writer seam ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("timestamp {0} is not representable as a calendar time")]
    InvalidTimestamp(f64),

    #[error("could not run `{program}`: {source}")]
    Spawn { program: &'static str, source: std::io::Error },

    #[error("`{program}` exited with {code:?}: {stderr}")]
    CommandFailed { program: &'static str, code: Option<i32>, stderr: String },
}

/// Blocking clock side effects. Shared with the blocking pool, hence `Sync`.
pub trait ClockWriter: Send + Sync {
    /// Step the wall clock to `timestamp` (seconds since epoch, UTC).
    fn set_wall_clock(&self, timestamp: f64) -> Result<(), ClockError>;
    /// Copy the wall clock into the hardware RTC.
    fn sync_hardware_clock(&self) -> Result<(), ClockError>;
}

/// Argument for `date -u`: `MMDDhhmmYYYY.SS`, sub-second part dropped.
pub fn date_argument(timestamp: f64) -> Result<String, ClockError> {
    if !timestamp.is_finite() {
        return Err(ClockError::InvalidTimestamp(timestamp));
    }
    let when = DateTime::from_timestamp(timestamp.floor() as i64, 0)
        .ok_or(ClockError::InvalidTimestamp(timestamp))?;
    Ok(when.format("%m%d%H%M%Y.%S").to_string())
}

/// Writes the real clocks. Needs CAP_SYS_TIME (normally: runs as root).
pub struct SystemClock;

impl SystemClock {
    fn run(program: &'static str, args: &[&str]) -> Result<(), ClockError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| ClockError::Spawn { program, source })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ClockError::CommandFailed {
                program,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl ClockWriter for SystemClock {
    fn set_wall_clock(&self, timestamp: f64) -> Result<(), ClockError> {
        let arg = date_argument(timestamp)?;
        Self::run("date", &["-u", &arg])
    }

    fn sync_hardware_clock(&self) -> Result<(), ClockError> {
        Self::run("hwclock", &["-w"])
    }
}

/// Logs what would have been done. Used with `--dry-run` on the bench.
pub struct DryRunClock;

impl ClockWriter for DryRunClock {
    fn set_wall_clock(&self, timestamp: f64) -> Result<(), ClockError> {
        info!("[dry-run] date -u {}", date_argument(timestamp)?);
        Ok(())
    }

    fn sync_hardware_clock(&self) -> Result<(), ClockError> {
        info!("[dry-run] hwclock -w");
        Ok(())
    }
}

// ── Corrector ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionOutcome {
    /// Drift within tolerance, clock untouched
    WithinTolerance,
    /// Wall clock stepped to GPS time
    Corrected,
    /// Drift exceeded tolerance but the clock write failed
    CorrectionFailed,
    /// Frame carried no records; nothing to compare against
    NoFix,
}

impl CorrectionOutcome {
    /// True when the fix disagreed with the local clock by more than the tolerance.
    pub fn drift_exceeded(&self) -> bool {
        matches!(self, Self::Corrected | Self::CorrectionFailed)
    }
}

pub struct ClockCorrector {
    writer: Arc<dyn ClockWriter>,
    tolerance_secs: f64,
    sync_hardware_clock: bool,
}

impl ClockCorrector {
    pub fn new(writer: Arc<dyn ClockWriter>, tolerance_secs: f64, sync_hardware_clock: bool) -> Self {
        Self { writer, tolerance_secs, sync_hardware_clock }
    }

    /// Step the clock to the fix when `|now - fix.timestamp|` exceeds the
    /// tolerance. Exactly the tolerance does not trigger. Never fails.
    pub async fn maybe_correct(&self, fix: &Fix, now: f64) -> CorrectionOutcome {
        if fix.is_none() {
            return CorrectionOutcome::NoFix;
        }

        let delta = (now - fix.timestamp).abs();
        if delta <= self.tolerance_secs {
            return CorrectionOutcome::WithinTolerance;
        }

        let writer = Arc::clone(&self.writer);
        let timestamp = fix.timestamp;
        let hardware = self.sync_hardware_clock;
        match tokio::task::spawn_blocking(move || step_clock(writer.as_ref(), timestamp, hardware, delta)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(stage = "clock", delta, "Clock writer task failed: {e}");
                CorrectionOutcome::CorrectionFailed
            }
        }
    }
}

fn step_clock(writer: &dyn ClockWriter, timestamp: f64, hardware: bool, delta: f64) -> CorrectionOutcome {
    if let Err(e) = writer.set_wall_clock(timestamp) {
        error!(stage = "clock", delta, "System clock update failed: {e}");
        return CorrectionOutcome::CorrectionFailed;
    }
    info!(delta, "System clock updated to GPS time {:.3}", timestamp);

    if hardware {
        if let Err(e) = writer.sync_hardware_clock() {
            warn!(stage = "clock", "Hardware clock sync failed: {e}");
        }
    }
    CorrectionOutcome::Corrected
}

// ── Test double ───────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::testing::{ClockCall, RecordingClock};
    use super::*;

    fn fix_at(timestamp: f64) -> Fix {
        Fix { timestamp, ..Fix::NONE }
    }

    fn corrector(clock: &RecordingClock, hwclock: bool) -> ClockCorrector {
        ClockCorrector::new(Arc::new(clock.clone()), 10.0, hwclock)
    }

    #[tokio::test]
    async fn exactly_at_tolerance_does_not_correct() {
        let clock = RecordingClock::default();
        let c = corrector(&clock, true);
        assert_eq!(c.maybe_correct(&fix_at(1_000.0), 1_010.0).await, CorrectionOutcome::WithinTolerance);
        assert_eq!(c.maybe_correct(&fix_at(1_010.0), 1_000.0).await, CorrectionOutcome::WithinTolerance);
        assert!(clock.calls().is_empty());
    }

    #[tokio::test]
    async fn beyond_tolerance_sets_wall_then_hardware_clock() {
        let clock = RecordingClock::default();
        let c = corrector(&clock, true);
        assert_eq!(c.maybe_correct(&fix_at(1_000.0), 1_010.5).await, CorrectionOutcome::Corrected);
        assert_eq!(clock.calls(), vec![ClockCall::SetWall(1_000.0), ClockCall::SyncHardware]);
    }

    #[tokio::test]
    async fn clock_behind_gps_is_corrected_too() {
        let clock = RecordingClock::default();
        let c = corrector(&clock, false);
        assert_eq!(c.maybe_correct(&fix_at(5_000.0), 100.0).await, CorrectionOutcome::Corrected);
        assert_eq!(clock.calls(), vec![ClockCall::SetWall(5_000.0)]);
    }

    #[tokio::test]
    async fn write_failure_is_reported_not_raised() {
        let clock = RecordingClock { fail_wall: true, ..Default::default() };
        let c = corrector(&clock, true);
        let outcome = c.maybe_correct(&fix_at(0.0), 3_600.0).await;
        assert_eq!(outcome, CorrectionOutcome::CorrectionFailed);
        assert!(outcome.drift_exceeded());
        // No hardware sync after a failed wall-clock write
        assert_eq!(clock.calls(), vec![ClockCall::SetWall(0.0)]);
    }

    #[tokio::test]
    async fn sentinel_fix_never_touches_clock() {
        let clock = RecordingClock::default();
        let c = corrector(&clock, true);
        assert_eq!(c.maybe_correct(&Fix::NONE, 1_700_000_000.0).await, CorrectionOutcome::NoFix);
        assert!(clock.calls().is_empty());
    }

    #[tokio::test]
    async fn writer_runs_off_the_async_thread() {
        use std::sync::Mutex;
        use std::thread::{self, ThreadId};

        #[derive(Default)]
        struct ThreadTrackingClock(Mutex<Option<ThreadId>>);

        impl ClockWriter for ThreadTrackingClock {
            fn set_wall_clock(&self, _: f64) -> Result<(), ClockError> {
                *self.0.lock().unwrap() = Some(thread::current().id());
                Ok(())
            }

            fn sync_hardware_clock(&self) -> Result<(), ClockError> {
                Ok(())
            }
        }

        let clock = Arc::new(ThreadTrackingClock::default());
        let c = ClockCorrector::new(clock.clone(), 10.0, true);
        assert_eq!(c.maybe_correct(&fix_at(0.0), 3_600.0).await, CorrectionOutcome::Corrected);
        let ran_on = clock.0.lock().unwrap().expect("writer called");
        assert_ne!(ran_on, thread::current().id());
    }

    #[test]
    fn date_argument_uses_busybox_layout() {
        // 2019-06-10T10:04:46.900Z
        assert_eq!(date_argument(1_560_161_086.9).unwrap(), "061010042019.46");
        assert!(date_argument(f64::NAN).is_err());
    }
}
