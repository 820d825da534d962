//! # watchdog
//!
//! Stale-link detection. A terminal whose GPS or uplink has wedged keeps
//! re-sending old fixes; their age relative to the (already corrected)
//! local clock grows without bound. When that age stays above the limit for
//! `stale_cycles_to_block` consecutive frames the link is declared blocked
//! and the state starts over, so the next frame only establishes a baseline.
//!
//! Blocking is advisory here: the verdict is logged and published as a link
//! event; power-cycling the modem is left to whoever consumes the event.

use tracing::{debug, warn};

use crate::selector::Fix;

/// Per-process link bookkeeping, owned by the service loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkState {
    pub last_fix_timestamp: f64,
    pub consecutive_stale_cycles: u32,
    pub is_first_cycle_since_reset: bool,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            last_fix_timestamp: 0.0,
            consecutive_stale_cycles: 0,
            is_first_cycle_since_reset: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// First frame after start or reset; recorded, not evaluated
    Baseline,
    Fresh,
    /// Over the age limit, not yet enough consecutive cycles to block
    Stale { consecutive: u32 },
    /// Link declared blocked; state has been reset
    Blocked { delta: f64, consecutive: u32 },
}

pub struct LinkWatchdog {
    stale_after_secs: f64,
    stale_cycles_to_block: u32,
}

impl LinkWatchdog {
    pub fn new(stale_after_secs: f64, stale_cycles_to_block: u32) -> Self {
        Self { stale_after_secs, stale_cycles_to_block: stale_cycles_to_block.max(1) }
    }

    /// Feed one decoded fix. Callers skip frames without records.
    pub fn observe(&self, state: &mut LinkState, fix: &Fix, now: f64) -> Verdict {
        let delta = (now - fix.timestamp).abs();

        if state.is_first_cycle_since_reset {
            state.is_first_cycle_since_reset = false;
            state.last_fix_timestamp = fix.timestamp;
            state.consecutive_stale_cycles = 0;
            debug!(delta, "Link baseline established");
            return Verdict::Baseline;
        }

        if delta <= self.stale_after_secs {
            state.last_fix_timestamp = fix.timestamp;
            state.consecutive_stale_cycles = 0;
            return Verdict::Fresh;
        }

        state.consecutive_stale_cycles += 1;
        let consecutive = state.consecutive_stale_cycles;
        if consecutive < self.stale_cycles_to_block {
            debug!(delta, consecutive, "Stale GPS fix");
            return Verdict::Stale { consecutive };
        }

        warn!(
            delta,
            consecutive,
            last_fix = state.last_fix_timestamp,
            "GPS link is apparently blocked"
        );
        *state = LinkState::default();
        Verdict::Blocked { delta, consecutive }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: f64 = 1_700_000_000.0;

    /// Run fixes aged `deltas` seconds, one per cycle, against a fixed clock.
    fn run(watchdog: &LinkWatchdog, state: &mut LinkState, deltas: &[f64]) -> Vec<Verdict> {
        deltas
            .iter()
            .map(|age| {
                let fix = Fix { timestamp: NOW - age, ..Fix::NONE };
                watchdog.observe(state, &fix, NOW)
            })
            .collect()
    }

    #[test]
    fn third_cycle_over_limit_blocks_and_resets() {
        let watchdog = LinkWatchdog::new(60.0, 1);
        let mut state = LinkState::default();
        let verdicts = run(&watchdog, &mut state, &[5.0, 5.0, 70.0]);
        assert_eq!(verdicts[0], Verdict::Baseline);
        assert_eq!(verdicts[1], Verdict::Fresh);
        assert_eq!(verdicts[2], Verdict::Blocked { delta: 70.0, consecutive: 1 });
        assert_eq!(state, LinkState::default());
    }

    #[test]
    fn cycle_after_reset_is_never_blocked() {
        let watchdog = LinkWatchdog::new(60.0, 1);
        let mut state = LinkState::default();
        let verdicts = run(&watchdog, &mut state, &[5.0, 70.0, 500.0, 500.0]);
        assert!(matches!(verdicts[1], Verdict::Blocked { .. }));
        assert_eq!(verdicts[2], Verdict::Baseline);
        assert!(matches!(verdicts[3], Verdict::Blocked { .. }));
    }

    #[test]
    fn stale_first_cycle_is_only_a_baseline() {
        let watchdog = LinkWatchdog::new(60.0, 1);
        let mut state = LinkState::default();
        assert_eq!(run(&watchdog, &mut state, &[3_600.0]), vec![Verdict::Baseline]);
        assert!(!state.is_first_cycle_since_reset);
        assert_eq!(state.last_fix_timestamp, NOW - 3_600.0);
    }

    #[test]
    fn exactly_at_limit_is_fresh() {
        let watchdog = LinkWatchdog::new(60.0, 1);
        let mut state = LinkState::default();
        let verdicts = run(&watchdog, &mut state, &[0.0, 60.0]);
        assert_eq!(verdicts[1], Verdict::Fresh);
        assert_eq!(state.last_fix_timestamp, NOW - 60.0);
    }

    #[test]
    fn multi_cycle_threshold_needs_consecutive_stale_frames() {
        let watchdog = LinkWatchdog::new(60.0, 3);
        let mut state = LinkState::default();
        let verdicts = run(&watchdog, &mut state, &[1.0, 90.0, 90.0, 2.0, 90.0, 90.0, 90.0]);
        assert_eq!(
            verdicts,
            vec![
                Verdict::Baseline,
                Verdict::Stale { consecutive: 1 },
                Verdict::Stale { consecutive: 2 },
                Verdict::Fresh,
                Verdict::Stale { consecutive: 1 },
                Verdict::Stale { consecutive: 2 },
                Verdict::Blocked { delta: 90.0, consecutive: 3 },
            ]
        );
    }

    #[test]
    fn future_fixes_count_by_magnitude() {
        let watchdog = LinkWatchdog::new(60.0, 1);
        let mut state = LinkState::default();
        let verdicts = run(&watchdog, &mut state, &[0.0, -61.0]);
        assert!(matches!(verdicts[1], Verdict::Blocked { .. }));
    }
}
