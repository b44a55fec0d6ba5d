//! Threshold Evaluator (spec.md §4.3, component C3).
//!
//! A pure function of `(Reading, ThresholdConfig, prior TransitionState)` —
//! no I/O, no async, nothing shared. The caller (the Scheduler) owns the
//! per-plugin `TransitionState` and threads it through tick to tick.

use crate::types::{Direction, Reading, Status, ThresholdConfig};

/// Tracks the band a series last settled in, how many consecutive samples
/// have been seen in whatever band is being approached, and when the last
/// transition happened — the state a hysteresis/consecutive-sample policy
/// needs to remember between ticks.
#[derive(Debug, Clone)]
pub struct TransitionState {
    pub current: Status,
    pub last_transition_at: Option<i64>,
    /// Consecutive samples observed in `pending`, the band one escalation
    /// step away from `current`.
    pending: Option<Status>,
    pending_count: u32,
}

impl Default for TransitionState {
    fn default() -> Self {
        Self {
            current: Status::Ok,
            last_transition_at: None,
            pending: None,
            pending_count: 0,
        }
    }
}

impl TransitionState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Raw band a value falls in before hysteresis/consecutive-sample smoothing
/// is applied.
fn raw_band(value: f64, cfg: &ThresholdConfig) -> Status {
    match cfg.direction {
        Direction::GreaterIsBad => {
            if value >= cfg.critical {
                Status::Critical
            } else if value >= cfg.warning {
                Status::Warning
            } else {
                Status::Ok
            }
        }
        Direction::LessIsBad => {
            if value <= cfg.critical {
                Status::Critical
            } else if value <= cfg.warning {
                Status::Warning
            } else {
                Status::Ok
            }
        }
    }
}

/// Has `value` crossed back far enough (by the hysteresis band) to justify
/// de-escalating from `from` down through `to`?
fn crossed_hysteresis(value: f64, from: Status, to: Status, cfg: &ThresholdConfig) -> bool {
    let level = match (from, to) {
        (Status::Critical, Status::Warning) | (Status::Critical, Status::Ok) => cfg.critical,
        (Status::Warning, Status::Ok) => cfg.warning,
        _ => return true,
    };
    match cfg.direction {
        Direction::GreaterIsBad => value <= level - cfg.hysteresis,
        Direction::LessIsBad => value >= level + cfg.hysteresis,
    }
}

/// Classify `reading` against `cfg`, updating `state` in place and returning
/// the status that should be reported for this tick.
///
/// UNKNOWN is reserved for readings whose primary value is absent (spec.md
/// §4.3 "Contract").
pub fn evaluate(reading: &Reading, cfg: &ThresholdConfig, state: &mut TransitionState) -> Status {
    let Some(value) = reading.value else {
        return Status::Unknown;
    };

    let raw = raw_band(value, cfg);

    let accepted = if raw > state.current {
        // Escalating: require min_consecutive samples in the new, higher band.
        if state.pending == Some(raw) {
            state.pending_count += 1;
        } else {
            state.pending = Some(raw);
            state.pending_count = 1;
        }
        if state.pending_count >= cfg.min_consecutive.max(1) {
            state.pending = None;
            state.pending_count = 0;
            raw
        } else {
            state.current
        }
    } else if raw < state.current {
        // De-escalating: require the hysteresis band to have been crossed.
        if crossed_hysteresis(value, state.current, raw, cfg) {
            state.pending = None;
            state.pending_count = 0;
            raw
        } else {
            state.current
        }
    } else {
        state.pending = None;
        state.pending_count = 0;
        state.current
    };

    if accepted != state.current {
        state.current = accepted;
        state.last_transition_at = Some(reading.timestamp);
    }
    state.current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ThresholdConfig {
        ThresholdConfig {
            warning: 70.0,
            critical: 85.0,
            direction: Direction::GreaterIsBad,
            hysteresis: 5.0,
            min_consecutive: 1,
        }
    }

    fn reading_at(ts: i64, value: f64) -> Reading {
        Reading::new("cpu", ts, value)
    }

    #[test]
    fn missing_value_is_unknown() {
        let mut state = TransitionState::new();
        let mut r = reading_at(1, 0.0);
        r.value = None;
        assert_eq!(evaluate(&r, &cfg(), &mut state), Status::Unknown);
    }

    #[test]
    fn exactly_at_warning_level_is_warning_inclusive() {
        let mut state = TransitionState::new();
        assert_eq!(evaluate(&reading_at(1, 70.0), &cfg(), &mut state), Status::Warning);
    }

    #[test]
    fn exactly_at_critical_level_is_critical_inclusive() {
        let mut state = TransitionState::new();
        assert_eq!(evaluate(&reading_at(1, 85.0), &cfg(), &mut state), Status::Critical);
    }

    #[test]
    fn min_consecutive_holds_previous_level_until_satisfied() {
        let mut c = cfg();
        c.min_consecutive = 2;
        let mut state = TransitionState::new();
        assert_eq!(evaluate(&reading_at(1, 75.0), &c, &mut state), Status::Ok);
        assert_eq!(evaluate(&reading_at(2, 75.0), &c, &mut state), Status::Warning);
    }

    #[test]
    fn hysteresis_band_required_to_deescalate() {
        let mut state = TransitionState::new();
        evaluate(&reading_at(1, 80.0), &cfg(), &mut state);
        assert_eq!(state.current, Status::Warning);
        // 67 is below warning(70) but within the hysteresis band (70-5=65).
        assert_eq!(evaluate(&reading_at(2, 67.0), &cfg(), &mut state), Status::Warning);
        assert_eq!(evaluate(&reading_at(3, 64.0), &cfg(), &mut state), Status::Ok);
    }

    #[test]
    fn hysteresis_boundary_value_counts_as_crossed() {
        // spec.md §8 scenario 3: warning=70, hysteresis=5 => boundary=65.
        // A reading of exactly 65 must already count as crossed, not merely
        // readings strictly below it.
        let mut state = TransitionState::new();
        evaluate(&reading_at(1, 80.0), &cfg(), &mut state);
        assert_eq!(state.current, Status::Warning);
        assert_eq!(evaluate(&reading_at(2, 65.0), &cfg(), &mut state), Status::Ok);
    }

    #[test]
    fn less_is_bad_direction_reverses_comparisons() {
        let c = ThresholdConfig {
            warning: 20.0,
            critical: 10.0,
            direction: Direction::LessIsBad,
            hysteresis: 2.0,
            min_consecutive: 1,
        };
        let mut state = TransitionState::new();
        assert_eq!(evaluate(&reading_at(1, 15.0), &c, &mut state), Status::Warning);
        assert_eq!(evaluate(&reading_at(2, 5.0), &c, &mut state), Status::Critical);
    }

    #[test]
    fn escalation_scenario_from_spec() {
        // spec.md §8 scenario 2: 75, 80, 88, 90 with warning=70 critical=85.
        let mut state = TransitionState::new();
        assert_eq!(evaluate(&reading_at(1, 75.0), &cfg(), &mut state), Status::Warning);
        assert_eq!(evaluate(&reading_at(2, 80.0), &cfg(), &mut state), Status::Warning);
        assert_eq!(evaluate(&reading_at(3, 88.0), &cfg(), &mut state), Status::Critical);
        assert_eq!(evaluate(&reading_at(4, 90.0), &cfg(), &mut state), Status::Critical);
    }
}
