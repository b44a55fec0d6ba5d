//! End-to-end scenario tests (spec.md §8, numbered scenarios 1-5).
//!
//! Each scenario chains the pieces a real tick would call in sequence —
//! threshold evaluation, anomaly detection, composite evaluation, and the
//! alert state machine — through the crate's public API, rather than
//! exercising any one component in isolation. Scenario 6 (channel
//! isolation) lives in `tests/dispatch_isolation.rs` since it exercises the
//! notification dispatcher instead of the alert pipeline.

use sairen_sentry::alert_state::{AlertPolicy, AlertStateMachine, Classification, Decision};
use sairen_sentry::anomaly::{self, Point};
use sairen_sentry::composite::{self, RuleFile};
use sairen_sentry::threshold::{self, TransitionState};
use sairen_sentry::types::{AlertKey, AnomalyConfig, Direction, Reading, Severity, Status, ThresholdConfig};
use std::collections::HashMap;

fn cpu_threshold() -> ThresholdConfig {
    ThresholdConfig {
        warning: 70.0,
        critical: 85.0,
        direction: Direction::GreaterIsBad,
        hysteresis: 5.0,
        min_consecutive: 1,
    }
}

fn classify(status: Status) -> Classification {
    match status {
        Status::Ok | Status::Unknown => Classification::Ok,
        Status::Warning => Classification::NonOk(Severity::Warning),
        Status::Critical => Classification::NonOk(Severity::Critical),
    }
}

/// Scenario 1: CPU warning emission, then cooldown suppression.
/// cpu warning=70 critical=85 cooldown=300 min_consecutive=1.
/// Readings: 50, 65, 75, 78, 77 -> tick 3 emits WARNING, ticks 4-5 suppressed.
#[test]
fn scenario_1_cpu_warning_then_cooldown() {
    let tcfg = cpu_threshold();
    let mut tstate = TransitionState::new();
    let machine = AlertStateMachine::load(tempfile::tempdir().unwrap().path().join("state.json"));
    let key = AlertKey::Plugin("cpu".to_string());
    let policy = AlertPolicy {
        cooldown_seconds: 300,
        min_consecutive: 1,
        recovery_enabled: true,
    };

    let readings = [(0_i64, 50.0), (60, 65.0), (120, 75.0), (180, 78.0), (240, 77.0)];
    let mut decisions = Vec::new();
    for (ts, value) in readings {
        let reading = Reading::new("cpu", ts, value);
        let status = threshold::evaluate(&reading, &tcfg, &mut tstate);
        let decision = machine.decide(&key, classify(status), ts, false, &policy).unwrap();
        decisions.push(decision);
    }

    assert_eq!(decisions[0], Decision::None);
    assert_eq!(decisions[1], Decision::None);
    assert_eq!(decisions[2], Decision::Alert(Severity::Warning));
    assert_eq!(decisions[3], Decision::None);
    assert_eq!(decisions[4], Decision::None);
}

/// Scenario 2: escalation from WARNING to CRITICAL emits a new event even
/// though the key is already firing.
/// Readings: 75, 80, 88, 90 with warning=70 critical=85.
#[test]
fn scenario_2_escalation_emits_new_event() {
    let tcfg = cpu_threshold();
    let mut tstate = TransitionState::new();
    let machine = AlertStateMachine::load(tempfile::tempdir().unwrap().path().join("state.json"));
    let key = AlertKey::Plugin("cpu".to_string());
    let policy = AlertPolicy {
        cooldown_seconds: 300,
        min_consecutive: 1,
        recovery_enabled: true,
    };

    let readings = [(0_i64, 75.0), (60, 80.0), (120, 88.0), (180, 90.0)];
    let mut decisions = Vec::new();
    for (ts, value) in readings {
        let reading = Reading::new("cpu", ts, value);
        let status = threshold::evaluate(&reading, &tcfg, &mut tstate);
        decisions.push(machine.decide(&key, classify(status), ts, false, &policy).unwrap());
    }

    assert_eq!(decisions[0], Decision::Alert(Severity::Warning));
    assert_eq!(decisions[1], Decision::None);
    assert_eq!(decisions[2], Decision::Alert(Severity::Critical));
    assert_eq!(decisions[3], Decision::None);
}

/// Scenario 3: recovery with min_consecutive=2 and the hysteresis boundary.
/// warning=70, hysteresis=5 => de-escalation boundary is 65 (inclusive).
/// Readings: 80 (warning fires), 65, 64, 63 (recovery after 2 consecutive
/// below-boundary ticks), then one more tick ages the key into NORMAL.
#[test]
fn scenario_3_recovery_with_hysteresis_boundary() {
    let tcfg = cpu_threshold();
    let mut tstate = TransitionState::new();
    let machine = AlertStateMachine::load(tempfile::tempdir().unwrap().path().join("state.json"));
    let key = AlertKey::Plugin("cpu".to_string());
    let policy = AlertPolicy {
        cooldown_seconds: 300,
        min_consecutive: 2,
        recovery_enabled: true,
    };

    let fire = Reading::new("cpu", 0, 80.0);
    let fire_status = threshold::evaluate(&fire, &tcfg, &mut tstate);
    assert_eq!(
        machine.decide(&key, classify(fire_status), 0, false, &policy).unwrap(),
        Decision::Alert(Severity::Warning)
    );

    // 65 already crosses the inclusive hysteresis boundary (70 - 5 = 65).
    let readings = [(60_i64, 65.0), (120, 64.0), (180, 63.0)];
    let mut decisions = Vec::new();
    for (ts, value) in readings {
        let reading = Reading::new("cpu", ts, value);
        let status = threshold::evaluate(&reading, &tcfg, &mut tstate);
        decisions.push(machine.decide(&key, classify(status), ts, false, &policy).unwrap());
    }
    assert_eq!(decisions[0], Decision::None);
    assert_eq!(decisions[1], Decision::Recovery);
    assert_eq!(decisions[2], Decision::None);
    assert_eq!(machine.snapshot(&key).status, sairen_sentry::alert_state::AlertStatus::Normal);
}

/// Scenario 4: composite rule `(cpu.value > 90 OR memory.value > 95) AND
/// disk.value > 90`, cooldown=600. Readings: cpu=92, memory=50, disk=91.
/// Fires exactly once; the next tick with the same readings is suppressed.
#[test]
fn scenario_4_composite_rule_fires_once() {
    let rule = composite::CompositeRule::from_file(
        "disk-and-cpu",
        RuleFile {
            name: "disk-and-cpu".to_string(),
            description: String::new(),
            enabled: true,
            severity: Severity::Warning,
            cooldown: 600,
            rule: "(cpu.value > 90 OR memory.value > 95) AND disk.value > 90".to_string(),
            notify_on_trigger: true,
            notify_on_recovery: false,
            notification_message: String::new(),
        },
    )
    .unwrap();

    let mut readings = HashMap::new();
    readings.insert("cpu".to_string(), Reading::new("cpu", 0, 92.0));
    readings.insert("memory".to_string(), Reading::new("memory", 0, 50.0));
    readings.insert("disk".to_string(), Reading::new("disk", 0, 91.0));

    assert!(rule.eval(&readings).fires());

    let machine = AlertStateMachine::load(tempfile::tempdir().unwrap().path().join("state.json"));
    let key = AlertKey::Composite("disk-and-cpu".to_string());
    let policy = AlertPolicy {
        cooldown_seconds: 600,
        min_consecutive: 1,
        recovery_enabled: false,
    };
    assert_eq!(
        machine
            .decide(&key, Classification::NonOk(Severity::Warning), 0, false, &policy)
            .unwrap(),
        Decision::Alert(Severity::Warning)
    );
    assert_eq!(
        machine
            .decide(&key, Classification::NonOk(Severity::Warning), 60, false, &policy)
            .unwrap(),
        Decision::None
    );
}

/// Scenario 5: anomaly z-score detection. Last 20 CPU values all in
/// [40..45] (mean ~42.5, stddev ~1.7); a new value of 60 with sigma=2.0
/// is an outlier-high. The same value with only 9 prior points is not,
/// since min_points (10) isn't satisfied.
#[test]
fn scenario_5_anomaly_zscore_outlier() {
    let acfg = AnomalyConfig {
        enabled: true,
        sensitivity: 2.0,
        window: 20,
        min_points: 10,
        detect_trends: true,
        detect_spikes: true,
        consecutive_threshold: 3,
        cooldown_seconds: 1800,
        trend_slope_threshold: 2.0,
    };

    let window: Vec<Point> = [40.0, 41.0, 42.0, 43.0, 44.0, 45.0, 41.0, 42.0, 43.0, 44.0, 40.0, 41.0, 42.0, 43.0, 44.0, 45.0, 41.0, 42.0, 43.0, 44.0]
        .into_iter()
        .map(|value| Point { value })
        .collect();
    assert_eq!(window.len(), 20);

    let verdict = anomaly::detect(&window, 60.0, &acfg);
    assert!(verdict.is_anomaly);
    assert!(verdict.z_score.abs() > acfg.sensitivity);
    assert!(verdict.types.contains(&sairen_sentry::types::AnomalyType::OutlierHigh));

    let short_window: Vec<Point> = window[..9].to_vec();
    let verdict_short = anomaly::detect(&short_window, 60.0, &acfg);
    assert!(!verdict_short.is_anomaly);
}
