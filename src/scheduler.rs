//! Scheduler / Supervisor (spec.md §4.8, component C8).
//!
//! Ties every other component into one tick: sample every registered
//! plugin, record history, evaluate threshold and anomaly status per
//! reading, evaluate composite rules once against the tick's readings,
//! decide through the Alert State Machine, and dispatch. Grounded on the
//! teacher's `JoinSet`-based task supervisor in `main.rs` (`task_set.spawn`
//! / `task_set.join_next()` under a shared `CancellationToken`) — the same
//! shape here fans out per-plugin threshold/anomaly evaluation instead of
//! per-packet pipeline stages, and the outer `tokio::select!` loop is
//! driven by `tokio::time::interval` rather than a packet channel.

use crate::alert_state::{is_silenced, AlertPolicy, AlertStateMachine, Classification, Decision};
use crate::anomaly::{self, AnomalyLog, Point};
use crate::clock::Clock;
use crate::composite::{self, CompositeRule, Tri};
use crate::config::RootConfig;
use crate::error::PluginError;
use crate::history::HistoryStore;
use crate::notifications::{Dispatcher, NotificationEvent};
use crate::plugins::PluginRegistry;
use crate::threshold::{self, TransitionState};
use crate::types::{
    AlertKey, AnomalyConfig, EventKind, Reading, Severity, SeriesKey, SourceKind, Status,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Summary of one tick. Used by the `check` CLI command to pick an exit
/// code (spec.md §6 "check") and by `run()` to log tick-budget overruns.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub worst_status: Option<Status>,
    pub plugin_errors: Vec<String>,
    pub alerts_fired: u32,
    pub recoveries_fired: u32,
    pub duration: Duration,
    /// Set when the tick overran its budget and outstanding per-plugin
    /// evaluations were cancelled before composite evaluation ran (spec.md
    /// §5 "Timeouts").
    pub partial: bool,
}

impl TickReport {
    /// Exit code per spec.md §6: 0 ok, 1 warning, 2 critical, 3 plugin error.
    pub fn exit_code(&self) -> i32 {
        if !self.plugin_errors.is_empty() {
            return 3;
        }
        match self.worst_status {
            Some(Status::Critical) => 2,
            Some(Status::Warning) => 1,
            _ => 0,
        }
    }
}

fn status_rank(s: Status) -> u8 {
    match s {
        Status::Ok | Status::Unknown => 0,
        Status::Warning => 1,
        Status::Critical => 2,
    }
}

fn worse(current: Option<Status>, candidate: Status) -> Option<Status> {
    match current {
        None => Some(candidate),
        Some(cur) if status_rank(candidate) > status_rank(cur) => Some(candidate),
        same => same,
    }
}

/// Per-series anomaly config: a `<plugin>.<metric>` override wins, then a
/// bare `<plugin>` override, then the configured default sensitivity
/// (spec.md §3 "Anomaly overrides").
fn anomaly_config_for(cfg: &RootConfig, key: &SeriesKey) -> AnomalyConfig {
    let qualified = format!("{}.{}", key.plugin_id, key.metric_name);
    if let Some(c) = cfg.anomaly_detection.overrides.get(&qualified) {
        return c.clone();
    }
    if let Some(c) = cfg.anomaly_detection.overrides.get(&key.plugin_id) {
        return c.clone();
    }
    AnomalyConfig {
        sensitivity: cfg.anomaly_detection.default_sensitivity,
        ..AnomalyConfig::default()
    }
}

/// Owns every long-lived engine component. Built once at startup from
/// `RootConfig`; the `plugins`/`composite_rules` sets are fixed for the
/// life of the process (spec.md §9 "Global mutable state" — a reload is a
/// restart).
pub struct Engine {
    plugins: PluginRegistry,
    history: HistoryStore,
    dispatcher: Dispatcher,
    alert_state: AlertStateMachine,
    composite_rules: Vec<CompositeRule>,
    anomaly_log: AnomalyLog,
    clock: Arc<dyn Clock>,
    threshold_states: Mutex<HashMap<SeriesKey, TransitionState>>,
    check_timeout: Duration,
    check_interval: Duration,
}

impl Engine {
    pub fn build(cfg: &RootConfig, clock: Arc<dyn Clock>) -> Self {
        let project_root = &cfg.state.project_root;
        let history = HistoryStore::new(crate::config::defaults::history_capacity())
            .with_persist_dir(project_root.join("logs").join("anomaly"));
        let alert_state = AlertStateMachine::load(project_root.join("alert_state.json"));
        let composite_rules = if cfg.composite_checks.enabled {
            let dir = project_root.join(&cfg.composite_checks.config_directory);
            match composite::load_rules_from_dir(&dir) {
                Ok(rules) => rules,
                Err(e) => {
                    warn!(error = %e, "failed to load composite rules, continuing with none");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Self {
            plugins: PluginRegistry::build(cfg),
            history,
            dispatcher: Dispatcher::new(cfg),
            alert_state,
            composite_rules,
            anomaly_log: AnomalyLog::new(project_root),
            clock,
            threshold_states: Mutex::new(HashMap::new()),
            check_timeout: Duration::from_secs(cfg.system.check_timeout),
            check_interval: Duration::from_secs(cfg.system.check_interval),
        }
    }

    /// Drop any composite rule that references an unknown plugin or
    /// undeclared attribute, logging why (spec.md §3 "Composite rule
    /// validation"). Called once after `build()`, before the first tick.
    pub async fn validate_composite_rules(&mut self) {
        let catalog = self.plugins.attribute_catalog().await;
        self.composite_rules.retain(|rule| match rule.validate_against(&catalog) {
            Ok(()) => true,
            Err(e) => {
                warn!(rule = %rule.id, error = %e, "dropping composite rule that failed validation");
                false
            }
        });
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        self.plugins.ids()
    }

    pub fn is_plugin_registered(&self, id: &str) -> bool {
        self.plugins.is_registered(id)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn alert_snapshot(&self, key: &AlertKey) -> crate::alert_state::AlertState {
        self.alert_state.snapshot(key)
    }

    /// Run a single plugin's check outside of the tick loop, for the
    /// `check --plugin NAME` CLI command.
    pub async fn check_plugin(&self, id: &str, now: i64) -> Result<Reading, PluginError> {
        let ctx = self.plugins.context(now);
        self.plugins.check_one(id, &ctx, self.check_timeout).await
    }

    /// Run one full tick: sample every plugin concurrently, evaluate
    /// threshold and anomaly status per reading, evaluate composite rules
    /// once against the tick's readings, decide and dispatch (spec.md §4.8
    /// "Tick"). Takes `self` behind an `Arc` so per-plugin evaluation can be
    /// fanned out on a `JoinSet`, mirroring the teacher's supervisor shape.
    pub async fn tick(self: &Arc<Self>) -> TickReport {
        self.tick_with_budget(self.check_interval).await
    }

    /// Run one tick, truncating it if it would still be running when
    /// `budget` elapses: outstanding per-plugin evaluations are aborted,
    /// composite evaluation is skipped, and the report comes back marked
    /// `partial` (spec.md §5 "Timeouts" — "a tick that would overrun the
    /// next tick's start is truncated").
    async fn tick_with_budget(self: &Arc<Self>, budget: Duration) -> TickReport {
        let start = Instant::now();
        let deadline = start + budget;
        let now = self.clock.now();
        let cfg = crate::config::get();
        let mut report = TickReport::default();

        let results = self.plugins.check_all(self.check_timeout, now).await;

        let mut join_set: JoinSet<(String, Reading, TickReport)> = JoinSet::new();
        let mut latest_readings: HashMap<String, Reading> = HashMap::new();

        for (plugin_id, outcome) in results {
            match outcome {
                Ok(reading) => {
                    if let Some(value) = reading.value {
                        let key = SeriesKey::new(plugin_id.clone(), "value");
                        if let Err(e) = self.history.record(&key, reading.timestamp, value) {
                            warn!(plugin = %plugin_id, error = %e, "failed to record history sample");
                        }
                    }
                    let engine = Arc::clone(self);
                    join_set.spawn(async move {
                        let mut local = TickReport::default();
                        engine.evaluate_plugin(&plugin_id, &reading, now, &mut local).await;
                        (plugin_id, reading, local)
                    });
                }
                Err(e) => {
                    warn!(plugin = %plugin_id, error = %e, "plugin check failed");
                    report.plugin_errors.push(plugin_id.clone());
                    let severity = cfg.plugins.error_severity_for(&plugin_id);
                    self.decide_and_dispatch(
                        AlertKey::Plugin(plugin_id.clone()),
                        Classification::NonOk(severity),
                        now,
                        AlertPolicy {
                            cooldown_seconds: cfg.notifications.plugin_alert_cooldown_seconds,
                            min_consecutive: 1,
                            recovery_enabled: false,
                        },
                        SourceKind::Plugin,
                        plugin_id.clone(),
                        Status::Unknown,
                        format!("plugin '{plugin_id}' failed: {e}"),
                        None,
                        true,
                        true,
                        &mut report,
                    )
                    .await;
                }
            }
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                join_set.abort_all();
                report.partial = true;
                warn!("tick overran its budget, outstanding plugin evaluations cancelled");
                break;
            }
            match tokio::time::timeout(remaining, join_set.join_next()).await {
                Ok(Some(Ok((plugin_id, reading, local)))) => {
                    report.worst_status = match local.worst_status {
                        Some(s) => worse(report.worst_status, s),
                        None => report.worst_status,
                    };
                    report.alerts_fired += local.alerts_fired;
                    report.recoveries_fired += local.recoveries_fired;
                    latest_readings.insert(plugin_id, reading);
                }
                Ok(Some(Err(e))) => warn!(error = %e, "plugin evaluation task panicked"),
                Ok(None) => break,
                Err(_) => {
                    join_set.abort_all();
                    report.partial = true;
                    warn!("tick overran its budget, outstanding plugin evaluations cancelled");
                    break;
                }
            }
        }

        if !report.partial && cfg.composite_checks.enabled {
            self.evaluate_composite(&latest_readings, now, &mut report).await;
        }

        report.duration = start.elapsed();
        report
    }

    /// Threshold-evaluate and (if enabled) anomaly-detect one plugin's
    /// reading, then run it through the Alert State Machine.
    async fn evaluate_plugin(&self, plugin_id: &str, reading: &Reading, now: i64, report: &mut TickReport) {
        let cfg = crate::config::get();
        let threshold_catalog = self.plugins.threshold_catalog().await;
        let Some(threshold_cfg) = threshold_catalog.get(plugin_id) else {
            return;
        };

        let key = SeriesKey::new(plugin_id.to_string(), "value");
        let status = {
            let mut states = self.threshold_states.lock().unwrap_or_else(|e| e.into_inner());
            let state = states.entry(key.clone()).or_insert_with(TransitionState::new);
            threshold::evaluate(reading, threshold_cfg, state)
        };
        report.worst_status = worse(report.worst_status, status);

        let classification = match status {
            Status::Ok | Status::Unknown => Classification::Ok,
            Status::Warning => Classification::NonOk(Severity::Warning),
            Status::Critical => Classification::NonOk(Severity::Critical),
        };
        let policy = AlertPolicy {
            cooldown_seconds: cfg.notifications.plugin_alert_cooldown_seconds,
            min_consecutive: threshold_cfg.min_consecutive,
            recovery_enabled: true,
        };
        let status_message = if reading.status_message.is_empty() {
            format!("{plugin_id} is {status}")
        } else {
            reading.status_message.clone()
        };
        self.decide_and_dispatch(
            AlertKey::Plugin(plugin_id.to_string()),
            classification,
            now,
            policy,
            SourceKind::Plugin,
            plugin_id.to_string(),
            status,
            status_message,
            Some(reading.clone()),
            true,
            true,
            report,
        )
        .await;

        // Anomaly detection runs independently of threshold status — a
        // series can be well inside its threshold band and still anomalous
        // relative to its own recent history (spec.md §4.4).
        if cfg.anomaly_detection.enabled {
            if let Some(value) = reading.value {
                self.evaluate_anomaly(plugin_id, &key, value, now, report).await;
            }
        }
    }

    async fn evaluate_anomaly(&self, plugin_id: &str, key: &SeriesKey, value: f64, now: i64, report: &mut TickReport) {
        let cfg = crate::config::get();
        let acfg = anomaly_config_for(cfg, key);
        if !acfg.enabled {
            return;
        }
        if let Err(e) = acfg.validate() {
            warn!(plugin = %plugin_id, error = %e, "invalid anomaly config, skipping detection");
            return;
        }

        let window = self.history.window(key, acfg.window);
        if window.len() < acfg.min_points {
            return;
        }
        let points: Vec<Point> = window.iter().map(|s| Point { value: s.value }).collect();
        let mut verdict = anomaly::detect(&points, value, &acfg);
        verdict.timestamp = now;
        if let Err(e) = self.anomaly_log.append(plugin_id, "value", &verdict) {
            warn!(plugin = %plugin_id, error = %e, "failed to append anomaly log");
        }
        if !verdict.is_anomaly {
            return;
        }

        let consecutive = self.anomaly_log.consecutive_anomalies(plugin_id, now);
        if consecutive < acfg.consecutive_threshold {
            return;
        }
        if let Some(last) = self.anomaly_log.read_last_notification(plugin_id) {
            if now - last < acfg.cooldown_seconds {
                return;
            }
        }

        let kinds = verdict.types.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ");
        let message = format!("anomaly detected on {plugin_id}: {kinds} (z={:.2})", verdict.z_score);
        let policy = AlertPolicy {
            cooldown_seconds: acfg.cooldown_seconds,
            min_consecutive: 1,
            recovery_enabled: false,
        };
        let fired = self
            .decide_and_dispatch(
                AlertKey::Anomaly(plugin_id.to_string()),
                Classification::NonOk(Severity::High),
                now,
                policy,
                SourceKind::Anomaly,
                plugin_id.to_string(),
                Status::Warning,
                message,
                None,
                true,
                true,
                report,
            )
            .await;
        if fired {
            if let Err(e) = self.anomaly_log.write_last_notification(plugin_id, now) {
                warn!(plugin = %plugin_id, error = %e, "failed to write anomaly notification marker");
            }
        }
    }

    async fn evaluate_composite(&self, readings: &HashMap<String, Reading>, now: i64, report: &mut TickReport) {
        for rule in &self.composite_rules {
            if !rule.enabled {
                continue;
            }
            let tri = rule.eval(readings);
            let fires = tri == Tri::True;
            if fires {
                let status = if rule.severity >= Severity::High { Status::Critical } else { Status::Warning };
                report.worst_status = worse(report.worst_status, status);
            }
            let classification = if fires { Classification::NonOk(rule.severity) } else { Classification::Ok };
            let policy = AlertPolicy {
                cooldown_seconds: rule.cooldown_seconds,
                min_consecutive: 1,
                recovery_enabled: rule.notify_on_recovery,
            };
            let message = if fires { rule.render_message(readings) } else { String::new() };
            self.decide_and_dispatch(
                AlertKey::Composite(rule.id.clone()),
                classification,
                now,
                policy,
                SourceKind::Composite,
                rule.id.clone(),
                if fires { Status::Critical } else { Status::Ok },
                message,
                None,
                rule.notify_on_trigger,
                rule.notify_on_recovery,
                report,
            )
            .await;
        }
    }

    /// Run `key` through the Alert State Machine and dispatch if it decided
    /// to. Returns `true` if an Alert (not Recovery) was dispatched, so
    /// callers can update their own per-source bookkeeping (anomaly's
    /// last-notification marker).
    #[allow(clippy::too_many_arguments)]
    async fn decide_and_dispatch(
        &self,
        key: AlertKey,
        classification: Classification,
        now: i64,
        policy: AlertPolicy,
        source_kind: SourceKind,
        source_id: String,
        status: Status,
        status_message: String,
        reading: Option<Reading>,
        notify_on_trigger: bool,
        notify_on_recovery: bool,
        report: &mut TickReport,
    ) -> bool {
        let cfg = crate::config::get();
        let silenced = is_silenced(now, &cfg.notifications.silence_windows, &key);
        let decision = match self.alert_state.decide(&key, classification, now, silenced, &policy) {
            Ok(d) => d,
            Err(e) => {
                warn!(alert_key = %key, error = %e, "failed to persist alert state");
                Decision::None
            }
        };

        match decision {
            Decision::None => false,
            Decision::Alert(severity) => {
                report.alerts_fired += 1;
                if !notify_on_trigger {
                    return true;
                }
                let event = NotificationEvent {
                    severity,
                    source_kind,
                    source_id: source_id.clone(),
                    status,
                    status_message,
                    reading,
                    event_kind: EventKind::Alert,
                    timestamp: now,
                    targets: None,
                };
                let result = self.dispatcher.dispatch(event, now).await;
                if !result.any_sent() {
                    debug!(alert_key = %key, "alert decided but no channel accepted delivery");
                }
                true
            }
            Decision::Recovery => {
                report.recoveries_fired += 1;
                if !notify_on_recovery {
                    return false;
                }
                let event = NotificationEvent {
                    severity: Severity::Info,
                    source_kind,
                    source_id,
                    status,
                    status_message: format!("{status_message} (recovered)"),
                    reading,
                    event_kind: EventKind::Recovery,
                    timestamp: now,
                    targets: None,
                };
                self.dispatcher.dispatch(event, now).await;
                false
            }
        }
    }

    /// Run the tick loop until cancelled — the `start` daemon command
    /// (spec.md §4.8). Mirrors the teacher's supervisor `tokio::select!`
    /// between `cancel_token.cancelled()` and the next unit of work; here
    /// the work source is `tokio::time::interval` rather than a channel.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let tick_budget = self
            .check_interval
            .saturating_sub(Duration::from_secs(5))
            .max(Duration::from_secs(1));

        info!(interval_s = self.check_interval.as_secs(), "scheduler: tick loop starting");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler: shutdown signal received");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.tick_with_budget(self.check_interval).await;
                    if report.duration > tick_budget && !report.partial {
                        warn!(
                            elapsed_ms = report.duration.as_millis() as u64,
                            budget_ms = tick_budget.as_millis() as u64,
                            "tick exceeded its budget"
                        );
                    }
                    debug!(
                        worst_status = ?report.worst_status,
                        alerts = report.alerts_fired,
                        recoveries = report.recoveries_fired,
                        errors = report.plugin_errors.len(),
                        partial = report.partial,
                        "tick complete"
                    );
                }
            }
        }

        info!("scheduler: tick loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn process_cfg(project_root: &std::path::Path) -> RootConfig {
        let mut cfg = RootConfig::default();
        cfg.state.project_root = project_root.to_path_buf();
        cfg.plugins.enabled = vec!["process".to_string()];
        cfg.plugins.process.names = vec!["definitely-not-a-real-process-xyz".to_string()];
        cfg.notifications.plugin_alert_cooldown_seconds = 0;
        cfg
    }

    #[tokio::test]
    async fn missing_process_ticks_critical_with_no_channels_configured() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = process_cfg(dir.path());
        let clock = Arc::new(FakeClock::new(1_000));
        let engine = Arc::new(Engine::build(&cfg, clock));

        let report = engine.tick().await;
        assert_eq!(report.worst_status, Some(Status::Critical));
        assert_eq!(report.alerts_fired, 1);
        assert!(report.plugin_errors.is_empty());
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn repeated_ticks_within_cooldown_do_not_refire() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = process_cfg(dir.path());
        cfg.notifications.plugin_alert_cooldown_seconds = 300;
        let clock = Arc::new(FakeClock::new(1_000));
        let engine = Arc::new(Engine::build(&cfg, clock));

        let first = engine.tick().await;
        assert_eq!(first.alerts_fired, 1);
        let second = engine.tick().await;
        assert_eq!(second.alerts_fired, 0);
        assert_eq!(second.worst_status, Some(Status::Critical));
    }

    #[tokio::test]
    async fn tick_truncates_and_marks_partial_when_budget_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = process_cfg(dir.path());
        let clock = Arc::new(FakeClock::new(1_000));
        let engine = Arc::new(Engine::build(&cfg, clock));

        let report = engine.tick_with_budget(Duration::ZERO).await;
        assert!(report.partial);
        assert_eq!(report.alerts_fired, 0);
        assert_eq!(report.recoveries_fired, 0);
    }

    #[tokio::test]
    async fn unknown_plugin_in_enabled_list_is_not_registered() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = process_cfg(dir.path());
        cfg.plugins.enabled.push("not-a-real-plugin".to_string());
        let clock = Arc::new(FakeClock::new(1_000));
        let engine = Arc::new(Engine::build(&cfg, clock));
        assert!(engine.is_plugin_registered("process"));
        assert!(!engine.is_plugin_registered("not-a-real-plugin"));
    }

    #[tokio::test]
    async fn composite_rule_with_unknown_plugin_is_dropped_on_validation() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = process_cfg(dir.path());
        let clock = Arc::new(FakeClock::new(1_000));
        let mut engine = Engine::build(&cfg, clock);
        engine.composite_rules.push(
            CompositeRule::from_file(
                "bad-rule",
                crate::composite::RuleFile {
                    name: "bad".to_string(),
                    description: String::new(),
                    enabled: true,
                    severity: Severity::Warning,
                    cooldown: 60,
                    rule: "no_such_plugin.value > 1".to_string(),
                    notify_on_trigger: true,
                    notify_on_recovery: false,
                    notification_message: String::new(),
                },
            )
            .unwrap(),
        );
        engine.validate_composite_rules().await;
        assert!(engine.composite_rules.is_empty());
    }
}
