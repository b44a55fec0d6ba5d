//! Notification Dispatcher (spec.md §4.7, component C7).
//!
//! `Channel` is the tagged-capability trait every notification target
//! implements (`id` / `configure` / `send`), mirroring the `Plugin` trait's
//! shape in `plugins/mod.rs`. Five built-ins are registered from
//! `notifications.channels`; fan-out runs concurrently via
//! `futures::future::join_all`, grounded on `plugins::PluginRegistry::check_all`'s
//! concurrent-fan-out pattern. Transient failures are retried with
//! exponential backoff inside a fixed per-event budget (spec.md §4.7
//! "Transient retry").

mod discord;
mod email;
mod slack;
mod teams;
pub mod templates;
mod webhook;

pub use discord::DiscordChannel;
pub use email::EmailChannel;
pub use slack::SlackChannel;
pub use teams::TeamsChannel;
pub use webhook::WebhookChannel;

use crate::config::RootConfig;
use crate::error::DispatchError;
use crate::types::{ChannelId, EventKind, Reading, Severity, SourceKind, Status};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::System;
use templates::TemplateTable;
use tracing::{info, warn};

/// One dispatchable occurrence: a plugin/anomaly/composite alert, a
/// recovery, a test ping, or an informational event (spec.md §4.7
/// "Contract").
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub severity: Severity,
    pub source_kind: SourceKind,
    pub source_id: String,
    pub status: Status,
    pub status_message: String,
    pub reading: Option<Reading>,
    pub event_kind: EventKind,
    pub timestamp: i64,
    /// `None` means "every enabled channel" (spec.md §4.7 default).
    pub targets: Option<Vec<ChannelId>>,
}

impl NotificationEvent {
    pub fn test(timestamp: i64) -> Self {
        Self {
            severity: Severity::Info,
            source_kind: SourceKind::Test,
            source_id: "webhook-test".to_string(),
            status: Status::Ok,
            status_message: "synthetic test event".to_string(),
            reading: None,
            event_kind: EventKind::Test,
            timestamp,
            targets: None,
        }
    }
}

/// Per-(channel) delivery outcome of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOutcome {
    Sent,
    SuppressedByCooldown,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    pub outcomes: HashMap<ChannelId, ChannelOutcome>,
}

impl DispatchResult {
    pub fn any_sent(&self) -> bool {
        self.outcomes.values().any(|o| *o == ChannelOutcome::Sent)
    }
}

/// Rendered title/body content a channel turns into its own payload shape.
#[derive(Debug, Clone)]
pub struct RenderedContent {
    pub title: String,
    pub message: String,
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn id(&self) -> ChannelId;
    fn configure(&mut self, cfg: &RootConfig) -> Result<(), DispatchError>;
    async fn send(&self, event: &NotificationEvent, content: &RenderedContent) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, Default)]
pub struct ChannelPerf {
    pub sent: u64,
    pub transient_failures: u64,
    pub permanent_failures: u64,
}

/// Populated once at startup from `notifications.channels`; read-only
/// thereafter (spec.md §9 "Global mutable state").
pub struct ChannelRegistry {
    channels: Vec<Box<dyn Channel>>,
    perf: Mutex<HashMap<ChannelId, ChannelPerf>>,
}

fn build_channel(id: &str) -> Option<Box<dyn Channel>> {
    match id.to_ascii_lowercase().as_str() {
        "teams" => Some(Box::new(TeamsChannel::new())),
        "slack" => Some(Box::new(SlackChannel::new())),
        "discord" => Some(Box::new(DiscordChannel::new())),
        "email" => Some(Box::new(EmailChannel::new())),
        "webhook" => Some(Box::new(WebhookChannel::new())),
        _ => None,
    }
}

impl ChannelRegistry {
    pub fn build(cfg: &RootConfig) -> Self {
        let mut channels = Vec::new();
        for id in &cfg.notifications.channels {
            let Some(mut channel) = build_channel(id) else {
                warn!(channel = %id, "unknown notification channel id, skipping");
                continue;
            };
            match channel.configure(cfg) {
                Ok(()) => channels.push(channel),
                Err(e) => warn!(channel = %id, error = %e, "channel configuration rejected, not registering"),
            }
        }
        Self {
            channels,
            perf: Mutex::new(HashMap::new()),
        }
    }

    pub fn enabled_ids(&self) -> HashSet<ChannelId> {
        self.channels.iter().map(|c| c.id()).collect()
    }

    pub fn perf_snapshot(&self) -> HashMap<ChannelId, ChannelPerf> {
        self.perf.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, id: ChannelId, outcome: &ChannelOutcome) {
        let mut guard = self.perf.lock().unwrap_or_else(|e| e.into_inner());
        let perf = guard.entry(id).or_default();
        match outcome {
            ChannelOutcome::Sent => perf.sent += 1,
            ChannelOutcome::Failed(msg) if msg.starts_with("transient") => perf.transient_failures += 1,
            ChannelOutcome::Failed(_) => perf.permanent_failures += 1,
            ChannelOutcome::SuppressedByCooldown => {}
        }
    }
}

/// Global minimum interval between identical (source, severity) pairs,
/// enforced here even when upstream (alert-state) suppression is disabled
/// (spec.md §4.7 "Cooldown").
struct GlobalCooldown {
    last_sent: Mutex<HashMap<(String, Severity), i64>>,
    min_interval_seconds: i64,
}

impl GlobalCooldown {
    fn new(min_interval_seconds: i64) -> Self {
        Self {
            last_sent: Mutex::new(HashMap::new()),
            min_interval_seconds,
        }
    }

    fn allow(&self, source_id: &str, severity: Severity, now: i64) -> bool {
        let mut guard = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        let key = (source_id.to_string(), severity);
        let allowed = match guard.get(&key) {
            Some(last) => now - last >= self.min_interval_seconds,
            None => true,
        };
        if allowed {
            guard.insert(key, now);
        }
        allowed
    }
}

pub struct Dispatcher {
    registry: ChannelRegistry,
    templates: TemplateTable,
    cooldown: GlobalCooldown,
    send_timeout: Duration,
    event_budget: Duration,
    system: Mutex<System>,
}

const RETRY_BACKOFFS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

impl Dispatcher {
    pub fn new(cfg: &RootConfig) -> Self {
        Self {
            registry: ChannelRegistry::build(cfg),
            templates: TemplateTable::built_in(),
            cooldown: GlobalCooldown::new(cfg.notifications.global_min_interval_seconds),
            send_timeout: Duration::from_secs(cfg.notifications.channel_send_timeout_seconds),
            event_budget: Duration::from_secs(cfg.notifications.dispatch_budget_seconds),
            system: Mutex::new(System::new_all()),
        }
    }

    /// Build a dispatcher around an already-configured set of channels,
    /// bypassing the `notifications.channels` id lookup. Used by tests that
    /// need to inject a fake `Channel` (e.g. channel-isolation scenarios).
    pub fn with_channels(cfg: &RootConfig, channels: Vec<Box<dyn Channel>>) -> Self {
        Self {
            registry: ChannelRegistry {
                channels,
                perf: Mutex::new(HashMap::new()),
            },
            templates: TemplateTable::built_in(),
            cooldown: GlobalCooldown::new(cfg.notifications.global_min_interval_seconds),
            send_timeout: Duration::from_secs(cfg.notifications.channel_send_timeout_seconds),
            event_budget: Duration::from_secs(cfg.notifications.dispatch_budget_seconds),
            system: Mutex::new(System::new_all()),
        }
    }

    pub fn enabled_ids(&self) -> HashSet<ChannelId> {
        self.registry.enabled_ids()
    }

    pub fn perf_snapshot(&self) -> HashMap<ChannelId, ChannelPerf> {
        self.registry.perf_snapshot()
    }

    fn placeholder_vars(&self, event: &NotificationEvent) -> HashMap<&'static str, String> {
        let mut vars = HashMap::new();
        let hostname = hostname();
        vars.insert("hostname", hostname);
        vars.insert(
            "timestamp",
            chrono::DateTime::from_timestamp(event.timestamp, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
        );
        vars.insert("timestamp_epoch", event.timestamp.to_string());
        vars.insert("status_text", templates::status_text(event.status).to_string());
        vars.insert("status_code", templates::status_code(event.status).to_string());
        vars.insert("plugin_name", event.source_id.clone());
        vars.insert("status_message", event.status_message.clone());
        vars.insert("color", templates::color_for(event.severity).to_string());
        vars.insert("metrics", metrics_summary(event.reading.as_ref()));

        let mut sys = self.system.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_memory();
        let uptime = System::uptime();
        let load = System::load_average();
        vars.insert("uptime", format!("{uptime}s"));
        vars.insert(
            "load_avg",
            format!("{:.2},{:.2},{:.2}", load.one, load.five, load.fifteen),
        );
        vars
    }

    fn render_for(&self, channel: ChannelId, event: &NotificationEvent) -> RenderedContent {
        let pair = self.templates.resolve(channel, event.event_kind);
        let vars = self.placeholder_vars(event);
        RenderedContent {
            title: templates::render(&pair.title, &vars),
            message: templates::render(&pair.message, &vars),
        }
    }

    /// Fan out `event` to every targeted, enabled channel concurrently.
    /// Channel failures never affect other channels (spec.md §8 "Dispatcher
    /// isolation"); transient failures are retried up to 3 times with
    /// exponential backoff inside a 15s-by-default per-event budget.
    pub async fn dispatch(&self, event: NotificationEvent, now: i64) -> DispatchResult {
        let targets: HashSet<ChannelId> = match &event.targets {
            Some(ids) => ids.iter().copied().collect(),
            None => self.registry.enabled_ids(),
        };

        if !self.cooldown.allow(&event.source_id, event.severity, now) {
            info!(source = %event.source_id, severity = %event.severity, "event suppressed by global cooldown");
            let mut result = DispatchResult::default();
            for id in targets {
                result.outcomes.insert(id, ChannelOutcome::SuppressedByCooldown);
            }
            return result;
        }

        // Channels are trait objects borrowed from the registry, so fan-out
        // uses concurrent futures joined in place rather than spawned tasks;
        // each future still suspends independently at its own await points,
        // satisfying the "channels dispatch in parallel" requirement without
        // requiring `Channel: 'static`.
        let futures = self.registry.channels.iter().filter(|c| targets.contains(&c.id())).map(
            |channel| {
                let content = self.render_for(channel.id(), &event);
                let event = &event;
                async move {
                    let outcome = self.send_with_retry(channel.as_ref(), event, &content).await;
                    (channel.id(), outcome)
                }
            },
        );
        let results = futures::future::join_all(futures).await;

        let mut result = DispatchResult::default();
        for (id, outcome) in results {
            self.registry.record(id, &outcome);
            result.outcomes.insert(id, outcome);
        }
        result
    }

    async fn send_with_retry(
        &self,
        channel: &dyn Channel,
        event: &NotificationEvent,
        content: &RenderedContent,
    ) -> ChannelOutcome {
        let deadline = tokio::time::Instant::now() + self.event_budget;
        let mut attempts = 0usize;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!(channel = %channel.id(), "dispatch budget exhausted, counting as permanent failure");
                return ChannelOutcome::Failed("permanent: dispatch budget exhausted".to_string());
            }
            let per_attempt = self.send_timeout.min(remaining);
            let outcome = tokio::time::timeout(per_attempt, channel.send(event, content)).await;
            match outcome {
                Ok(Ok(())) => return ChannelOutcome::Sent,
                Ok(Err(e)) if e.is_transient() && attempts < RETRY_BACKOFFS.len() => {
                    warn!(channel = %channel.id(), attempt = attempts, error = %e, "transient send failure, retrying");
                    let backoff = RETRY_BACKOFFS[attempts];
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    if backoff >= remaining {
                        return ChannelOutcome::Failed(format!("transient: {e}"));
                    }
                    tokio::time::sleep(backoff).await;
                    attempts += 1;
                }
                Ok(Err(e)) => {
                    let prefix = if e.is_transient() { "transient" } else { "permanent" };
                    return ChannelOutcome::Failed(format!("{prefix}: {e}"));
                }
                Err(_) => {
                    return ChannelOutcome::Failed("permanent: channel send timed out".to_string());
                }
            }
        }
    }
}

fn metrics_summary(reading: Option<&Reading>) -> String {
    let Some(reading) = reading else {
        return String::new();
    };
    let mut parts = Vec::new();
    if let Some(v) = reading.value {
        parts.push(format!("value={v:.2}"));
    }
    for (k, v) in &reading.attributes {
        parts.push(format!("{k}={v}"));
    }
    parts.join(", ")
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: `buf` is valid for `buf.len()` bytes and gethostname writes a
    // NUL-terminated string within that bound on all supported platforms.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "unknown-host".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    struct FlakyChannel {
        id: ChannelId,
        fail_times: usize,
        calls: StdArc<AtomicUsize>,
    }

    #[async_trait]
    impl Channel for FlakyChannel {
        fn id(&self) -> ChannelId {
            self.id
        }
        fn configure(&mut self, _cfg: &RootConfig) -> Result<(), DispatchError> {
            Ok(())
        }
        async fn send(&self, _event: &NotificationEvent, _content: &RenderedContent) -> Result<(), DispatchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(DispatchError::Transient {
                    channel: self.id.to_string(),
                    message: "HTTP 500".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn cfg() -> RootConfig {
        let mut cfg = RootConfig::default();
        cfg.notifications.channel_send_timeout_seconds = 1;
        cfg.notifications.dispatch_budget_seconds = 15;
        cfg.notifications.global_min_interval_seconds = 0;
        cfg
    }

    #[tokio::test]
    async fn channel_isolation_scenario_6() {
        // Both channels registered together and dispatched through the real
        // concurrent `Dispatcher::dispatch()` path, not called one at a time
        // — proves the flaky Teams channel's retries don't block or affect
        // Slack's independent, immediate delivery.
        let teams_calls = StdArc::new(AtomicUsize::new(0));
        let slack_calls = StdArc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::with_channels(
            &cfg(),
            vec![
                Box::new(FlakyChannel {
                    id: ChannelId::Teams,
                    fail_times: 3,
                    calls: teams_calls.clone(),
                }),
                Box::new(FlakyChannel {
                    id: ChannelId::Slack,
                    fail_times: 0,
                    calls: slack_calls.clone(),
                }),
            ],
        );

        let event = NotificationEvent::test(0);
        let result = dispatcher.dispatch(event, 0).await;

        assert_eq!(result.outcomes.get(&ChannelId::Teams), Some(&ChannelOutcome::Sent));
        assert_eq!(result.outcomes.get(&ChannelId::Slack), Some(&ChannelOutcome::Sent));
        assert_eq!(teams_calls.load(Ordering::SeqCst), 4);
        assert_eq!(slack_calls.load(Ordering::SeqCst), 1);
        let perf = dispatcher.perf_snapshot();
        assert_eq!(perf.get(&ChannelId::Teams).map(|p| p.sent), Some(1));
        assert_eq!(perf.get(&ChannelId::Slack).map(|p| p.sent), Some(1));
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let dispatcher = Dispatcher::new(&cfg());
        struct AlwaysPermanent;
        #[async_trait]
        impl Channel for AlwaysPermanent {
            fn id(&self) -> ChannelId {
                ChannelId::Webhook
            }
            fn configure(&mut self, _cfg: &RootConfig) -> Result<(), DispatchError> {
                Ok(())
            }
            async fn send(&self, _e: &NotificationEvent, _c: &RenderedContent) -> Result<(), DispatchError> {
                Err(DispatchError::Permanent {
                    channel: "webhook".to_string(),
                    message: "HTTP 400".to_string(),
                })
            }
        }
        let event = NotificationEvent::test(0);
        let outcome = dispatcher
            .send_with_retry(&AlwaysPermanent, &event, &RenderedContent {
                title: "t".into(),
                message: "m".into(),
            })
            .await;
        assert!(matches!(outcome, ChannelOutcome::Failed(ref m) if m.starts_with("permanent")));
    }

    #[test]
    fn hostname_returns_nonempty_string() {
        assert!(!hostname().is_empty());
    }
}
