//! sairen-sentry CLI: host resource monitoring daemon and utility commands
//! (spec.md §6, component C9).
//!
//! Mirrors the teacher's `main.rs` shape: a clap-derived `CliArgs`, a
//! `tracing_subscriber` init with an env-filter fallback, a
//! `CancellationToken` wired to `ctrl_c` for graceful shutdown, and a fatal
//! error path that writes a crash report before exiting non-zero.

use clap::{Parser, Subcommand};
use sairen_sentry::anomaly::{self, Point};
use sairen_sentry::clock::{Clock, SystemClock};
use sairen_sentry::composite;
use sairen_sentry::config::{self, RootConfig};
use sairen_sentry::crash;
use sairen_sentry::notifications::{Dispatcher, NotificationEvent};
use sairen_sentry::plugins::PluginRegistry;
use sairen_sentry::process_lock::ProcessLock;
use sairen_sentry::types::{AlertKey, AnomalyConfig};
use sairen_sentry::{Engine, SentryError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "sairen-sentry")]
#[command(about = "Host resource monitoring agent: sampling, anomaly detection, composite alerting")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file. Overrides SAIREN_SENTRY_CONFIG and
    /// ./sentry_config.toml (spec.md §6 "Config loading order").
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override `system.log_level` for this invocation only.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a one-shot snapshot of every registered plugin. Read-only: no
    /// alert state is persisted and nothing is dispatched.
    Status,
    /// Run the daemon: tick on `system.check_interval` until signalled.
    Start,
    /// Signal a running daemon (by pid file) to stop.
    Stop,
    /// Run one tick immediately and exit with the resulting status code.
    Check {
        /// Check only this plugin instead of the full registry.
        #[arg(long)]
        plugin: Option<String>,
    },
    /// Anomaly detection utilities.
    Anomaly {
        #[command(subcommand)]
        action: AnomalyAction,
    },
    /// Composite rule utilities.
    Composite {
        #[command(subcommand)]
        action: CompositeAction,
    },
    /// Notification channel utilities.
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
}

#[derive(Subcommand, Debug)]
enum AnomalyAction {
    /// Probe a plugin's anomaly configuration against a synthetic outlier to
    /// sanity-check sensitivity tuning without waiting on real history.
    Test {
        #[arg(long)]
        plugin: String,
    },
}

#[derive(Subcommand, Debug)]
enum CompositeAction {
    /// Parse and validate every rule file under `composite_checks.config_directory`.
    Test,
}

#[derive(Subcommand, Debug)]
enum WebhookAction {
    /// Dispatch a synthetic test event to every enabled channel.
    Test,
}

fn load_config(path: Option<&std::path::Path>) -> Result<RootConfig, SentryError> {
    match path {
        Some(p) => RootConfig::load_from_file(p).map_err(SentryError::from),
        None => Ok(RootConfig::load()),
    }
}

fn init_tracing(cfg: &RootConfig, override_level: Option<&str>) {
    let fallback = override_level
        .map(str::to_string)
        .unwrap_or_else(|| cfg.system.log_level.as_tracing_filter().to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_target(false)
        .init();
}

fn anomaly_config_for(cfg: &RootConfig, plugin: &str) -> AnomalyConfig {
    let qualified = format!("{plugin}.value");
    if let Some(c) = cfg.anomaly_detection.overrides.get(&qualified) {
        return c.clone();
    }
    if let Some(c) = cfg.anomaly_detection.overrides.get(plugin) {
        return c.clone();
    }
    AnomalyConfig {
        sensitivity: cfg.anomaly_detection.default_sensitivity,
        ..AnomalyConfig::default()
    }
}

async fn run_status(cfg: &RootConfig) -> Result<ExitCode, SentryError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut engine = Engine::build(cfg, clock.clone());
    engine.validate_composite_rules().await;
    let now = clock.now();

    for id in engine.plugin_ids() {
        match engine.check_plugin(&id, now).await {
            Ok(reading) => {
                let snapshot = engine.alert_snapshot(&AlertKey::Plugin(id.clone()));
                info!(
                    plugin = %id,
                    value = ?reading.value,
                    persisted_status = ?snapshot.status,
                    "status"
                );
            }
            Err(e) => error!(plugin = %id, error = %e, "status check failed"),
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_start(cfg: &RootConfig) -> Result<ExitCode, SentryError> {
    let lock = ProcessLock::new(&cfg.state.project_root);
    lock.acquire()?;

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, stopping");
        shutdown_token.cancel();
    });

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut engine = Engine::build(cfg, clock);
    engine.validate_composite_rules().await;
    let engine = Arc::new(engine);

    info!(plugins = ?engine.plugin_ids(), interval_s = cfg.system.check_interval, "sairen-sentry starting");
    engine.run(cancel_token).await;

    lock.release();
    info!("sairen-sentry shutdown complete");
    Ok(ExitCode::SUCCESS)
}

fn run_stop(cfg: &RootConfig) -> Result<ExitCode, SentryError> {
    let lock = ProcessLock::new(&cfg.state.project_root);
    let pid = lock.signal_stop()?;
    info!(pid, "sent shutdown signal to running instance");
    Ok(ExitCode::SUCCESS)
}

async fn run_check(cfg: &RootConfig, plugin: Option<String>) -> Result<ExitCode, SentryError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut engine = Engine::build(cfg, clock.clone());
    engine.validate_composite_rules().await;
    let engine = Arc::new(engine);

    if let Some(id) = plugin {
        if !engine.is_plugin_registered(&id) {
            error!(plugin = %id, "not a registered plugin");
            return Ok(ExitCode::from(3));
        }
        let now = clock.now();
        return match engine.check_plugin(&id, now).await {
            Ok(reading) => {
                info!(plugin = %id, value = ?reading.value, "check complete");
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                error!(plugin = %id, error = %e, "check failed");
                Ok(ExitCode::from(3))
            }
        };
    }

    let report = engine.tick().await;
    info!(
        worst_status = ?report.worst_status,
        alerts = report.alerts_fired,
        recoveries = report.recoveries_fired,
        errors = ?report.plugin_errors,
        duration_ms = report.duration.as_millis() as u64,
        "check complete"
    );
    Ok(ExitCode::from(report.exit_code() as u8))
}

async fn run_anomaly_test(cfg: &RootConfig, plugin: &str) -> Result<ExitCode, SentryError> {
    let acfg = anomaly_config_for(cfg, plugin);
    if let Err(e) = acfg.validate() {
        error!(plugin, error = %e, "invalid anomaly configuration");
        return Ok(ExitCode::from(3));
    }

    // A flat baseline with a little noise, then one clearly offset probe
    // value: enough to sanity-check sensitivity tuning without waiting on
    // real history (spec.md §6 "anomaly test").
    let baseline: Vec<Point> = (0..acfg.window)
        .map(|i| Point { value: 50.0 + (i % 3) as f64 })
        .collect();
    let probe = 50.0 + acfg.sensitivity * 20.0 + 10.0;
    let verdict = anomaly::detect(&baseline, probe, &acfg);

    info!(
        plugin,
        window = acfg.window,
        sensitivity = acfg.sensitivity,
        probe_value = probe,
        is_anomaly = verdict.is_anomaly,
        z_score = verdict.z_score,
        types = ?verdict.types,
        "anomaly test complete"
    );
    Ok(ExitCode::SUCCESS)
}

async fn run_composite_test(cfg: &RootConfig) -> Result<ExitCode, SentryError> {
    let dir = cfg.state.project_root.join(&cfg.composite_checks.config_directory);
    let mut rules = composite::load_rules_from_dir(&dir)?;
    let total = rules.len();
    if total == 0 {
        warn!(dir = %dir.display(), "no composite rule files found");
        return Ok(ExitCode::SUCCESS);
    }

    let registry = PluginRegistry::build(cfg);
    let catalog = registry.attribute_catalog().await;
    rules.retain(|rule| match rule.validate_against(&catalog) {
        Ok(()) => {
            info!(rule = %rule.id, name = %rule.name, severity = %rule.severity, "rule ok");
            true
        }
        Err(e) => {
            error!(rule = %rule.id, error = %e, "rule failed validation");
            false
        }
    });

    info!(dir = %dir.display(), total, valid = rules.len(), "composite rule test complete");
    Ok(ExitCode::SUCCESS)
}

async fn run_webhook_test(cfg: &RootConfig) -> Result<ExitCode, SentryError> {
    let dispatcher = Dispatcher::new(cfg);
    let targets = dispatcher.enabled_ids();
    if targets.is_empty() {
        warn!("no notification channels enabled, nothing to test");
        return Ok(ExitCode::SUCCESS);
    }

    let now = SystemClock.now();
    let result = dispatcher.dispatch(NotificationEvent::test(now), now).await;
    for (channel, outcome) in &result.outcomes {
        info!(channel = %channel, outcome = ?outcome, "webhook test delivery");
    }
    Ok(ExitCode::SUCCESS)
}

fn fatal(err: &SentryError, project_root: &std::path::Path) -> ExitCode {
    let now = chrono::Utc::now().timestamp();
    let path = crash::report(err, project_root, now);
    error!(crash_report = %path.display(), "exiting after fatal error");
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let cfg = match load_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Tracing isn't initialized yet if the config itself couldn't be
            // read; fall back to a bare eprintln for this one path.
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&cfg, args.log_level.as_deref());
    config::init(cfg.clone());

    let project_root = cfg.state.project_root.clone();

    let outcome = match args.command {
        Command::Status => run_status(&cfg).await,
        Command::Start => run_start(&cfg).await,
        Command::Stop => run_stop(&cfg),
        Command::Check { plugin } => run_check(&cfg, plugin).await,
        Command::Anomaly {
            action: AnomalyAction::Test { plugin },
        } => run_anomaly_test(&cfg, &plugin).await,
        Command::Composite {
            action: CompositeAction::Test,
        } => run_composite_test(&cfg).await,
        Command::Webhook {
            action: WebhookAction::Test,
        } => run_webhook_test(&cfg).await,
    };

    match outcome {
        Ok(code) => code,
        Err(e) => fatal(&e, &project_root),
    }
}
