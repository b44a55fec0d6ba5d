//! Root configuration (spec.md §6).
//!
//! Config loading, YAML/KV semantics, and the file watcher are treated as
//! an external collaborator per spec.md §1 — only the recognised keys and
//! their effects are modeled here. Loading order mirrors the teacher's
//! `WellConfig::load`: an env var, then a well-known local file, then
//! built-in defaults.

pub(crate) mod defaults;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

static ROOT_CONFIG: OnceLock<RootConfig> = OnceLock::new();

/// Initialize the global configuration. Must be called exactly once before
/// any call to `get()`.
pub fn init(config: RootConfig) {
    if ROOT_CONFIG.set(config).is_err() {
        panic!("config::init() called more than once");
    }
}

/// Fetch the global configuration. Panics if `init()` was never called.
pub fn get() -> &'static RootConfig {
    ROOT_CONFIG
        .get()
        .expect("config::init() must be called before config::get()")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    pub fn as_tracing_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "defaults::system_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default = "defaults::check_interval")]
    pub check_interval: u64,
    #[serde(default = "defaults::check_timeout")]
    pub check_timeout: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::system_enabled(),
            log_level: LogLevel::default(),
            check_interval: defaults::check_interval(),
            check_timeout: defaults::check_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSettings {
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    #[serde(default = "defaults::hysteresis")]
    pub hysteresis: f64,
    #[serde(default = "defaults::min_consecutive")]
    pub min_consecutive: u32,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            warning_threshold: 70.0,
            critical_threshold: 85.0,
            hysteresis: defaults::hysteresis(),
            min_consecutive: defaults::min_consecutive(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuPluginConfig {
    #[serde(flatten)]
    pub threshold: ThresholdSettings,
    #[serde(default = "defaults::top_consumers")]
    pub top_consumers: usize,
}

impl Default for CpuPluginConfig {
    fn default() -> Self {
        Self {
            threshold: ThresholdSettings::default(),
            top_consumers: defaults::top_consumers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPluginConfig {
    #[serde(flatten)]
    pub threshold: ThresholdSettings,
}

impl Default for MemoryPluginConfig {
    fn default() -> Self {
        Self {
            threshold: ThresholdSettings {
                warning_threshold: 80.0,
                critical_threshold: 92.0,
                ..ThresholdSettings::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskPluginConfig {
    #[serde(default = "defaults::disk_mount")]
    pub mount: String,
    #[serde(flatten)]
    pub threshold: ThresholdSettings,
}

impl Default for DiskPluginConfig {
    fn default() -> Self {
        Self {
            mount: defaults::disk_mount(),
            threshold: ThresholdSettings {
                warning_threshold: 80.0,
                critical_threshold: 95.0,
                ..ThresholdSettings::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessPluginConfig {
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default = "defaults::enabled_plugins")]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub cpu: CpuPluginConfig,
    #[serde(default)]
    pub memory: MemoryPluginConfig,
    #[serde(default)]
    pub disk: DiskPluginConfig,
    #[serde(default)]
    pub process: ProcessPluginConfig,
    /// Severity routed to `plugin_error` events per plugin id; a plugin
    /// with no entry here uses `Severity::Medium` (spec.md §4.1 "Failures").
    #[serde(default)]
    pub error_severity: HashMap<String, crate::types::Severity>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled_plugins(),
            cpu: CpuPluginConfig::default(),
            memory: MemoryPluginConfig::default(),
            disk: DiskPluginConfig::default(),
            process: ProcessPluginConfig::default(),
            error_severity: HashMap::new(),
        }
    }
}

impl PluginsConfig {
    pub fn error_severity_for(&self, plugin_id: &str) -> crate::types::Severity {
        self.error_severity
            .get(plugin_id)
            .copied()
            .unwrap_or(crate::types::Severity::Medium)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamsConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailConfig {
    pub from: Option<String>,
    pub to: Option<String>,
    pub smtp_server: Option<String>,
    pub smtp_port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub teams: TeamsConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Global minimum interval between identical (source, severity) pairs,
    /// enforced at the dispatcher layer (spec.md §4.7 "Cooldown").
    #[serde(default = "defaults::global_min_interval_seconds")]
    pub global_min_interval_seconds: i64,
    #[serde(default = "defaults::plugin_alert_cooldown_seconds")]
    pub plugin_alert_cooldown_seconds: i64,
    /// Per-channel send timeout (spec.md §5 "Timeouts").
    #[serde(default = "defaults::channel_send_timeout_seconds")]
    pub channel_send_timeout_seconds: u64,
    /// Total per-event dispatch budget across all retries (spec.md §4.7
    /// "Transient retry").
    #[serde(default = "defaults::dispatch_budget_seconds")]
    pub dispatch_budget_seconds: u64,
    #[serde(default)]
    pub silence_windows: Vec<SilenceWindow>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channels: Vec::new(),
            teams: TeamsConfig::default(),
            slack: SlackConfig::default(),
            discord: DiscordConfig::default(),
            email: EmailConfig::default(),
            webhook: WebhookConfig::default(),
            global_min_interval_seconds: defaults::global_min_interval_seconds(),
            plugin_alert_cooldown_seconds: defaults::plugin_alert_cooldown_seconds(),
            channel_send_timeout_seconds: defaults::channel_send_timeout_seconds(),
            dispatch_budget_seconds: defaults::dispatch_budget_seconds(),
            silence_windows: Vec::new(),
        }
    }
}

/// A daily wall-clock window (minutes since UTC midnight) during which
/// alerts for matching keys are unconditionally suppressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceWindow {
    pub start_minute: u32,
    pub end_minute: u32,
    /// Empty means "applies to all alert keys".
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetectionConfig {
    #[serde(default = "defaults::anomaly_enabled")]
    pub enabled: bool,
    #[serde(default = "defaults::default_sensitivity")]
    pub default_sensitivity: f64,
    #[serde(default = "defaults::data_retention_days")]
    pub data_retention_days: u64,
    /// Per-source cooldown for anomaly-origin alerts (spec.md §4.6).
    #[serde(default = "defaults::anomaly_alert_cooldown_seconds")]
    pub alert_cooldown_seconds: i64,
    /// Per-(plugin[.metric]) overrides of the default anomaly config.
    #[serde(default)]
    pub overrides: HashMap<String, crate::types::AnomalyConfig>,
}

impl Default for AnomalyDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::anomaly_enabled(),
            default_sensitivity: defaults::default_sensitivity(),
            data_retention_days: defaults::data_retention_days(),
            alert_cooldown_seconds: defaults::anomaly_alert_cooldown_seconds(),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeChecksConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "defaults::composite_config_directory")]
    pub config_directory: String,
}

impl Default for CompositeChecksConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            config_directory: defaults::composite_config_directory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "defaults::project_root")]
    pub project_root: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            project_root: defaults::project_root(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub anomaly_detection: AnomalyDetectionConfig,
    #[serde(default)]
    pub composite_checks: CompositeChecksConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl RootConfig {
    const ENV_VAR: &'static str = "SAIREN_SENTRY_CONFIG";
    const LOCAL_FILE: &'static str = "sentry_config.toml";

    /// Standard search order: env var -> ./sentry_config.toml -> defaults.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(Self::ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(cfg) => {
                        info!(path = %p.display(), "loaded config from SAIREN_SENTRY_CONFIG");
                        return cfg;
                    }
                    Err(e) => warn!(path = %p.display(), error = %e, "failed to load config, falling back"),
                }
            } else {
                warn!(path = %path, "SAIREN_SENTRY_CONFIG points to a non-existent file, falling back");
            }
        }

        let local = PathBuf::from(Self::LOCAL_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(cfg) => {
                    info!("loaded config from ./sentry_config.toml");
                    return cfg;
                }
                Err(e) => warn!(error = %e, "failed to load ./sentry_config.toml, using defaults"),
            }
        }

        info!("no sentry_config.toml found, using built-in defaults");
        Self::default()
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system.check_interval == 0 {
            return Err(ConfigError::Invalid(
                "system.check_interval must be positive".into(),
            ));
        }
        if self.system.check_timeout == 0 {
            return Err(ConfigError::Invalid(
                "system.check_timeout must be positive".into(),
            ));
        }
        self.plugins
            .cpu
            .threshold_config(Direction::GreaterIsBad)
            .validate()
            .map_err(ConfigError::Invalid)?;
        self.plugins
            .memory
            .threshold_config(Direction::GreaterIsBad)
            .validate()
            .map_err(ConfigError::Invalid)?;
        self.plugins
            .disk
            .threshold
            .clone()
            .into_threshold_config(Direction::GreaterIsBad)
            .validate()
            .map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

use crate::types::Direction;

impl ThresholdSettings {
    pub fn into_threshold_config(self, direction: Direction) -> crate::types::ThresholdConfig {
        crate::types::ThresholdConfig {
            warning: self.warning_threshold,
            critical: self.critical_threshold,
            direction,
            hysteresis: self.hysteresis,
            min_consecutive: self.min_consecutive,
        }
    }
}

impl CpuPluginConfig {
    pub fn threshold_config(&self, direction: Direction) -> crate::types::ThresholdConfig {
        self.threshold.clone().into_threshold_config(direction)
    }
}

impl MemoryPluginConfig {
    pub fn threshold_config(&self, direction: Direction) -> crate::types::ThresholdConfig {
        self.threshold.clone().into_threshold_config(direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        assert!(RootConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_check_interval_rejected() {
        let mut cfg = RootConfig::default();
        cfg.system.check_interval = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_from_toml_roundtrips() {
        let toml_str = r#"
            [system]
            check_interval = 30

            [plugins]
            enabled = ["cpu", "memory"]

            [plugins.cpu]
            warning_threshold = 60.0
            critical_threshold = 80.0
        "#;
        let cfg: RootConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.system.check_interval, 30);
        assert_eq!(cfg.plugins.enabled, vec!["cpu", "memory"]);
        assert_eq!(cfg.plugins.cpu.threshold.warning_threshold, 60.0);
    }
}
