//! Error taxonomy (spec.md §7).
//!
//! Each component gets its own `thiserror` enum; `SentryError` aggregates
//! them at the top level for `main`'s `anyhow::Result` boundary. Every
//! surfaced error carries enough context to build the user-visible message
//! and the JSON crash report (`crash.rs`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(std::path::PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(std::path::PathBuf, toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{0}' timed out after {1:?}")]
    Timeout(String, std::time::Duration),
    #[error("plugin '{0}' produced a malformed reading: {1}")]
    MalformedReading(String, String),
    #[error("plugin '{0}' failed: {1}")]
    CheckFailed(String, String),
    #[error("plugin '{0}' is not registered")]
    NotRegistered(String),
    #[error("plugin '{0}' configuration rejected: {1}")]
    ConfigureFailed(String, String),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("io error persisting series {0}: {1}")]
    Io(String, std::io::Error),
    #[error("series {0} not found")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("parse error in rule '{rule}': {message}")]
    Parse { rule: String, message: String },
    #[error("rule '{0}' references unknown plugin '{1}'")]
    UnknownPlugin(String, String),
    #[error("rule '{0}' references undeclared attribute '{1}.{2}'")]
    UnknownAttribute(String, String, String),
}

#[derive(Debug, Error)]
pub enum AlertStateError {
    #[error("failed to read alert state from {0}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    #[error("failed to write alert state to {0}: {1}")]
    Write(std::path::PathBuf, std::io::Error),
    #[error("failed to (de)serialize alert state: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ProcessLockError {
    #[error("failed to read pid file {0}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    #[error("failed to write pid file {0}: {1}")]
    Write(std::path::PathBuf, std::io::Error),
    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(i32),
    #[error("no running instance found (stale or missing pid file at {0})")]
    NotRunning(std::path::PathBuf),
}

/// Transport-level classification used by the dispatcher (spec.md
/// "Transient vs permanent error").
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transient failure sending to {channel}: {message}")]
    Transient { channel: String, message: String },
    #[error("permanent failure sending to {channel}: {message}")]
    Permanent { channel: String, message: String },
    #[error("channel '{0}' timed out")]
    Timeout(String),
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Transient { .. })
    }
}

/// Top-level error used at the binary boundary. Fatal variants abort the
/// process (spec.md §7 "Fatal"); all others are surfaced as events without
/// aborting the current tick.
#[derive(Debug, Error)]
pub enum SentryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Composite(#[from] CompositeError),
    #[error(transparent)]
    AlertState(#[from] AlertStateError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    ProcessLock(#[from] ProcessLockError),
    #[error("permission denied accessing {0}")]
    PermissionDenied(std::path::PathBuf),
    #[error("critical system error: {0}")]
    Critical(String),
}

/// Context an error can report for user-facing display and crash reports.
pub trait Remediable {
    /// Short error-kind tag, e.g. "config.invalid", "dispatch.permanent".
    fn kind_tag(&self) -> &'static str;
    /// The resource identifier most relevant to the failure.
    fn resource(&self) -> String;
    /// A suggested remedy, e.g. "check permissions on <path>".
    fn remedy(&self) -> String;
}

impl Remediable for SentryError {
    fn kind_tag(&self) -> &'static str {
        match self {
            SentryError::Config(_) => "config.invalid",
            SentryError::Plugin(_) => "plugin.error",
            SentryError::History(_) => "history.error",
            SentryError::Composite(_) => "composite.error",
            SentryError::AlertState(_) => "alert_state.error",
            SentryError::Dispatch(_) => "dispatch.error",
            SentryError::ProcessLock(_) => "process_lock.error",
            SentryError::PermissionDenied(_) => "fs.permission_denied",
            SentryError::Critical(_) => "system.critical",
        }
    }

    fn resource(&self) -> String {
        match self {
            SentryError::PermissionDenied(p) => p.display().to_string(),
            other => other.to_string(),
        }
    }

    fn remedy(&self) -> String {
        match self {
            SentryError::Config(_) => {
                "check the configuration file for typos or out-of-range values".to_string()
            }
            SentryError::PermissionDenied(p) => {
                format!("check permissions on {}", p.display())
            }
            SentryError::Dispatch(_) => {
                "verify the channel's webhook URL / SMTP credentials are still valid".to_string()
            }
            SentryError::ProcessLock(ProcessLockError::AlreadyRunning(pid)) => {
                format!("stop the running instance (pid {pid}) before starting a new one")
            }
            SentryError::ProcessLock(_) => {
                "remove the stale pid file and retry".to_string()
            }
            _ => "check the agent logs for details".to_string(),
        }
    }
}
