//! Shared data model for the monitoring engine.
//!
//! This module defines the core vocabulary every other component speaks:
//! - `Reading`: the atomic, immutable output of one plugin invocation.
//! - `Status`: the four-level classification a Reading is mapped to.
//! - `ThresholdConfig` / `AnomalyConfig`: per-series tuning.
//! - `AlertKey` / `Severity` / `EventKind`: the vocabulary of the alert
//!   state machine and notification dispatcher.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Readings
// ============================================================================

/// A single attribute value attached to a Reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Number(n) => write!(f, "{n}"),
            AttributeValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// The atomic, immutable output of one plugin invocation.
///
/// A Reading is produced once by a plugin's `check()` and never mutated
/// afterward; every downstream component (history, threshold, anomaly,
/// composite) receives it by value or shared reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub plugin_id: String,
    /// UTC seconds, monotonically non-decreasing within a series.
    pub timestamp: i64,
    /// Absent or non-numeric readings are classified UNKNOWN downstream.
    pub value: Option<f64>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub status: Status,
    pub status_message: String,
}

impl Reading {
    pub fn new(plugin_id: impl Into<String>, timestamp: i64, value: f64) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            timestamp,
            value: Some(value),
            attributes: BTreeMap::new(),
            status: Status::Ok,
            status_message: String::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Status / thresholds
// ============================================================================

/// Status level produced by the Threshold Evaluator (and, in degraded form,
/// self-reported by a plugin when it cannot produce a numeric value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Status {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "OK",
            Status::Warning => "WARNING",
            Status::Critical => "CRITICAL",
            Status::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Which side of the threshold comparison is "bad".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// cpu, memory, disk: higher values are worse.
    GreaterIsBad,
    /// e.g. free-space-remaining style metrics: lower values are worse.
    LessIsBad,
}

/// Per-plugin threshold tuple (spec.md §3 "Threshold configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub warning: f64,
    pub critical: f64,
    pub direction: Direction,
    /// Numeric buffer required to cross back through a threshold when
    /// de-escalating (hysteresis band).
    pub hysteresis: f64,
    /// Minimum consecutive samples in a new band before the transition
    /// takes effect.
    pub min_consecutive: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            warning: 70.0,
            critical: 85.0,
            direction: Direction::GreaterIsBad,
            hysteresis: 5.0,
            min_consecutive: 1,
        }
    }
}

impl ThresholdConfig {
    /// Invariant check per spec.md §3: warning and critical are on the
    /// same side of the comparison and ordered consistently with direction.
    pub fn validate(&self) -> Result<(), String> {
        match self.direction {
            Direction::GreaterIsBad if self.critical < self.warning => Err(format!(
                "critical ({}) must be >= warning ({}) for greater-is-bad direction",
                self.critical, self.warning
            )),
            Direction::LessIsBad if self.critical > self.warning => Err(format!(
                "critical ({}) must be <= warning ({}) for less-is-bad direction",
                self.critical, self.warning
            )),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// History series identity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub plugin_id: String,
    pub metric_name: String,
}

impl SeriesKey {
    pub fn new(plugin_id: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            metric_name: metric_name.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.plugin_id, self.metric_name)
    }
}

// ============================================================================
// Anomaly detection
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub enabled: bool,
    pub sensitivity: f64,
    pub window: usize,
    pub min_points: usize,
    pub detect_trends: bool,
    pub detect_spikes: bool,
    pub consecutive_threshold: u32,
    pub cooldown_seconds: i64,
    pub trend_slope_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: 2.0,
            window: 20,
            min_points: 10,
            detect_trends: true,
            detect_spikes: true,
            consecutive_threshold: 3,
            cooldown_seconds: 1800,
            trend_slope_threshold: 2.0,
        }
    }
}

impl AnomalyConfig {
    /// Invariants from spec.md §3: W >= P >= 2, sigma > 0, K >= 1.
    pub fn validate(&self) -> Result<(), String> {
        if self.window < self.min_points {
            return Err(format!(
                "window ({}) must be >= min_points ({})",
                self.window, self.min_points
            ));
        }
        if self.min_points < 2 {
            return Err(format!("min_points ({}) must be >= 2", self.min_points));
        }
        if self.sensitivity <= 0.0 {
            return Err(format!("sensitivity ({}) must be > 0", self.sensitivity));
        }
        if self.consecutive_threshold < 1 {
            return Err("consecutive_threshold must be >= 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnomalyType {
    OutlierHigh,
    OutlierLow,
    TrendUp,
    TrendDown,
    SpikeUp,
    SpikeDown,
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnomalyType::OutlierHigh => "outlier-high",
            AnomalyType::OutlierLow => "outlier-low",
            AnomalyType::TrendUp => "trend-up",
            AnomalyType::TrendDown => "trend-down",
            AnomalyType::SpikeUp => "spike-up",
            AnomalyType::SpikeDown => "spike-down",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub is_anomaly: bool,
    pub types: Vec<AnomalyType>,
    pub z_score: f64,
    pub timestamp: i64,
}

// ============================================================================
// Alerting vocabulary
// ============================================================================

/// Identifier used by the Alert State Machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKey {
    Plugin(String),
    Anomaly(String),
    Composite(String),
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKey::Plugin(id) => write!(f, "{id}"),
            AlertKey::Anomaly(id) => write!(f, "anomaly:{id}"),
            AlertKey::Composite(id) => write!(f, "composite:{id}"),
        }
    }
}

impl std::str::FromStr for AlertKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if let Some(rest) = s.strip_prefix("anomaly:") {
            AlertKey::Anomaly(rest.to_string())
        } else if let Some(rest) = s.strip_prefix("composite:") {
            AlertKey::Composite(rest.to_string())
        } else {
            AlertKey::Plugin(s.to_string())
        })
    }
}

/// Coarse severity used for notification rendering (template colour,
/// composite-rule severity, plugin-error severity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Low,
    Medium,
    Warning,
    High,
    Critical,
}

impl Severity {
    /// Hex colour used by chat-card channels (teams/slack/discord).
    pub fn color_hex(self) -> &'static str {
        match self {
            Severity::Info => "#0078D7",
            Severity::Low => "#6FCF97",
            Severity::Medium => "#F2C94C",
            Severity::Warning => "#F2994A",
            Severity::High => "#EB5757",
            Severity::Critical => "#9B1C1C",
        }
    }

    pub fn from_status(status: Status) -> Self {
        match status {
            Status::Ok => Severity::Info,
            Status::Warning => Severity::Warning,
            Status::Critical => Severity::Critical,
            Status::Unknown => Severity::Low,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Template-selection bucket (spec.md §3 Notification template).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Alert,
    Info,
    Test,
    Recovery,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Alert => "alert",
            EventKind::Info => "info",
            EventKind::Test => "test",
            EventKind::Recovery => "recovery",
        };
        write!(f, "{s}")
    }
}

/// What produced the event (spec.md §4.7 dispatch contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Plugin,
    Anomaly,
    Composite,
    Test,
    Info,
    Recovery,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Plugin => "plugin",
            SourceKind::Anomaly => "anomaly",
            SourceKind::Composite => "composite",
            SourceKind::Test => "test",
            SourceKind::Info => "info",
            SourceKind::Recovery => "recovery",
        };
        write!(f, "{s}")
    }
}

/// Notification channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    Teams,
    Slack,
    Discord,
    Email,
    Webhook,
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelId::Teams => "teams",
            ChannelId::Slack => "slack",
            ChannelId::Discord => "discord",
            ChannelId::Email => "email",
            ChannelId::Webhook => "webhook",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ChannelId {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "teams" => Ok(ChannelId::Teams),
            "slack" => Ok(ChannelId::Slack),
            "discord" => Ok(ChannelId::Discord),
            "email" => Ok(ChannelId::Email),
            "webhook" => Ok(ChannelId::Webhook),
            other => Err(format!("unknown channel id: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_validate_rejects_inverted_greater_is_bad() {
        let cfg = ThresholdConfig {
            warning: 90.0,
            critical: 80.0,
            direction: Direction::GreaterIsBad,
            ..ThresholdConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn anomaly_config_validate_enforces_window_ge_min_points() {
        let cfg = AnomalyConfig {
            window: 5,
            min_points: 10,
            ..AnomalyConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn alert_key_display() {
        assert_eq!(AlertKey::Plugin("cpu".into()).to_string(), "cpu");
        assert_eq!(AlertKey::Composite("disk-full".into()).to_string(), "composite:disk-full");
    }
}
