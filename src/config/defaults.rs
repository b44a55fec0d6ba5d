//! Default values for config fields, referenced by `#[serde(default = "...")]`.
//!
//! Kept as free functions (rather than `impl Default` inline) so serde can
//! point a per-field default at one without requiring the whole struct's
//! `Default` impl to run first.

pub fn system_enabled() -> bool {
    true
}

pub fn check_interval() -> u64 {
    60
}

pub fn check_timeout() -> u64 {
    30
}

pub fn hysteresis() -> f64 {
    5.0
}

pub fn min_consecutive() -> u32 {
    1
}

pub fn top_consumers() -> usize {
    5
}

pub fn disk_mount() -> String {
    "/".to_string()
}

pub fn enabled_plugins() -> Vec<String> {
    vec![
        "cpu".to_string(),
        "memory".to_string(),
        "disk".to_string(),
    ]
}

pub fn global_min_interval_seconds() -> i64 {
    60
}

pub fn plugin_alert_cooldown_seconds() -> i64 {
    300
}

pub fn anomaly_alert_cooldown_seconds() -> i64 {
    1800
}

pub fn anomaly_enabled() -> bool {
    true
}

pub fn default_sensitivity() -> f64 {
    2.0
}

pub fn data_retention_days() -> u64 {
    30
}

pub fn composite_config_directory() -> String {
    "composite.d".to_string()
}

pub fn project_root() -> std::path::PathBuf {
    std::path::PathBuf::from(".")
}

pub fn history_capacity() -> usize {
    1000
}

pub fn plugin_check_timeout_seconds() -> u64 {
    30
}

pub fn channel_send_timeout_seconds() -> u64 {
    10
}

pub fn dispatch_budget_seconds() -> u64 {
    15
}
