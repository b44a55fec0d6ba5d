//! Anomaly Detector (spec.md §4.4, component C4).
//!
//! `detect()` is a pure function over a history window and a candidate
//! value — no I/O. The per-day verdict log and consecutive-anomaly count
//! that the Alert State Machine consumes live in `AnomalyLog`, which does
//! the filesystem side of spec.md §6's `logs/anomaly/results/` layout.
//!
//! spec.md §9 flags the source's `get_consecutive_count` as probably
//! broken (the counter lives in a `tail -n1`-terminated subshell and never
//! escapes it). `AnomalyLog::consecutive_anomalies` implements the intended
//! semantics directly: count contiguous anomalous verdicts starting from
//! the most recent log entry and walking backwards.

use crate::types::{AnomalyConfig, AnomalyType, AnomalyVerdict};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One point in a history window, decoupled from `history::Sample` so this
/// module has no dependency on the store's internals.
#[derive(Debug, Clone, Copy)]
pub struct Point {
    pub value: f64,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn corrected_stddev(values: &[f64], mean_val: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean_val).powi(2)).sum();
    (sum_sq / (values.len() as f64 - 1.0)).sqrt()
}

/// Least-squares slope of `values` against their index `0..values.len()`.
fn linreg_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let x_mean = mean(&xs);
    let y_mean = mean(values);
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in xs.iter().zip(values.iter()) {
        num += (x - x_mean) * (y - y_mean);
        den += (x - x_mean).powi(2);
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Classify `value` against the last `window` history points (spec.md §4.4).
///
/// Preconditions: with fewer than `cfg.min_points` points, or with a
/// computed standard deviation of 0 over the window, this always returns
/// `is_anomaly: false` regardless of value.
pub fn detect(window: &[Point], value: f64, cfg: &AnomalyConfig) -> AnomalyVerdict {
    let values: Vec<f64> = window.iter().map(|p| p.value).collect();
    if values.len() < cfg.min_points {
        return AnomalyVerdict {
            is_anomaly: false,
            types: Vec::new(),
            z_score: 0.0,
            timestamp: 0,
        };
    }

    let window_mean = mean(&values);
    let stddev = corrected_stddev(&values, window_mean);
    if stddev == 0.0 {
        return AnomalyVerdict {
            is_anomaly: false,
            types: Vec::new(),
            z_score: 0.0,
            timestamp: 0,
        };
    }

    let z = (value - window_mean) / stddev;
    let mut types = Vec::new();

    if z.abs() > cfg.sensitivity {
        types.push(if z > 0.0 {
            AnomalyType::OutlierHigh
        } else {
            AnomalyType::OutlierLow
        });
    }

    if cfg.detect_trends {
        let slope = linreg_slope(&values);
        if slope > cfg.trend_slope_threshold {
            types.push(AnomalyType::TrendUp);
        } else if slope < -cfg.trend_slope_threshold {
            types.push(AnomalyType::TrendDown);
        }
    }

    if cfg.detect_spikes {
        let tail_n = values.len().min(5);
        let recent_mean = mean(&values[values.len() - tail_n..]);
        let delta = value - recent_mean;
        if delta.abs() > 3.0 * stddev {
            types.push(if delta > 0.0 {
                AnomalyType::SpikeUp
            } else {
                AnomalyType::SpikeDown
            });
        }
    }

    AnomalyVerdict {
        is_anomaly: !types.is_empty(),
        types,
        z_score: z,
        timestamp: 0,
    }
}

// ============================================================================
// Per-day verdict log (spec.md §6 persisted-state layout)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogLine {
    timestamp: i64,
    metric: String,
    is_anomaly: bool,
    types: Vec<AnomalyType>,
    z_score: f64,
}

pub struct AnomalyLog {
    root: PathBuf,
}

impl AnomalyLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn results_dir(&self) -> PathBuf {
        self.root.join("logs").join("anomaly").join("results")
    }

    fn day_path(&self, plugin_id: &str, timestamp: i64) -> PathBuf {
        let day = day_string(timestamp);
        self.results_dir().join(format!("{plugin_id}_{day}.log"))
    }

    fn last_notification_path(&self, plugin_id: &str) -> PathBuf {
        self.results_dir()
            .join(format!("{plugin_id}_last_notification"))
    }

    /// Append one verdict to today's per-plugin log (spec.md §6).
    pub fn append(
        &self,
        plugin_id: &str,
        metric_name: &str,
        verdict: &AnomalyVerdict,
    ) -> std::io::Result<()> {
        let path = self.day_path(plugin_id, verdict.timestamp);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = LogLine {
            timestamp: verdict.timestamp,
            metric: metric_name.to_string(),
            is_anomaly: verdict.is_anomaly,
            types: verdict.types.clone(),
            z_score: verdict.z_score,
        };
        let json = serde_json::to_string(&line)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{json}")
    }

    /// Count contiguous anomalous verdicts walking backwards from the most
    /// recent entry in today's (and, if needed, yesterday's) log. Resets to
    /// 0 the moment a non-anomalous verdict is encountered.
    pub fn consecutive_anomalies(&self, plugin_id: &str, now: i64) -> u32 {
        let mut lines = Vec::new();
        for day_offset in [0i64, 1] {
            let path = self.day_path(plugin_id, now - day_offset * 86_400);
            lines.extend(read_log_lines(&path));
            if day_offset == 0 && !lines.is_empty() {
                // today's log alone is usually sufficient; only look back a
                // day if today's log is empty (tick just rolled past midnight).
                break;
            }
        }
        lines.sort_by_key(|l| l.timestamp);
        let mut count = 0;
        for line in lines.iter().rev() {
            if line.is_anomaly {
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    pub fn read_last_notification(&self, plugin_id: &str) -> Option<i64> {
        let path = self.last_notification_path(plugin_id);
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn write_last_notification(&self, plugin_id: &str, timestamp: i64) -> std::io::Result<()> {
        let path = self.last_notification_path(plugin_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("{timestamp}\n"))
    }
}

fn day_string(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now)
        .format("%Y%m%d")
        .to_string()
}

fn read_log_lines(path: &Path) -> Vec<LogLine> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogLine>(&line) {
            Ok(parsed) => out.push(parsed),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed anomaly log line"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AnomalyConfig {
        AnomalyConfig::default()
    }

    #[test]
    fn fewer_than_min_points_never_anomalous() {
        let window: Vec<Point> = (0..9).map(|i| Point { value: i as f64 }).collect();
        let verdict = detect(&window, 60.0, &cfg());
        assert!(!verdict.is_anomaly);
    }

    #[test]
    fn zero_stddev_treated_as_non_anomalous() {
        let window: Vec<Point> = (0..20).map(|_| Point { value: 42.0 }).collect();
        let verdict = detect(&window, 42.0, &cfg());
        assert!(!verdict.is_anomaly);
        assert_eq!(verdict.z_score, 0.0);
    }

    #[test]
    fn outlier_high_detected_per_spec_scenario_5() {
        // last 20 values in [40..45], new value 60.
        let window: Vec<Point> = (0..20)
            .map(|i| Point {
                value: 40.0 + (i % 6) as f64,
            })
            .collect();
        let verdict = detect(&window, 60.0, &cfg());
        assert!(verdict.is_anomaly);
        assert!(verdict.types.contains(&AnomalyType::OutlierHigh));
        assert!(verdict.z_score.abs() > cfg().sensitivity);
    }

    #[test]
    fn trend_up_detected_for_steadily_rising_window() {
        let window: Vec<Point> = (0..20).map(|i| Point { value: i as f64 * 5.0 }).collect();
        let verdict = detect(&window, 95.0, &cfg());
        assert!(verdict.types.contains(&AnomalyType::TrendUp));
    }

    #[test]
    fn spike_up_detected_against_recent_five() {
        let mut window: Vec<Point> = (0..15).map(|_| Point { value: 10.0 }).collect();
        window.extend((0..5).map(|_| Point { value: 10.5 }));
        let verdict = detect(&window, 40.0, &cfg());
        assert!(verdict.types.contains(&AnomalyType::SpikeUp));
    }

    #[test]
    fn consecutive_anomalies_counts_backwards_and_stops_at_first_normal() {
        let dir = tempfile::tempdir().unwrap();
        let log = AnomalyLog::new(dir.path());
        let base = 1_700_000_000i64;
        let verdicts = [
            (base, false),
            (base + 60, true),
            (base + 120, true),
            (base + 180, true),
        ];
        for (ts, is_anomaly) in verdicts {
            let v = AnomalyVerdict {
                is_anomaly,
                types: if is_anomaly {
                    vec![AnomalyType::OutlierHigh]
                } else {
                    vec![]
                },
                z_score: 0.0,
                timestamp: ts,
            };
            log.append("cpu", "value", &v).unwrap();
        }
        assert_eq!(log.consecutive_anomalies("cpu", base + 180), 3);
    }

    #[test]
    fn last_notification_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let log = AnomalyLog::new(dir.path());
        assert_eq!(log.read_last_notification("cpu"), None);
        log.write_last_notification("cpu", 12345).unwrap();
        assert_eq!(log.read_last_notification("cpu"), Some(12345));
    }
}
