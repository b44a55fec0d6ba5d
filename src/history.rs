//! History Store (spec.md §4.2, component C2).
//!
//! Append-only, bounded per-(plugin, metric) time series. The ring lives in
//! memory behind a single `RwLock`; appends optionally mirror to an
//! append-only CSV file under `logs/anomaly/<plugin>_<metric>.dat` so history
//! survives restarts (spec.md §6 persisted-state layout). `record` is the
//! only mutator — callers never get a `&mut` into the ring directly.

use crate::error::HistoryError;
use crate::types::SeriesKey;
use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: i64,
    pub value: f64,
}

/// Result of `statistics()`: count, arithmetic mean, corrected sample
/// standard deviation, and median over the requested window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Statistics {
    pub count: usize,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

pub struct HistoryStore {
    series: RwLock<HashMap<SeriesKey, VecDeque<Sample>>>,
    capacity: usize,
    persist_dir: Option<PathBuf>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            capacity,
            persist_dir: None,
        }
    }

    /// Enable on-disk mirroring under `dir/logs/anomaly/`.
    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }

    fn series_path(&self, key: &SeriesKey) -> Option<PathBuf> {
        self.persist_dir.as_ref().map(|root| {
            root.join("logs")
                .join("anomaly")
                .join(format!("{}_{}.dat", key.plugin_id, key.metric_name))
        })
    }

    /// Restore a series's ring from its on-disk mirror, if one exists. An
    /// unreadable or malformed file is treated as empty history, never an
    /// error (spec.md §4.2 "Retention").
    pub fn load_persisted(&self, key: &SeriesKey) {
        let Some(path) = self.series_path(key) else {
            return;
        };
        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(_) => return,
        };
        let mut samples = VecDeque::new();
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            let Some((ts_str, val_str)) = line.split_once(',') else {
                continue;
            };
            let (Ok(ts), Ok(val)) = (ts_str.trim().parse::<i64>(), val_str.trim().parse::<f64>())
            else {
                continue;
            };
            samples.push_back(Sample {
                timestamp: ts,
                value: val,
            });
            while samples.len() > self.capacity {
                samples.pop_front();
            }
        }
        if samples.is_empty() {
            return;
        }
        let mut guard = self.series.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.clone(), samples);
    }

    /// Append one reading to the tail of `key`'s ring, dropping the oldest
    /// entry once the ring exceeds `capacity`.
    pub fn record(&self, key: &SeriesKey, timestamp: i64, value: f64) -> Result<(), HistoryError> {
        {
            let mut guard = self.series.write().unwrap_or_else(|e| e.into_inner());
            let ring = guard.entry(key.clone()).or_default();
            ring.push_back(Sample { timestamp, value });
            while ring.len() > self.capacity {
                ring.pop_front();
            }
        }
        if let Some(path) = self.series_path(key) {
            if let Err(e) = append_csv(&path, timestamp, value) {
                warn!(series = %key, error = %e, "failed to persist history sample, continuing in-memory only");
            }
        }
        Ok(())
    }

    /// The last `n` samples in insertion order (oldest first).
    pub fn window(&self, key: &SeriesKey, n: usize) -> Vec<Sample> {
        let guard = self.series.read().unwrap_or_else(|e| e.into_inner());
        match guard.get(key) {
            Some(ring) => {
                let skip = ring.len().saturating_sub(n);
                ring.iter().skip(skip).copied().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn len(&self, key: &SeriesKey) -> usize {
        let guard = self.series.read().unwrap_or_else(|e| e.into_inner());
        guard.get(key).map_or(0, VecDeque::len)
    }

    /// Count, mean, corrected sample standard deviation, and median over the
    /// last `n` points (spec.md §4.2 "Statistics").
    pub fn statistics(&self, key: &SeriesKey, n: usize) -> Statistics {
        let window = self.window(key, n);
        statistics_of(&window)
    }
}

pub fn statistics_of(window: &[Sample]) -> Statistics {
    let count = window.len();
    if count == 0 {
        return Statistics::default();
    }
    let mean = window.iter().map(|s| s.value).sum::<f64>() / count as f64;
    let stddev = if count < 2 {
        0.0
    } else {
        let sum_sq = window.iter().map(|s| (s.value - mean).powi(2)).sum::<f64>();
        (sum_sq / (count as f64 - 1.0)).sqrt()
    };
    let mut sorted: Vec<f64> = window.iter().map(|s| s.value).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = if count % 2 == 1 {
        sorted[count / 2]
    } else {
        (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
    };
    Statistics {
        count,
        mean,
        stddev,
        median,
    }
}

fn append_csv(path: &Path, timestamp: i64, value: f64) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{timestamp},{value}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SeriesKey {
        SeriesKey::new("cpu", "value")
    }

    #[test]
    fn ring_bounded_at_capacity() {
        let store = HistoryStore::new(3);
        for i in 0..10 {
            store.record(&key(), i, i as f64).unwrap();
        }
        assert_eq!(store.len(&key()), 3);
        let window = store.window(&key(), 10);
        assert_eq!(window.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[test]
    fn statistics_single_point_has_zero_stddev() {
        let store = HistoryStore::new(10);
        store.record(&key(), 1, 42.0).unwrap();
        let stats = store.statistics(&key(), 10);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.stddev, 0.0);
        assert_eq!(stats.median, 42.0);
    }

    #[test]
    fn statistics_even_count_median_averages_middle_two() {
        let store = HistoryStore::new(10);
        for v in [10.0, 20.0, 30.0, 40.0] {
            store.record(&key(), 0, v).unwrap();
        }
        let stats = store.statistics(&key(), 10);
        assert_eq!(stats.median, 25.0);
        assert!((stats.mean - 25.0).abs() < 1e-9);
    }

    #[test]
    fn statistics_corrected_stddev() {
        let store = HistoryStore::new(10);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            store.record(&key(), 0, v).unwrap();
        }
        let stats = store.statistics(&key(), 10);
        // known sample stddev of this classic example is 2.138...
        assert!((stats.stddev - 2.1380899).abs() < 1e-5);
    }

    #[test]
    fn missing_series_returns_empty_window_and_zeroed_statistics() {
        let store = HistoryStore::new(10);
        assert!(store.window(&key(), 5).is_empty());
        assert_eq!(store.statistics(&key(), 5), Statistics::default());
    }

    #[test]
    fn load_persisted_treats_corrupt_file_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("logs")
            .join("anomaly")
            .join("cpu_value.dat");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not,valid\ngarbage\n1,2,3\n").unwrap();
        let store = HistoryStore::new(10).with_persist_dir(dir.path());
        store.load_persisted(&key());
        assert_eq!(store.len(&key()), 0);
    }

    #[test]
    fn record_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(10).with_persist_dir(dir.path());
        store.record(&key(), 1, 1.0).unwrap();
        store.record(&key(), 2, 2.0).unwrap();

        let store2 = HistoryStore::new(10).with_persist_dir(dir.path());
        store2.load_persisted(&key());
        assert_eq!(store2.len(&key()), 2);
    }
}
