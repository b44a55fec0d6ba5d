use super::{Plugin, PluginContext, PluginInfo};
use crate::config::RootConfig;
use crate::error::PluginError;
use crate::types::{AttributeValue, Direction, Reading, ThresholdConfig};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use sysinfo::Disks;

/// Percent used for a configured mount (default `/`), plus a largest-entry
/// sketch under that mount (spec.md §4.1 "disk").
pub struct DiskPlugin {
    mount: PathBuf,
    warning: f64,
    critical: f64,
    hysteresis: f64,
    min_consecutive: u32,
}

impl DiskPlugin {
    pub fn new() -> Self {
        Self {
            mount: PathBuf::from("/"),
            warning: 80.0,
            critical: 92.0,
            hysteresis: 5.0,
            min_consecutive: 1,
        }
    }
}

impl Default for DiskPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort sketch of the largest top-level entries under `mount`,
/// used only as an informational attribute — never fails the check.
fn largest_entries_sketch(mount: &PathBuf, top_n: usize) -> String {
    let Ok(entries) = std::fs::read_dir(mount) else {
        return String::new();
    };
    let mut sized: Vec<(String, u64)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            let size = if meta.is_dir() {
                dir_size_shallow(&e.path())
            } else {
                meta.len()
            };
            Some((e.file_name().to_string_lossy().to_string(), size))
        })
        .collect();
    sized.sort_by(|a, b| b.1.cmp(&a.1));
    sized.truncate(top_n);
    sized
        .into_iter()
        .map(|(name, size)| format!("{name}:{size}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Non-recursive size estimate (sum of immediate children) to keep the
/// sketch cheap; a full recursive walk is out of scope for an attribute.
fn dir_size_shallow(path: &std::path::Path) -> u64 {
    std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}

#[async_trait]
impl Plugin for DiskPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "disk".to_string(),
            version: "1.0.0".to_string(),
            declared_attributes: HashSet::from([
                "mount".to_string(),
                "largest_entries".to_string(),
                "total_bytes".to_string(),
            ]),
            default_thresholds: ThresholdConfig {
                warning: self.warning,
                critical: self.critical,
                direction: Direction::GreaterIsBad,
                hysteresis: self.hysteresis,
                min_consecutive: self.min_consecutive,
            },
        }
    }

    fn configure(&mut self, cfg: &RootConfig) -> Result<(), PluginError> {
        let t = cfg.plugins.disk.threshold_config(Direction::GreaterIsBad);
        t.validate()
            .map_err(|e| PluginError::ConfigureFailed("disk".to_string(), e))?;
        self.warning = t.warning;
        self.critical = t.critical;
        self.hysteresis = t.hysteresis;
        self.min_consecutive = t.min_consecutive;
        self.mount = PathBuf::from(&cfg.plugins.disk.mount);
        Ok(())
    }

    async fn check(&self, ctx: &PluginContext) -> Result<Reading, PluginError> {
        let mount = self.mount.clone();
        let (percent, total, sketch) = tokio::task::spawn_blocking(move || {
            let disks = Disks::new_with_refreshed_list();
            let matched = disks
                .iter()
                .filter(|d| mount.starts_with(d.mount_point()))
                .max_by_key(|d| d.mount_point().as_os_str().len());

            let (total, available) = match matched {
                Some(d) => (d.total_space(), d.available_space()),
                None => (0, 0),
            };
            let percent = if total == 0 {
                0.0
            } else {
                (total - available) as f64 / total as f64 * 100.0
            };
            let sketch = largest_entries_sketch(&mount, 5);
            (percent, total, sketch)
        })
        .await
        .map_err(|e| PluginError::CheckFailed("disk".to_string(), e.to_string()))?;

        if total == 0 {
            return Err(PluginError::MalformedReading(
                "disk".to_string(),
                format!("no mounted filesystem matched {}", self.mount.display()),
            ));
        }

        Ok(Reading::new("disk", ctx.now, percent)
            .with_attribute("mount", AttributeValue::Text(self.mount.display().to_string()))
            .with_attribute("largest_entries", AttributeValue::Text(sketch))
            .with_attribute("total_bytes", AttributeValue::Number(total as f64)))
    }
}
