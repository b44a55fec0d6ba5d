use super::{Plugin, PluginContext, PluginInfo};
use crate::config::RootConfig;
use crate::error::PluginError;
use crate::types::{AttributeValue, Direction, Reading, ThresholdConfig};
use async_trait::async_trait;
use std::collections::HashSet;
use sysinfo::System;

/// Percent of used physical memory (spec.md §4.1 "memory").
pub struct MemoryPlugin {
    warning: f64,
    critical: f64,
    hysteresis: f64,
    min_consecutive: u32,
}

impl MemoryPlugin {
    pub fn new() -> Self {
        Self {
            warning: 80.0,
            critical: 92.0,
            hysteresis: 5.0,
            min_consecutive: 1,
        }
    }
}

impl Default for MemoryPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for MemoryPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "memory".to_string(),
            version: "1.0.0".to_string(),
            declared_attributes: HashSet::from([
                "total_bytes".to_string(),
                "used_bytes".to_string(),
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
        let t = cfg.plugins.memory.threshold_config(Direction::GreaterIsBad);
        t.validate()
            .map_err(|e| PluginError::ConfigureFailed("memory".to_string(), e))?;
        self.warning = t.warning;
        self.critical = t.critical;
        self.hysteresis = t.hysteresis;
        self.min_consecutive = t.min_consecutive;
        Ok(())
    }

    async fn check(&self, ctx: &PluginContext) -> Result<Reading, PluginError> {
        let (total, used) = tokio::task::spawn_blocking(|| {
            let mut sys = System::new_all();
            sys.refresh_memory();
            (sys.total_memory(), sys.used_memory())
        })
        .await
        .map_err(|e| PluginError::CheckFailed("memory".to_string(), e.to_string()))?;

        if total == 0 {
            return Err(PluginError::MalformedReading(
                "memory".to_string(),
                "host reported zero total memory".to_string(),
            ));
        }
        let percent = used as f64 / total as f64 * 100.0;

        Ok(Reading::new("memory", ctx.now, percent)
            .with_attribute("total_bytes", AttributeValue::Number(total as f64))
            .with_attribute("used_bytes", AttributeValue::Number(used as f64)))
    }
}
