use super::{Plugin, PluginContext, PluginInfo};
use crate::config::RootConfig;
use crate::error::PluginError;
use crate::types::{AttributeValue, Direction, Reading, ThresholdConfig};
use async_trait::async_trait;
use std::collections::HashSet;
use sysinfo::System;

/// Watches a configured list of process names; the primary value is the
/// count of configured names with no matching running process, and the
/// attribute lists which ones are missing (spec.md §4.1 "process").
pub struct ProcessPlugin {
    names: Vec<String>,
    warning: f64,
    critical: f64,
    hysteresis: f64,
    min_consecutive: u32,
}

impl ProcessPlugin {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            warning: 1.0,
            critical: 1.0,
            hysteresis: 0.0,
            min_consecutive: 1,
        }
    }
}

impl Default for ProcessPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ProcessPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "process".to_string(),
            version: "1.0.0".to_string(),
            declared_attributes: HashSet::from(["missing".to_string(), "watched".to_string()]),
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
        self.names = cfg.plugins.process.names.clone();
        if self.names.is_empty() {
            return Err(PluginError::ConfigureFailed(
                "process".to_string(),
                "plugins.process.names must list at least one process name".to_string(),
            ));
        }
        Ok(())
    }

    async fn check(&self, ctx: &PluginContext) -> Result<Reading, PluginError> {
        let names = self.names.clone();
        let missing = tokio::task::spawn_blocking(move || {
            let mut sys = System::new_all();
            sys.refresh_processes();
            let running: HashSet<String> = sys
                .processes()
                .values()
                .map(|p| p.name().to_string())
                .collect();
            names
                .into_iter()
                .filter(|n| !running.contains(n))
                .collect::<Vec<String>>()
        })
        .await
        .map_err(|e| PluginError::CheckFailed("process".to_string(), e.to_string()))?;

        let count = missing.len() as f64;

        Ok(Reading::new("process", ctx.now, count)
            .with_attribute("missing", AttributeValue::Text(missing.join(",")))
            .with_attribute("watched", AttributeValue::Text(self.names.join(","))))
    }
}
