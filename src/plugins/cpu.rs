use super::{Plugin, PluginContext, PluginInfo};
use crate::config::RootConfig;
use crate::error::PluginError;
use crate::types::{AttributeValue, Direction, Reading, ThresholdConfig};
use async_trait::async_trait;
use std::collections::HashSet;
use sysinfo::System;

/// Percent CPU utilisation over a 1s sampling interval, plus load-average
/// and top-consumer attributes (spec.md §4.1 "cpu").
pub struct CpuPlugin {
    warning: f64,
    critical: f64,
    hysteresis: f64,
    min_consecutive: u32,
    top_consumers: usize,
}

impl CpuPlugin {
    pub fn new() -> Self {
        Self {
            warning: 70.0,
            critical: 85.0,
            hysteresis: 5.0,
            min_consecutive: 1,
            top_consumers: 5,
        }
    }
}

impl Default for CpuPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for CpuPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "cpu".to_string(),
            version: "1.0.0".to_string(),
            declared_attributes: HashSet::from([
                "load_average".to_string(),
                "top_consumers".to_string(),
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
        let t = cfg.plugins.cpu.threshold_config(Direction::GreaterIsBad);
        t.validate()
            .map_err(|e| PluginError::ConfigureFailed("cpu".to_string(), e))?;
        self.warning = t.warning;
        self.critical = t.critical;
        self.hysteresis = t.hysteresis;
        self.min_consecutive = t.min_consecutive;
        self.top_consumers = cfg.plugins.cpu.top_consumers;
        Ok(())
    }

    async fn check(&self, ctx: &PluginContext) -> Result<Reading, PluginError> {
        let top_consumers = self.top_consumers;
        let (usage, load_avg, top) = tokio::task::spawn_blocking(move || {
            let mut sys = System::new_all();
            sys.refresh_cpu();
            std::thread::sleep(std::time::Duration::from_secs(1));
            sys.refresh_cpu();
            let usage = f64::from(sys.global_cpu_info().cpu_usage());

            let load = System::load_average();

            sys.refresh_processes();
            let mut procs: Vec<(String, f32)> = sys
                .processes()
                .values()
                .map(|p| (p.name().to_string(), p.cpu_usage()))
                .collect();
            procs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            procs.truncate(top_consumers);
            let sketch = procs
                .into_iter()
                .map(|(name, usage)| format!("{name}:{usage:.1}%"))
                .collect::<Vec<_>>()
                .join(",");
            (usage, load, sketch)
        })
        .await
        .map_err(|e| PluginError::CheckFailed("cpu".to_string(), e.to_string()))?;

        if !usage.is_finite() {
            return Err(PluginError::MalformedReading(
                "cpu".to_string(),
                "non-finite cpu usage reading".to_string(),
            ));
        }

        Ok(Reading::new("cpu", ctx.now, usage)
            .with_attribute(
                "load_average",
                AttributeValue::Text(format!(
                    "{:.2},{:.2},{:.2}",
                    load_avg.one, load_avg.five, load_avg.fifteen
                )),
            )
            .with_attribute("top_consumers", AttributeValue::Text(top)))
    }
}
