//! Metric Sampler / Plugin Runtime (spec.md §4.1, component C1).
//!
//! `Plugin` is the tagged-capability trait every sampler implements
//! (`info` / `configure` / `check`), mirroring the teacher's
//! `TacticalAgent`/`StrategicAgent` pattern of a small, fixed set of
//! polymorphic roles rather than an open plugin-loading system. The four
//! built-ins are registered by id from `plugins.enabled`; the registry is
//! populated once at startup and is read-only thereafter (spec.md §9
//! "Global mutable state").

mod cpu;
mod disk;
mod memory;
mod process;

pub use cpu::CpuPlugin;
pub use disk::DiskPlugin;
pub use memory::MemoryPlugin;
pub use process::ProcessPlugin;

use crate::config::RootConfig;
use crate::error::PluginError;
use crate::types::{Reading, ThresholdConfig};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub declared_attributes: HashSet<String>,
    pub default_thresholds: ThresholdConfig,
}

/// Shared, read-only handle each `check()` invocation gets. `system` is
/// available to any plugin that wants to reuse a warmed-up `sysinfo::System`
/// handle instead of building its own; the built-ins each refresh only the
/// facet they need and none currently hold it across a tick (spec.md §5:
/// plugin checks "are pure with respect to shared state" — the mutex here
/// guards only the OS snapshot, not any engine state).
pub struct PluginContext {
    pub now: i64,
    pub system: Arc<Mutex<System>>,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;
    fn configure(&mut self, cfg: &RootConfig) -> Result<(), PluginError>;
    async fn check(&self, ctx: &PluginContext) -> Result<Reading, PluginError>;
}

#[derive(Debug, Clone, Default)]
pub struct PluginPerf {
    pub invocations: u64,
    pub errors: u64,
    pub last_duration_ms: u64,
    pub last_check_at: Option<i64>,
}

/// Populated once at startup from `plugins.enabled`, in declared order;
/// fixed for the lifetime of the run (spec.md §4.1 "Registration" — a
/// reload is a restart).
pub struct PluginRegistry {
    plugins: Vec<(String, tokio::sync::Mutex<Box<dyn Plugin>>)>,
    perf: Mutex<HashMap<String, PluginPerf>>,
    system: Arc<Mutex<System>>,
}

impl PluginRegistry {
    pub fn build(cfg: &RootConfig) -> Self {
        let mut plugins = Vec::new();
        for id in &cfg.plugins.enabled {
            let mut plugin: Box<dyn Plugin> = match id.as_str() {
                "cpu" => Box::new(CpuPlugin::new()),
                "memory" => Box::new(MemoryPlugin::new()),
                "disk" => Box::new(DiskPlugin::new()),
                "process" => Box::new(ProcessPlugin::new()),
                other => {
                    warn!(plugin = %other, "unknown plugin id in plugins.enabled, skipping");
                    continue;
                }
            };
            match plugin.configure(cfg) {
                Ok(()) => plugins.push((id.clone(), tokio::sync::Mutex::new(plugin))),
                Err(e) => {
                    warn!(plugin = %id, error = %e, "plugin configuration rejected, not registering");
                }
            }
        }
        Self {
            plugins,
            perf: Mutex::new(HashMap::new()),
            system: Arc::new(Mutex::new(System::new_all())),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.plugins.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.plugins.iter().any(|(pid, _)| pid == id)
    }

    pub fn context(&self, now: i64) -> PluginContext {
        PluginContext {
            now,
            system: self.system.clone(),
        }
    }

    /// Declared attribute sets for every registered plugin, used by the
    /// Composite Evaluator to validate rule references at load time.
    pub async fn attribute_catalog(&self) -> HashMap<String, HashSet<String>> {
        let mut out = HashMap::new();
        for (id, plugin) in &self.plugins {
            let info = plugin.lock().await.info();
            out.insert(id.clone(), info.declared_attributes);
        }
        out
    }

    /// Declared default thresholds for every registered plugin (the
    /// `ThresholdConfig` each plugin's own `configure()` already derived
    /// from `RootConfig`), used by the Scheduler so threshold policy lives
    /// in one place per plugin rather than being re-read from config twice.
    pub async fn threshold_catalog(&self) -> HashMap<String, ThresholdConfig> {
        let mut out = HashMap::new();
        for (id, plugin) in &self.plugins {
            let info = plugin.lock().await.info();
            out.insert(id.clone(), info.default_thresholds);
        }
        out
    }

    /// Run every registered plugin's `check()` concurrently, each under its
    /// own timeout. Spec.md §4.1 "Failures": a plugin error produces no
    /// Reading for that tick, it never gates the others. Plugins borrow
    /// `self` rather than being spawned as separate tasks — concurrency is
    /// at the async-executor level (cooperative polling via `join_all`),
    /// which satisfies spec.md §5's "concurrency is always equal to the
    /// enumerated registry size" without requiring plugins to be `'static`.
    pub async fn check_all(
        &self,
        timeout: Duration,
        now: i64,
    ) -> Vec<(String, Result<Reading, PluginError>)> {
        let ctx = PluginContext {
            now,
            system: self.system.clone(),
        };
        let futures = self
            .plugins
            .iter()
            .map(|(id, _)| async { (id.clone(), self.check_one(id, &ctx, timeout).await) });
        futures::future::join_all(futures).await
    }

    /// Run a single registered plugin's `check()`, for the `check --plugin
    /// NAME` CLI command.
    pub async fn check_one(
        &self,
        id: &str,
        ctx: &PluginContext,
        timeout: Duration,
    ) -> Result<Reading, PluginError> {
        let Some((_, plugin)) = self.plugins.iter().find(|(pid, _)| pid == id) else {
            return Err(PluginError::NotRegistered(id.to_string()));
        };
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, async {
            let guard = plugin.lock().await;
            guard.check(ctx).await
        })
        .await;

        let mut perf_guard = self.perf.lock().unwrap_or_else(|e| e.into_inner());
        let perf = perf_guard.entry(id.to_string()).or_default();
        perf.invocations += 1;
        perf.last_check_at = Some(ctx.now);
        perf.last_duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(reading)) => Ok(reading),
            Ok(Err(e)) => {
                perf.errors += 1;
                Err(e)
            }
            Err(_) => {
                perf.errors += 1;
                Err(PluginError::Timeout(id.to_string(), timeout))
            }
        }
    }

    pub fn perf_snapshot(&self) -> HashMap<String, PluginPerf> {
        self.perf.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_skips_unknown_plugin_ids() {
        let mut cfg = RootConfig::default();
        cfg.plugins.enabled = vec!["cpu".to_string(), "not-a-real-plugin".to_string()];
        let registry = PluginRegistry::build(&cfg);
        assert_eq!(registry.ids(), vec!["cpu".to_string()]);
    }

    #[tokio::test]
    async fn check_all_runs_every_registered_plugin() {
        let mut cfg = RootConfig::default();
        cfg.plugins.enabled = vec!["cpu".to_string(), "memory".to_string()];
        let registry = PluginRegistry::build(&cfg);
        let results = registry.check_all(Duration::from_secs(5), 0).await;
        assert_eq!(results.len(), 2);
        for (_, result) in &results {
            assert!(result.is_ok());
        }
    }
}
