//! Crash Reporter (spec.md §7, component C10).
//!
//! On a fatal `SentryError` the daemon writes a JSON report before exiting
//! non-zero, giving the next `status` call (or an operator) a durable
//! record of the last failure. Shape and call site mirror the teacher's
//! pattern of pairing a typed error enum with structured `error!` logging.

use crate::error::{Remediable, SentryError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::error;

#[derive(Debug, Serialize)]
pub struct CrashReport {
    pub timestamp: i64,
    pub error_kind: String,
    pub message: String,
    pub resource: String,
    pub remedy: String,
    pub backtrace: String,
}

impl CrashReport {
    pub fn from_error(err: &SentryError, now: i64) -> Self {
        Self {
            timestamp: now,
            error_kind: err.kind_tag().to_string(),
            message: err.to_string(),
            resource: err.resource(),
            remedy: err.remedy(),
            backtrace: std::backtrace::Backtrace::force_capture().to_string(),
        }
    }

    /// Write the report to `<project_root>/crash_report.json`, logging
    /// (rather than propagating) any failure to do so — a crash reporter
    /// that itself panics on write failure would defeat its purpose.
    pub fn write(&self, project_root: &Path) -> PathBuf {
        let path = project_root.join("crash_report.json");
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    error!(error = %e, path = %path.display(), "failed to write crash report");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize crash report"),
        }
        path
    }
}

pub fn report(err: &SentryError, project_root: &Path, now: i64) -> PathBuf {
    let report = CrashReport::from_error(err, now);
    error!(
        kind = report.error_kind,
        resource = report.resource,
        remedy = report.remedy,
        "fatal error, writing crash report"
    );
    report.write(project_root)
}
