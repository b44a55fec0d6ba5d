//! Alert State Machine (spec.md §4.6, component C6).
//!
//! The sole mutator of on-disk alert state: every transition is written
//! atomically (write-temp-then-rename) to `<state>/alert_state.json`
//! (spec.md §6). Source-agnostic — plugins, anomaly detections, and
//! composite rules all funnel through the same `Classification` and
//! `decide()` entry point; the Scheduler applies source-specific policy
//! (cooldown seconds, consecutive-anomaly gating) before calling in.

use crate::config::SilenceWindow;
use crate::error::AlertStateError;
use crate::types::{AlertKey, Severity};
use chrono::{TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStatus {
    Normal,
    Firing,
    Suppressed,
    Recovered,
}

/// What the caller handed in for this tick: either nothing is wrong, or a
/// non-OK severity. Composite `Tri::Unknown` and threshold `Status::Unknown`
/// both collapse to `Ok` here — spec.md is explicit that UNKNOWN never
/// fires an alert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification {
    Ok,
    NonOk(Severity),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertState {
    pub status: AlertStatus,
    pub last_emitted_at: Option<i64>,
    pub last_severity: Option<Severity>,
    pub last_recovery_at: Option<i64>,
    #[serde(default)]
    pending_trigger_count: u32,
    #[serde(default)]
    pending_recovery_count: u32,
}

impl Default for AlertState {
    fn default() -> Self {
        Self {
            status: AlertStatus::Normal,
            last_emitted_at: None,
            last_severity: None,
            last_recovery_at: None,
            pending_trigger_count: 0,
            pending_recovery_count: 0,
        }
    }
}

/// Caller-supplied policy for one alert key's evaluation this tick.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    pub cooldown_seconds: i64,
    pub min_consecutive: u32,
    pub recovery_enabled: bool,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            cooldown_seconds: 300,
            min_consecutive: 1,
            recovery_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    None,
    Alert(Severity),
    Recovery,
}

/// Is `now` inside any silence window that applies to `key`?
pub fn is_silenced(now: i64, windows: &[SilenceWindow], key: &AlertKey) -> bool {
    let Some(dt) = Utc.timestamp_opt(now, 0).single() else {
        return false;
    };
    let minute_of_day = dt.hour() * 60 + dt.minute();
    windows.iter().any(|w| {
        let applies = w.keys.is_empty() || w.keys.iter().any(|k| k == &key.to_string());
        if !applies {
            return false;
        }
        if w.start_minute <= w.end_minute {
            minute_of_day >= w.start_minute && minute_of_day < w.end_minute
        } else {
            // wraps past midnight
            minute_of_day >= w.start_minute || minute_of_day < w.end_minute
        }
    })
}

pub struct AlertStateMachine {
    state: Mutex<HashMap<AlertKey, AlertState>>,
    path: PathBuf,
}

impl AlertStateMachine {
    /// Read `<state>/alert_state.json` back, if present. An unreadable or
    /// malformed file is treated as empty (every key starts NORMAL),
    /// never a startup error (spec.md §4.6 "Persistence").
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<HashMap<String, AlertState>>(&contents) {
                Ok(map) => map
                    .into_iter()
                    .filter_map(|(k, v)| {
                        k.parse::<AlertKey>().ok().map(|key| (key, v)).or_else(|| {
                            warn!(raw_key = %k, "dropping unparseable alert state key");
                            None
                        })
                    })
                    .collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse alert state, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            state: Mutex::new(state),
            path,
        }
    }

    fn get(&self, guard: &HashMap<AlertKey, AlertState>, key: &AlertKey) -> AlertState {
        guard.get(key).cloned().unwrap_or_default()
    }

    /// Evaluate one tick's classification for `key` per spec.md §4.6
    /// "Transitions", mutate the in-memory state, and persist it.
    pub fn decide(
        &self,
        key: &AlertKey,
        classification: Classification,
        now: i64,
        silenced: bool,
        policy: &AlertPolicy,
    ) -> Result<Decision, AlertStateError> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut entry = self.get(&guard, key);
        let decision = transition(&mut entry, classification, now, silenced, policy);
        guard.insert(key.clone(), entry);
        let snapshot = guard.clone();
        drop(guard);
        self.persist(&snapshot)?;
        if decision != Decision::None {
            info!(alert_key = %key, ?decision, "alert state transition");
        }
        Ok(decision)
    }

    fn persist(&self, state: &HashMap<AlertKey, AlertState>) -> Result<(), AlertStateError> {
        let serializable: HashMap<String, &AlertState> =
            state.iter().map(|(k, v)| (k.to_string(), v)).collect();
        let json = serde_json::to_string_pretty(&serializable)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AlertStateError::Write(self.path.clone(), e))?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| AlertStateError::Write(tmp_path.clone(), e))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| AlertStateError::Write(self.path.clone(), e))?;
        Ok(())
    }

    pub fn snapshot(&self, key: &AlertKey) -> AlertState {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.get(&guard, key)
    }
}

fn transition(
    state: &mut AlertState,
    classification: Classification,
    now: i64,
    silenced: bool,
    policy: &AlertPolicy,
) -> Decision {
    let min_consecutive = policy.min_consecutive.max(1);

    match state.status {
        AlertStatus::Normal | AlertStatus::Recovered => {
            if state.status == AlertStatus::Recovered {
                // One tick after RECOVERED, always age into NORMAL first.
                state.status = AlertStatus::Normal;
            }
            match classification {
                Classification::NonOk(sev) => {
                    if state.last_severity == Some(sev) {
                        state.pending_trigger_count += 1;
                    } else {
                        state.pending_trigger_count = 1;
                        state.last_severity = Some(sev);
                    }
                    if state.pending_trigger_count < min_consecutive {
                        return Decision::None;
                    }
                    let in_cooldown = state
                        .last_emitted_at
                        .is_some_and(|t| now - t < policy.cooldown_seconds);
                    if in_cooldown || silenced {
                        state.status = AlertStatus::Suppressed;
                        return Decision::None;
                    }
                    state.status = AlertStatus::Firing;
                    state.last_emitted_at = Some(now);
                    state.pending_trigger_count = 0;
                    Decision::Alert(sev)
                }
                Classification::Ok => {
                    state.pending_trigger_count = 0;
                    Decision::None
                }
            }
        }
        AlertStatus::Firing => match classification {
            Classification::NonOk(sev) => {
                state.pending_recovery_count = 0;
                let escalated = state.last_severity.is_some_and(|prior| sev > prior);
                if escalated {
                    if silenced {
                        state.status = AlertStatus::Suppressed;
                        return Decision::None;
                    }
                    state.last_severity = Some(sev);
                    state.last_emitted_at = Some(now);
                    return Decision::Alert(sev);
                }
                if silenced {
                    state.status = AlertStatus::Suppressed;
                }
                Decision::None
            }
            Classification::Ok => {
                state.pending_recovery_count += 1;
                if state.pending_recovery_count < min_consecutive {
                    return Decision::None;
                }
                state.status = AlertStatus::Recovered;
                state.last_recovery_at = Some(now);
                state.pending_recovery_count = 0;
                if policy.recovery_enabled {
                    Decision::Recovery
                } else {
                    Decision::None
                }
            }
        },
        AlertStatus::Suppressed => match classification {
            Classification::NonOk(sev) => {
                state.pending_recovery_count = 0;
                let cooldown_expired = match state.last_emitted_at {
                    None => true,
                    Some(t) => now - t >= policy.cooldown_seconds,
                };
                if silenced || !cooldown_expired {
                    state.last_severity = Some(sev);
                    return Decision::None;
                }
                state.status = AlertStatus::Firing;
                state.last_severity = Some(sev);
                state.last_emitted_at = Some(now);
                Decision::Alert(sev)
            }
            Classification::Ok => {
                state.pending_recovery_count += 1;
                if state.pending_recovery_count < min_consecutive {
                    return Decision::None;
                }
                state.pending_recovery_count = 0;
                // A suppressed key that never actually emitted an alert
                // returns straight to NORMAL with no recovery notice; one
                // that had previously fired goes through RECOVERED so a
                // recovery notice can still be sent.
                if state.last_emitted_at.is_some() {
                    state.status = AlertStatus::Recovered;
                    state.last_recovery_at = Some(now);
                    if policy.recovery_enabled {
                        Decision::Recovery
                    } else {
                        Decision::None
                    }
                } else {
                    state.status = AlertStatus::Normal;
                    Decision::None
                }
            }
        },
    }
}
