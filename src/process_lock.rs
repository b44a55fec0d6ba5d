//! Process Lock (spec.md §6.4, component C11).
//!
//! A PID file at `<project_root>/sentryd.pid` backing the `start`/`stop`
//! CLI commands, generalizing the teacher's single-writer guard-file
//! pattern (`alert_state.rs`'s atomic write-temp-then-rename) to a
//! liveness-checked process lock. Liveness is `kill(pid, 0)` via `libc`
//! rather than trusting the file's mere existence, so a crashed process
//! doesn't permanently wedge `start`.

use crate::error::ProcessLockError;
use std::path::{Path, PathBuf};

pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    pub fn new(project_root: &Path) -> Self {
        Self {
            path: project_root.join("sentryd.pid"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the pid file and check whether that process is still alive.
    pub fn running_pid(&self) -> Option<i32> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        let pid: i32 = contents.trim().parse().ok()?;
        if process_alive(pid) {
            Some(pid)
        } else {
            None
        }
    }

    /// Claim the lock for the current process. Fails if a live instance
    /// already holds it (spec.md "only one daemon instance at a time").
    pub fn acquire(&self) -> Result<(), ProcessLockError> {
        if let Some(pid) = self.running_pid() {
            return Err(ProcessLockError::AlreadyRunning(pid));
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProcessLockError::Write(self.path.clone(), e))?;
        }
        let pid = std::process::id();
        let tmp_path = self.path.with_extension("pid.tmp");
        std::fs::write(&tmp_path, pid.to_string())
            .map_err(|e| ProcessLockError::Write(tmp_path.clone(), e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| ProcessLockError::Write(self.path.clone(), e))?;
        Ok(())
    }

    /// Release the lock, removing the pid file if it's ours.
    pub fn release(&self) {
        let _ = std::fs::remove_file(&self.path);
    }

    /// Signal a running instance to stop (`SIGTERM`) for the `stop` command.
    pub fn signal_stop(&self) -> Result<i32, ProcessLockError> {
        let pid = self
            .running_pid()
            .ok_or_else(|| ProcessLockError::NotRunning(self.path.clone()))?;
        // SAFETY: `pid` was parsed from our own pid file and confirmed alive
        // by a zero-signal probe immediately above.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            return Err(ProcessLockError::Write(
                self.path.clone(),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(pid)
    }
}

fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 performs no action beyond existence/permission
    // checking, per `kill(2)`.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProcessLock::new(dir.path());
        assert!(lock.running_pid().is_none());
        lock.acquire().unwrap();
        assert_eq!(lock.running_pid(), Some(std::process::id() as i32));
        lock.release();
        assert!(lock.running_pid().is_none());
    }

    #[test]
    fn acquire_rejects_when_already_held_by_live_process() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProcessLock::new(dir.path());
        lock.acquire().unwrap();
        let err = lock.acquire().unwrap_err();
        assert!(matches!(err, ProcessLockError::AlreadyRunning(_)));
        lock.release();
    }

    #[test]
    fn stale_pid_file_is_not_treated_as_running() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProcessLock::new(dir.path());
        // pid 1 from inside an unprivileged test container is either PID 1
        // (the test harness, so "alive" is still semantically wrong for our
        // purposes) or unreachable; use an implausibly large pid instead to
        // simulate a stale file deterministically.
        std::fs::write(lock.path(), "999999").unwrap();
        assert!(lock.running_pid().is_none());
    }
}
