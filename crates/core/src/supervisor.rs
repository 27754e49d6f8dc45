//! Service supervision: run the project's migrate/build/run pipeline as a
//! detached process group and tear the whole group down on request.
//!
//! [`ServiceHandle`] is a scoped guard. [`ServiceHandle::stop`] consumes it
//! (so a service cannot be stopped twice), and dropping a handle that was
//! never stopped kills the group outright.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};

use crate::config::CommandSet;

/// Time between SIGTERM and SIGKILL when stopping the group.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// How often the group is checked for survivors during the grace period.
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("No commands configured to start the service")]
    EmptyPipeline,

    #[error("Working directory does not exist: {0}")]
    MissingWorkingDirectory(PathBuf),

    #[error("Failed to spawn service pipeline: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Spawned service has no process id")]
    NoPid,

    #[error("Failed to signal process group {pgid}: {source}")]
    Signal {
        pgid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for service pipeline: {0}")]
    Wait(#[source] std::io::Error),
}

/// How the service pipeline ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceExit {
    /// Exit code of the pipeline shell, `None` if it died by signal.
    pub exit_code: Option<i32>,
    /// Whether SIGKILL was needed after the grace period.
    pub forced: bool,
    pub duration_ms: u64,
}

/// Launches service pipelines.
#[derive(Debug, Clone)]
pub struct ServiceSupervisor {
    grace_period: Duration,
}

impl Default for ServiceSupervisor {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl ServiceSupervisor {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Start `migrate && build && run` in `working_dir` as a new process
    /// group with `env` added to the inherited environment.
    pub fn start(
        &self,
        commands: &CommandSet,
        env: Vec<(String, String)>,
        working_dir: &Path,
    ) -> Result<ServiceHandle, SupervisorError> {
        let pipeline = commands.pipeline().ok_or(SupervisorError::EmptyPipeline)?;

        if !working_dir.is_dir() {
            return Err(SupervisorError::MissingWorkingDirectory(
                working_dir.to_path_buf(),
            ));
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&pipeline)
            .current_dir(working_dir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            // Group id == child pid, so killpg reaches every descendant.
            .process_group(0);

        let child = cmd.spawn().map_err(SupervisorError::Spawn)?;
        let pid = child.id().ok_or(SupervisorError::NoPid)?;
        let pgid = pid as i32;

        tracing::info!(
            pgid,
            dir = %working_dir.display(),
            env_count = env.len(),
            "Service pipeline started",
        );
        tracing::debug!(pgid, pipeline = %pipeline, "Service pipeline command");

        Ok(ServiceHandle {
            pgid,
            child: Some(child),
            env,
            grace_period: self.grace_period,
            started: Instant::now(),
        })
    }
}

/// The running service process group. Exactly one exists per run.
#[derive(Debug)]
pub struct ServiceHandle {
    pgid: i32,
    child: Option<Child>,
    env: Vec<(String, String)>,
    grace_period: Duration,
    started: Instant,
}

impl ServiceHandle {
    pub fn pgid(&self) -> i32 {
        self.pgid
    }

    /// The resolved environment the pipeline was launched with.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Whether the pipeline shell has already terminated.
    pub fn has_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// SIGTERM the group, wait up to the grace period, then SIGKILL.
    ///
    /// The grace period covers the whole group: the pipeline shell usually
    /// dies on SIGTERM at once while the `run` stage is still shutting down.
    pub async fn stop(mut self) -> Result<ServiceExit, SupervisorError> {
        let Some(mut child) = self.child.take() else {
            return Ok(ServiceExit {
                exit_code: None,
                forced: false,
                duration_ms: 0,
            });
        };
        let pgid = self.pgid;

        signal_group(pgid, libc::SIGTERM)?;
        let deadline = Instant::now() + self.grace_period;

        let mut forced = false;
        let status = match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(result) => result.map_err(SupervisorError::Wait)?,
            Err(_elapsed) => {
                forced = true;
                self.kill_after_grace();
                child.wait().await.map_err(SupervisorError::Wait)?
            }
        };

        while !forced && group_alive(pgid)? {
            if Instant::now() >= deadline {
                forced = true;
                self.kill_after_grace();
                break;
            }
            tokio::time::sleep(GROUP_POLL_INTERVAL).await;
        }

        let exit = ServiceExit {
            exit_code: status.code(),
            forced,
            duration_ms: self.started.elapsed().as_millis() as u64,
        };
        tracing::info!(pgid, exit_code = ?exit.exit_code, forced, "Service process group stopped");
        Ok(exit)
    }

    fn kill_after_grace(&self) {
        tracing::warn!(
            pgid = self.pgid,
            grace_ms = self.grace_period.as_millis() as u64,
            "Service outlived SIGTERM grace period, sending SIGKILL",
        );
        if let Err(e) = signal_group(self.pgid, libc::SIGKILL) {
            tracing::error!(pgid = self.pgid, error = %e, "Failed to SIGKILL service group");
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if self.child.is_some() {
            tracing::warn!(pgid = self.pgid, "Service handle dropped without stop, killing group");
            let _ = signal_group(self.pgid, libc::SIGKILL);
        }
    }
}

/// Send `signal` to every process in group `pgid`.
///
/// Returns `Ok(false)` when the group no longer exists.
fn signal_group(pgid: i32, signal: libc::c_int) -> Result<bool, SupervisorError> {
    // Safety: killpg takes plain integers and touches no memory we own.
    let ret = unsafe { libc::killpg(pgid, signal) };
    if ret == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(SupervisorError::Signal { pgid, source: err })
    }
}

/// Whether group `pgid` still has a member that is not a zombie.
///
/// Orphaned zombies linger until init reaps them, and `killpg(pgid, 0)`
/// still counts those, so on Linux the members are looked up in `/proc`.
#[cfg(target_os = "linux")]
fn group_alive(pgid: i32) -> Result<bool, SupervisorError> {
    if !signal_group(pgid, 0)? {
        return Ok(false);
    }
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Ok(true);
    };
    for entry in entries.flatten() {
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        // After the parenthesised command name: state, ppid, pgrp, ...
        let Some((_, rest)) = stat.rsplit_once(')') else {
            continue;
        };
        let mut fields = rest.split_whitespace();
        let state = fields.next();
        let pgrp = fields.nth(1).and_then(|f| f.parse::<i32>().ok());
        if pgrp == Some(pgid) && state != Some("Z") {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(not(target_os = "linux"))]
fn group_alive(pgid: i32) -> Result<bool, SupervisorError> {
    signal_group(pgid, 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
