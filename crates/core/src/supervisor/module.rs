//! Long-lived module processes owned by the supervisor.

use async_trait::async_trait;
use mk_protocol::config_models::ModuleSpec;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Failed to start module '{module}' ({program}): {reason}")]
    Spawn {
        module: String,
        program: String,
        reason: String,
    },

    #[error("Failed to stop module '{module}': {source}")]
    Stop {
        module: String,
        source: std::io::Error,
    },
}

/// Result of probing a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Healthy,
    /// The process is alive but has stopped reporting heartbeats.
    Unresponsive,
    Dead,
}

/// A supervised unit with a start/probe/stop lifecycle.
#[async_trait]
pub trait Module: Send + Sync {
    /// Logical name, stable across restarts.
    fn name(&self) -> &str;

    /// Launch the module, returning its process id if it has one.
    async fn start(&mut self) -> Result<Option<u32>, ModuleError>;

    async fn probe(&mut self) -> Liveness;

    /// Stop the module, forcing it down if it has not exited within `grace`.
    async fn stop(&mut self, grace: Duration) -> Result<(), ModuleError>;
}

/// A module backed by an OS child process.
pub struct ProcessModule {
    spec: ModuleSpec,
    child: Option<Child>,
    started_at: Option<Instant>,
}

impl ProcessModule {
    pub fn new(spec: ModuleSpec) -> Self {
        Self {
            spec,
            child: None,
            started_at: None,
        }
    }

    fn spawn_error(&self, reason: impl Into<String>) -> ModuleError {
        ModuleError::Spawn {
            module: self.spec.name.clone(),
            program: self.spec.program.clone(),
            reason: reason.into(),
        }
    }

    /// Resolve bare program names through `PATH`.
    fn resolve_program(&self) -> Result<PathBuf, ModuleError> {
        let program = Path::new(&self.spec.program);
        if program.components().count() > 1 {
            return Ok(program.to_path_buf());
        }
        which::which(program).map_err(|e| self.spawn_error(e.to_string()))
    }

    /// A heartbeat counts from the later of the file's mtime and the current
    /// process's start, so a restarted module is not judged by the beats of
    /// the process it replaced.
    fn heartbeat_is_stale(&self) -> bool {
        let Some(file) = &self.spec.heartbeat_file else {
            return false;
        };
        let timeout = self.spec.heartbeat_timeout();

        let since_beat = std::fs::metadata(file)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok());
        let since_start = self.started_at.map(|started| started.elapsed());

        let quiet_for = match (since_beat, since_start) {
            (Some(beat), Some(start)) => Some(beat.min(start)),
            (beat, start) => beat.or(start),
        };
        quiet_for.is_some_and(|quiet| quiet > timeout)
    }
}

#[async_trait]
impl Module for ProcessModule {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn start(&mut self) -> Result<Option<u32>, ModuleError> {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                return Ok(child.id());
            }
        }

        let program = self.resolve_program()?;
        let mut cmd = Command::new(&program);
        cmd.args(&self.spec.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &self.spec.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().map_err(|e| self.spawn_error(e.to_string()))?;
        let pid = child.id();
        info!(module = %self.spec.name, ?pid, "Module started");

        self.child = Some(child);
        self.started_at = Some(Instant::now());
        Ok(pid)
    }

    async fn probe(&mut self) -> Liveness {
        let Some(child) = self.child.as_mut() else {
            return Liveness::Dead;
        };

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                warn!(module = %self.spec.name, %status, "Module exited");
                self.child = None;
                return Liveness::Dead;
            }
            Err(e) => {
                warn!(module = %self.spec.name, error = %e, "Failed to query module process");
                return Liveness::Dead;
            }
        }

        if self.heartbeat_is_stale() {
            Liveness::Unresponsive
        } else {
            Liveness::Healthy
        }
    }

    async fn stop(&mut self, grace: Duration) -> Result<(), ModuleError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Some(pid) = child.id() {
            terminate(pid).await;
            if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
                debug!(module = %self.spec.name, %status, "Module exited after terminate");
                return Ok(());
            }
        }

        warn!(module = %self.spec.name, "Module did not exit in time; killing");
        child.kill().await.map_err(|source| ModuleError::Stop {
            module: self.spec.name.clone(),
            source,
        })
    }
}

/// Ask a process to exit.
#[cfg(unix)]
async fn terminate(pid: u32) {
    let result = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        debug!(pid, error = %e, "Failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
async fn terminate(_pid: u32) {}
