//! Worker that delegates each account to an external executor.

use crate::config::loader::STATUS_PATH_ENV;
use crate::tracker::StageTracker;
use crate::worker::{Worker, WorkerError};
use async_trait::async_trait;
use mk_protocol::config_models::WorkerSettings;
use mk_protocol::work_models::WorkItem;
use std::path::PathBuf;
use std::sync::Arc;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs the configured program once per account.
///
/// The program is invoked as
/// `<program> <args...> --username NAME --platform P [--force-fresh]`
/// with `MINER_KIT_STATUS_PATH` pointing at the shared status file, and is
/// expected to report its own stage transitions (for instance through
/// `miner stage ...`).
#[derive(Debug, Clone)]
pub struct CommandWorker {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    status_path: PathBuf,
}

impl CommandWorker {
    pub fn new(settings: &WorkerSettings, status_path: impl Into<PathBuf>) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            cwd: settings.cwd.clone(),
            status_path: status_path.into(),
        }
    }

    fn command(&self, item: &WorkItem) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--username")
            .arg(&item.username)
            .arg("--platform")
            .arg(&item.platform);
        if item.force_fresh {
            cmd.arg("--force-fresh");
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd.env(STATUS_PATH_ENV, &self.status_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Worker for CommandWorker {
    async fn process(
        &self,
        item: &WorkItem,
        _tracker: &Arc<dyn StageTracker>,
    ) -> Result<(), WorkerError> {
        info!(username = %item.username, program = %self.program, "Launching worker");

        let status = self
            .command(item)
            .status()
            .await
            .map_err(|source| WorkerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        debug!(username = %item.username, ?status, "Worker exited");
        if status.success() {
            Ok(())
        } else {
            Err(WorkerError::Exited {
                username: item.username.clone(),
                code: status.code(),
            })
        }
    }
}
