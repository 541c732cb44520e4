//! Test fixtures for configurations and queued work.

use mk_core::store::StatusStore;
use mk_protocol::config_models::MinerConfig;
use std::path::Path;
use tempfile::TempDir;

/// A temporary project root with a fast-ticking configuration.
///
/// The TempDir must be kept alive for the test duration.
#[allow(dead_code)]
pub struct TestProject {
    pub dir: TempDir,
    pub config: MinerConfig,
}

#[allow(dead_code)]
impl TestProject {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        Ok(Self { dir, config })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> StatusStore {
        StatusStore::open(&self.config.status).expect("Failed to open status store")
    }

    pub fn queue(&self, file: &str, username: &str) {
        queue_descriptor(&self.config.supervisor.queue_dir, file, username);
    }
}

/// Configuration rooted at `root` with intervals short enough for tests.
#[allow(dead_code)]
pub fn test_config(root: &Path) -> MinerConfig {
    let mut config = MinerConfig::default();
    config.status.path = root.join(".miner-kit/status.json");
    config.status.lock_timeout_ms = 2000;
    config.reporter.poll_interval_ms = 20;
    config.reporter.summary_interval_secs = 3600;
    config.supervisor.queue_dir = root.join(".miner-kit/queue");
    config.supervisor.scan_interval_secs = 1;
    config.supervisor.health_check_interval_secs = 1;
    config.supervisor.shutdown_grace_secs = 1;
    config
}

/// Drop an account descriptor into the queue directory.
#[allow(dead_code)]
pub fn queue_descriptor(queue_dir: &Path, file: &str, username: &str) {
    std::fs::create_dir_all(queue_dir).expect("Failed to create queue dir");
    let body = serde_json::json!({ "username": username, "platform": "instagram" });
    std::fs::write(queue_dir.join(file), body.to_string()).expect("Failed to write descriptor");
}
