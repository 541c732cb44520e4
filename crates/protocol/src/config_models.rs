//! Configuration models for `.miner-kit/config.toml`.
//!
//! Every field has a default so that a partial (or missing) file yields a
//! usable configuration.

use serde::Deserialize;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Represents the full contents of `.miner-kit/config.toml`.
///
/// # Example
///
/// ```toml
/// [status]
/// path = ".miner-kit/status.json"
///
/// [supervisor]
/// scan_interval_secs = 300
///
/// [supervisor.restart]
/// policy = "exponential"
/// max_attempts = 5
///
/// [worker]
/// program = "python3"
/// args = ["main.py", "--sequential"]
///
/// [[modules]]
/// name = "image-generator"
/// program = "python3"
/// args = ["Module2/main.py"]
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct MinerConfig {
    pub status: StatusSettings,
    pub reporter: ReporterSettings,
    pub supervisor: SupervisorSettings,
    pub worker: WorkerSettings,
    pub modules: Vec<ModuleSpec>,
}

/// Where and how the status snapshot is stored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StatusSettings {
    /// Path of the JSON snapshot file.
    pub path: PathBuf,

    /// How long a writer waits for the lock before dropping its update.
    pub lock_timeout_ms: u64,

    /// Age after which a leftover lock file is considered abandoned.
    pub stale_lock_secs: u64,

    /// Number of recent events retained in the snapshot.
    pub event_tail: usize,

    /// Disable tracking entirely; stage calls become no-ops.
    pub disabled: bool,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".miner-kit/status.json"),
            lock_timeout_ms: 250,
            stale_lock_secs: 30,
            event_tail: 32,
            disabled: false,
        }
    }
}

impl StatusSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }
}

/// Reporter polling intervals.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ReporterSettings {
    /// How often the snapshot is polled for transitions.
    pub poll_interval_ms: u64,

    /// How often the aggregate status line is logged.
    pub summary_interval_secs: u64,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            summary_interval_secs: 30,
        }
    }
}

impl ReporterSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs.max(1))
    }
}

/// Supervisor loop timing and restart behaviour.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Directory scanned for account descriptors in watchdog mode.
    pub queue_dir: PathBuf,

    /// Wait between scans when no work is queued.
    pub scan_interval_secs: u64,

    /// Interval of the module health check.
    pub health_check_interval_secs: u64,

    /// Time allowed for modules and loops to stop before they are killed.
    pub shutdown_grace_secs: u64,

    pub restart: RestartSettings,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            queue_dir: PathBuf::from(".miner-kit/queue"),
            scan_interval_secs: 300,
            health_check_interval_secs: 30,
            shutdown_grace_secs: 5,
            restart: RestartSettings::default(),
        }
    }
}

impl SupervisorSettings {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Backoff shape used between module restarts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicyKind {
    Fixed,
    Exponential,
}

/// Module restart policy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RestartSettings {
    pub policy: RestartPolicyKind,

    /// Consecutive failures tolerated before the module is left `Crashed`.
    pub max_attempts: u32,

    pub initial_delay_ms: u64,

    pub max_delay_ms: u64,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            policy: RestartPolicyKind::Exponential,
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
        }
    }
}

/// The external per-account executor.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct WorkerSettings {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

/// A long-lived module process owned by the supervisor.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModuleSpec {
    /// Logical identifier, stable across restarts.
    pub name: String,

    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// File the module touches periodically. When set, a stale file marks the
    /// module unresponsive even if its process is still alive.
    #[serde(default)]
    pub heartbeat_file: Option<PathBuf>,

    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

fn default_heartbeat_timeout_secs() -> u64 {
    90
}

impl ModuleSpec {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}
