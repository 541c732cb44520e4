//! Persisted pipeline status snapshot.
//!
//! This module defines the single record that the supervisor and the worker
//! share through the status store. It is overwritten on every write; only the
//! latest snapshot and a short tail of recent events are retained.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::stage_models::{Stage, StageEvent};

/// Operating mode of the supervisor that owns the snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Continuously discovering and dispatching accounts.
    Watchdog,
    /// Processing one explicitly supplied account.
    Direct,
    /// No supervisor is running (initial state and after shutdown).
    #[default]
    Stopped,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Mode::Watchdog => "watchdog",
            Mode::Direct => "direct",
            Mode::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Lifecycle of the current stage.
///
/// Exactly one phase is active at a time; a new `Started` event always
/// replaces whatever phase was current.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StagePhase {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for StagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StagePhase::Idle => "Idle",
            StagePhase::Running => "Running",
            StagePhase::Succeeded => "Succeeded",
            StagePhase::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// What the supervisor's own control loop is doing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisorState {
    /// No work queued.
    #[default]
    Idle,
    /// Work found, handing it to the worker.
    Dispatching,
    /// The worker is processing an account.
    WorkerRunning,
}

/// Liveness of a module process owned by the supervisor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleStatus {
    Running,
    Stopped,
    Crashed,
    Restarting,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ModuleStatus::Running => "Running",
            ModuleStatus::Stopped => "Stopped",
            ModuleStatus::Crashed => "Crashed",
            ModuleStatus::Restarting => "Restarting",
        };
        f.write_str(label)
    }
}

/// Observed state of one module.
///
/// Entries are created the first time a module is launched and are never
/// removed while the supervisor runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModuleState {
    pub state: ModuleStatus,

    /// OS process id of the current incarnation, if running.
    #[serde(default)]
    pub pid: Option<u32>,

    /// Last time the module was observed healthy.
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Successful restarts since the supervisor started.
    #[serde(default)]
    pub restart_count: u32,

    /// Failures since the module was last seen healthy.
    #[serde(default)]
    pub consecutive_failures: u32,

    /// The restart budget is exhausted; no further automatic restarts.
    #[serde(default)]
    pub escalated: bool,
}

impl ModuleState {
    /// State for a module that has just been launched.
    pub fn running(pid: Option<u32>) -> Self {
        Self {
            state: ModuleStatus::Running,
            pid,
            last_heartbeat: Some(Utc::now()),
            restart_count: 0,
            consecutive_failures: 0,
            escalated: false,
        }
    }
}

/// A stage event together with its position in the event log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// Strictly increasing sequence number assigned when the event is applied.
    pub seq: u64,
    pub event: StageEvent,
}

/// The current pipeline status shared between processes.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PipelineStatus {
    /// Incremented on every persisted write. Zero means nothing has been
    /// written yet.
    #[serde(default)]
    pub revision: u64,

    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub supervisor_state: SupervisorState,

    #[serde(default)]
    pub current_stage: Stage,

    #[serde(default)]
    pub stage_phase: StagePhase,

    /// Account currently being processed, empty between accounts.
    #[serde(default)]
    pub active_username: String,

    #[serde(default)]
    pub last_event: Option<StageEvent>,

    /// Module name -> observed state.
    #[serde(default)]
    pub module_states: BTreeMap<String, ModuleState>,

    /// Rolling tail of recently applied events, oldest first.
    #[serde(default)]
    pub recent_events: Vec<RecordedEvent>,

    /// Sequence number of the most recently applied event.
    #[serde(default)]
    pub last_seq: u64,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PipelineStatus {
    /// True if this is the empty snapshot returned before the first write.
    pub fn is_initial(&self) -> bool {
        self.revision == 0
    }
}
