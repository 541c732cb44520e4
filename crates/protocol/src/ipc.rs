//! Events emitted by the status reporter.
//!
//! The reporter diffs successive snapshots and turns every change into an
//! `Event`. Events are logged and, when a channel is attached, forwarded to
//! any in-process listener.
//!
//! Uses tagged enum serialization:
//! ```json
//! {
//!   "type": "stageStarted",
//!   "payload": { "stage": 1, "username": "alice", "message": "scrape" }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::stage_models::Stage;
use crate::status_models::{ModuleStatus, StagePhase};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// The first snapshot was observed.
    Initialized {
        stage: Stage,
        phase: StagePhase,
        username: String,
    },

    StageStarted {
        stage: Stage,
        username: String,
        message: String,
    },

    StageCompleted {
        stage: Stage,
        username: String,
        message: String,
    },

    StageFailed {
        stage: Stage,
        username: String,
        message: String,
    },

    /// A Completed/Failed event arrived without a matching Started event.
    SequenceAnomaly {
        stage: Stage,
        username: String,
    },

    /// Events dropped out of the snapshot's tail between two polls.
    EventsMissed { count: u64 },

    /// The snapshot went backwards (file deleted or reset).
    StoreReset,

    ModuleStateChanged {
        module: String,
        state: ModuleStatus,
        restart_count: u32,
    },
}
