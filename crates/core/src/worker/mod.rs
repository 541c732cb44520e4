//! Per-account workers.
//!
//! A worker takes one `WorkItem` through the pipeline's stages, reporting
//! each boundary through the `StageTracker` it is handed. The supervisor
//! never looks inside a worker; it only sees success or a `WorkerError`.

pub mod command;
pub mod staged;

pub use command::CommandWorker;
pub use staged::{StageStep, StagedWorker};

use crate::tracker::StageTracker;
use async_trait::async_trait;
use mk_protocol::stage_models::Stage;
use mk_protocol::work_models::WorkItem;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to launch worker '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Worker for '{username}' exited unsuccessfully (code {code:?})")]
    Exited { username: String, code: Option<i32> },

    #[error("Stage {} ({stage}) failed: {reason}", .stage.id())]
    Stage { stage: Stage, reason: String },

    #[error("Worker was cancelled")]
    Cancelled,
}

/// Processes a single account end-to-end.
///
/// The tracker is shared so that implementations can hand stage updates to
/// the blocking pool (see `tracker::record_async`).
#[async_trait]
pub trait Worker: Send + Sync {
    async fn process(
        &self,
        item: &WorkItem,
        tracker: &Arc<dyn StageTracker>,
    ) -> Result<(), WorkerError>;
}
