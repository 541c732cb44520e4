//! Stage tracking API used by pipeline workers.
//!
//! Workers call `start`, `complete` and `fail` at every stage boundary. These
//! calls never fail and never block for longer than the store's lock
//! timeout: if the status store is unavailable the update is logged and
//! dropped, and the pipeline carries on.

pub mod file_tracker;
pub mod noop;

pub use file_tracker::FileStageTracker;
pub use noop::NoOpTracker;

use crate::state::snapshot::Applied;
use crate::store::StatusStore;
use mk_protocol::config_models::StatusSettings;
use mk_protocol::stage_models::{Details, EventPhase, Stage, StageEvent};
use mk_protocol::status_models::PipelineStatus;
use std::sync::Arc;
use tracing::{info, warn};

/// Records stage transitions for the pipeline.
pub trait StageTracker: Send + Sync {
    /// Record an already-built event.
    ///
    /// Returns `None` when the update was dropped (tracking disabled or the
    /// store unavailable). Recording the same event twice is a no-op.
    fn record(&self, event: StageEvent) -> Option<Applied>;

    /// The latest snapshot, or the default one if none can be read.
    fn current(&self) -> PipelineStatus;

    /// Whether updates are actually persisted.
    fn is_enabled(&self) -> bool;

    fn start(&self, stage: Stage, message: &str, username: &str, details: Details) {
        self.record(StageEvent::new(
            stage,
            EventPhase::Started,
            message,
            username,
            details,
        ));
    }

    fn complete(&self, stage: Stage, message: &str, username: &str, details: Details) {
        self.record(StageEvent::new(
            stage,
            EventPhase::Completed,
            message,
            username,
            details,
        ));
    }

    fn fail(&self, stage: Stage, message: &str, username: &str, details: Details) {
        self.record(StageEvent::new(
            stage,
            EventPhase::Failed,
            message,
            username,
            details,
        ));
    }
}

/// Choose the tracker for the given settings.
///
/// Falls back to a `NoOpTracker` when tracking is disabled or the status
/// store cannot be opened.
pub fn connect(settings: &StatusSettings) -> Arc<dyn StageTracker> {
    for_store(open_store(settings))
}

/// Open the status store unless tracking is disabled.
///
/// Returns `None`, after logging why, when there is nothing to track into.
pub fn open_store(settings: &StatusSettings) -> Option<StatusStore> {
    if settings.disabled {
        info!("Stage tracking disabled; stage updates will be ignored");
        return None;
    }

    match StatusStore::open(settings) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(error = %e, "Status store unavailable; continuing without stage tracking");
            None
        }
    }
}

/// The tracker writing into `store`, or a `NoOpTracker` without one.
pub fn for_store(store: Option<StatusStore>) -> Arc<dyn StageTracker> {
    match store {
        Some(store) => Arc::new(FileStageTracker::new(store)),
        None => Arc::new(NoOpTracker),
    }
}

/// Record `event` on the blocking thread pool.
///
/// Async callers use this so that waiting for the store lock never stalls a
/// runtime thread. Returns `None` if the update was dropped.
pub async fn record_async(tracker: &Arc<dyn StageTracker>, event: StageEvent) -> Option<Applied> {
    let tracker = Arc::clone(tracker);
    match tokio::task::spawn_blocking(move || tracker.record(event)).await {
        Ok(applied) => applied,
        Err(e) => {
            warn!(error = %e, "Stage update task failed");
            None
        }
    }
}

/// `StageTracker::current` on the blocking thread pool.
pub async fn current_async(tracker: &Arc<dyn StageTracker>) -> PipelineStatus {
    let tracker = Arc::clone(tracker);
    tokio::task::spawn_blocking(move || tracker.current())
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Status read task failed");
            PipelineStatus::default()
        })
}
