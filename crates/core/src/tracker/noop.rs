//! Tracker used when no status store is available.

use crate::state::snapshot::Applied;
use crate::tracker::StageTracker;
use mk_protocol::stage_models::StageEvent;
use mk_protocol::status_models::PipelineStatus;

/// Accepts every stage call and does nothing with it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTracker;

impl StageTracker for NoOpTracker {
    fn record(&self, _event: StageEvent) -> Option<Applied> {
        None
    }

    fn current(&self) -> PipelineStatus {
        PipelineStatus::default()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
