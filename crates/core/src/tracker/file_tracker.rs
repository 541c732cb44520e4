//! Tracker backed by the shared status file.

use crate::state::snapshot::{apply_event, is_regression, Applied};
use crate::store::StatusStore;
use crate::tracker::StageTracker;
use mk_protocol::stage_models::StageEvent;
use mk_protocol::status_models::PipelineStatus;
use tracing::{debug, warn};

/// Persists every stage event through a `StatusStore`.
#[derive(Debug, Clone)]
pub struct FileStageTracker {
    store: StatusStore,
}

impl FileStageTracker {
    pub fn new(store: StatusStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }
}

impl StageTracker for FileStageTracker {
    fn record(&self, event: StageEvent) -> Option<Applied> {
        let stage = event.stage;
        let phase = event.phase;
        let username = event.username.clone();
        let capacity = self.store.tail_capacity();

        let result = self.store.update(|status| {
            let regressed = is_regression(status, &event);
            (apply_event(status, event, capacity), regressed)
        });

        match result {
            Ok((applied, regressed)) => {
                if regressed && applied != Applied::Duplicate {
                    warn!(
                        stage = stage.id(),
                        username = %username,
                        "Stage {} started after a later stage for the same account",
                        stage.name()
                    );
                }
                match applied {
                    Applied::Recorded { seq, anomaly: true } => warn!(
                        stage = stage.id(),
                        %phase,
                        username = %username,
                        seq,
                        "Stage {} {phase} without a matching start",
                        stage.name()
                    ),
                    Applied::Recorded { seq, .. } => {
                        debug!(stage = stage.id(), %phase, username = %username, seq, "Stage event recorded")
                    }
                    Applied::Duplicate => {
                        debug!(stage = stage.id(), %phase, "Stage event already recorded")
                    }
                }
                Some(applied)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    stage = stage.id(),
                    %phase,
                    "Dropping stage update"
                );
                None
            }
        }
    }

    fn current(&self) -> PipelineStatus {
        self.store.read()
    }

    fn is_enabled(&self) -> bool {
        true
    }
}
