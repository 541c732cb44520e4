//! Snapshot state machine.
//!
//! Pure functions that move a `PipelineStatus` from one state to the next.
//! They perform no I/O; the status store runs them inside its write lock.

use mk_protocol::stage_models::{EventPhase, Stage, StageEvent};
use mk_protocol::status_models::{
    Mode, ModuleState, ModuleStatus, PipelineStatus, RecordedEvent, StagePhase, SupervisorState,
};

/// Outcome of applying a stage event to a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The event was recorded with the given sequence number.
    Recorded { seq: u64, anomaly: bool },
    /// An event with the same id is already in the tail; nothing changed.
    Duplicate,
}

/// Apply a stage event to the snapshot.
///
/// - `Started` sets the stage, marks it `Running` and makes the event's
///   username the active one.
/// - `Completed`/`Failed` set the stage and its terminal phase. If no
///   matching `Started` is found for the same stage and username the event
///   is still recorded, flagged as a sequence anomaly.
///
/// Replaying an event whose id is already in the tail is a no-op, so
/// retried writes cannot corrupt the snapshot.
///
/// # Arguments
///
/// * `status` - The snapshot to update
/// * `event` - The event to apply
/// * `tail_capacity` - Maximum number of events kept in `recent_events`
pub fn apply_event(
    status: &mut PipelineStatus,
    mut event: StageEvent,
    tail_capacity: usize,
) -> Applied {
    if status.recent_events.iter().any(|r| r.event.id == event.id) {
        return Applied::Duplicate;
    }

    if event.phase.is_terminal() && !has_matching_start(status, event.stage, &event.username) {
        event.sequence_anomaly = true;
    }

    status.current_stage = event.stage;
    status.stage_phase = match event.phase {
        EventPhase::Started => StagePhase::Running,
        EventPhase::Completed => StagePhase::Succeeded,
        EventPhase::Failed => StagePhase::Failed,
    };
    if event.phase == EventPhase::Started || !event.username.is_empty() {
        status.active_username = event.username.clone();
    }

    status.last_seq += 1;
    let seq = status.last_seq;
    let anomaly = event.sequence_anomaly;

    status.last_event = Some(event.clone());
    status.recent_events.push(RecordedEvent { seq, event });

    let capacity = tail_capacity.max(1);
    if status.recent_events.len() > capacity {
        let excess = status.recent_events.len() - capacity;
        status.recent_events.drain(..excess);
    }

    Applied::Recorded { seq, anomaly }
}

/// True if the tail holds a `Started` for `(stage, username)` that has not
/// yet been closed by a terminal event.
fn has_matching_start(status: &PipelineStatus, stage: Stage, username: &str) -> bool {
    status
        .recent_events
        .iter()
        .rev()
        .map(|r| &r.event)
        .find(|e| e.stage == stage && e.username == username)
        .is_some_and(|e| e.phase == EventPhase::Started)
}

/// True if `event` starts an earlier stage for the account already in
/// progress.
///
/// Stages 0 and 1, or a different username, begin a new unit of work and
/// may move `current_stage` back; anything else should not.
pub fn is_regression(status: &PipelineStatus, event: &StageEvent) -> bool {
    event.phase == EventPhase::Started
        && !event.stage.begins_unit_of_work()
        && event.username == status.active_username
        && event.stage < status.current_stage
}

/// Record the observed state of a module, creating the entry if needed.
pub fn record_module_state(status: &mut PipelineStatus, name: &str, state: ModuleState) {
    status.module_states.insert(name.to_string(), state);
}

/// Set the supervisor's mode and control-loop state.
pub fn set_supervisor(status: &mut PipelineStatus, mode: Mode, state: SupervisorState) {
    status.mode = mode;
    status.supervisor_state = state;
}

/// Mark the snapshot as belonging to a supervisor that has shut down.
///
/// Modules that were still considered running are marked `Stopped`; crashed
/// modules keep their state so the last failure remains visible.
pub fn mark_stopped(status: &mut PipelineStatus) {
    status.mode = Mode::Stopped;
    status.supervisor_state = SupervisorState::Idle;
    for module in status.module_states.values_mut() {
        if matches!(
            module.state,
            ModuleStatus::Running | ModuleStatus::Restarting
        ) {
            module.state = ModuleStatus::Stopped;
            module.pid = None;
        }
    }
}
