//! Polling assertions against the status store.

use mk_core::store::StatusStore;
use mk_protocol::stage_models::{EventPhase, Stage};
use mk_protocol::status_models::PipelineStatus;
use std::time::Duration;

/// Poll the store until `predicate` holds, panicking after `timeout`.
#[allow(dead_code)]
pub async fn wait_for<F>(store: &StatusStore, timeout: Duration, predicate: F) -> PipelineStatus
where
    F: Fn(&PipelineStatus) -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        let status = store.read();
        if predicate(&status) {
            return status;
        }
        if start.elapsed() > timeout {
            panic!("Condition not met within {timeout:?}; last snapshot: {status:#?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// `(stage, phase)` pairs recorded in the tail for `username`, oldest first.
#[allow(dead_code)]
pub fn phases_for(status: &PipelineStatus, username: &str) -> Vec<(Stage, EventPhase)> {
    status
        .recent_events
        .iter()
        .map(|r| &r.event)
        .filter(|e| e.username == username)
        .map(|e| (e.stage, e.phase))
        .collect()
}

/// True if no recorded event carries the sequence-anomaly flag.
#[allow(dead_code)]
pub fn no_anomalies(status: &PipelineStatus) -> bool {
    status
        .recent_events
        .iter()
        .all(|r| !r.event.sequence_anomaly)
}
