//! In-process sequential worker.
//!
//! The StagedWorker runs a fixed list of stage steps one after another,
//! recording a `Started` event before each and a `Completed` or `Failed`
//! event after it. The first failing step stops the run.

use crate::tracker::{record_async, StageTracker};
use crate::worker::{Worker, WorkerError};
use async_trait::async_trait;
use mk_protocol::stage_models::{DetailValue, Details, EventPhase, Stage, StageEvent};
use mk_protocol::work_models::WorkItem;
use std::sync::Arc;
use tracing::{debug, info};

/// One stage of in-process work.
#[async_trait]
pub trait StageStep: Send + Sync {
    /// The stage this step implements.
    fn stage(&self) -> Stage;

    /// Do the work for `item`, returning details to attach to the
    /// `Completed` event.
    async fn run(&self, item: &WorkItem) -> anyhow::Result<Details>;
}

/// Runs stage steps in order, then marks the account `Complete`.
pub struct StagedWorker {
    steps: Vec<Arc<dyn StageStep>>,
}

impl StagedWorker {
    /// Create a worker from steps given in execution order.
    pub fn new(steps: Vec<Arc<dyn StageStep>>) -> Self {
        Self { steps }
    }
}

async fn report(
    tracker: &Arc<dyn StageTracker>,
    stage: Stage,
    phase: EventPhase,
    message: String,
    username: &str,
    details: Details,
) {
    record_async(tracker, StageEvent::new(stage, phase, message, username, details)).await;
}

#[async_trait]
impl Worker for StagedWorker {
    /// Execute every step for `item`.
    ///
    /// For each step:
    /// 1. Records `Started` with the stage description
    /// 2. Runs the step
    /// 3. Records `Completed` with the step's details, or `Failed` with the
    ///    error and returns `WorkerError::Stage`
    ///
    /// After the last step, stage 7 is started and completed.
    async fn process(
        &self,
        item: &WorkItem,
        tracker: &Arc<dyn StageTracker>,
    ) -> Result<(), WorkerError> {
        let username = item.username.as_str();

        for step in &self.steps {
            let stage = step.stage();
            report(
                tracker,
                stage,
                EventPhase::Started,
                stage.description().to_string(),
                username,
                Details::new(),
            )
            .await;
            debug!(stage = stage.id(), username, "Running stage step");

            match step.run(item).await {
                Ok(details) => {
                    let message = format!("{} finished", stage.name());
                    report(tracker, stage, EventPhase::Completed, message, username, details).await;
                }
                Err(e) => {
                    let reason = format!("{e:#}");
                    let mut details = Details::new();
                    details.insert("error".to_string(), DetailValue::Text(reason.clone()));
                    let message = format!("{} failed", stage.name());
                    report(tracker, stage, EventPhase::Failed, message, username, details).await;
                    return Err(WorkerError::Stage { stage, reason });
                }
            }
        }

        let done = Stage::Complete;
        report(
            tracker,
            done,
            EventPhase::Started,
            done.description().to_string(),
            username,
            Details::new(),
        )
        .await;
        report(
            tracker,
            done,
            EventPhase::Completed,
            format!("Finished processing {username}"),
            username,
            Details::new(),
        )
        .await;
        info!(username, "Account processed");

        Ok(())
    }
}
