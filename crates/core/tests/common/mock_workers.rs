//! Mock worker implementations for deterministic dispatch tests.

use async_trait::async_trait;
use mk_core::supervisor::{Claim, WorkSource};
use mk_core::tracker::{record_async, StageTracker};
use mk_core::worker::{Worker, WorkerError};
use mk_protocol::stage_models::{Details, EventPhase, Stage, StageEvent};
use mk_protocol::work_models::WorkItem;
use std::sync::{Arc, Mutex};

async fn report(
    tracker: &Arc<dyn StageTracker>,
    stage: Stage,
    phase: EventPhase,
    message: &str,
    username: &str,
) {
    let event = StageEvent::new(stage, phase, message, username, Details::new());
    record_async(tracker, event).await;
}

/// How a `ScriptedWorker` run ends.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every stage completes, followed by stage 7.
    Succeed,
    /// The stage is started and then reported failed.
    FailAt(Stage),
    /// The stage is started and the worker dies without a terminal event.
    CrashAt(Stage),
}

/// A worker that walks stages 1-6 in order, like a real executor would.
#[allow(dead_code)]
pub struct ScriptedWorker {
    outcome: Outcome,
    processed: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl ScriptedWorker {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            processed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Usernames handed to this worker, in order.
    pub fn processed(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.processed)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn process(
        &self,
        item: &WorkItem,
        tracker: &Arc<dyn StageTracker>,
    ) -> Result<(), WorkerError> {
        self.processed
            .lock()
            .expect("lock poisoned")
            .push(item.username.clone());
        let username = item.username.as_str();

        for stage in &Stage::ALL[1..7] {
            let stage = *stage;
            report(tracker, stage, EventPhase::Started, stage.description(), username).await;
            tokio::task::yield_now().await;

            match self.outcome {
                Outcome::CrashAt(s) if s == stage => {
                    return Err(WorkerError::Exited {
                        username: username.to_string(),
                        code: Some(137),
                    });
                }
                Outcome::FailAt(s) if s == stage => {
                    report(tracker, stage, EventPhase::Failed, "scripted failure", username).await;
                    return Err(WorkerError::Stage {
                        stage,
                        reason: "scripted failure".to_string(),
                    });
                }
                _ => report(tracker, stage, EventPhase::Completed, "done", username).await,
            }
        }

        report(tracker, Stage::Complete, EventPhase::Started, "Finishing", username).await;
        report(tracker, Stage::Complete, EventPhase::Completed, "Finished", username).await;
        Ok(())
    }
}

/// A worker that starts stage 1 and then never returns.
#[allow(dead_code)]
pub struct StuckWorker;

#[async_trait]
impl Worker for StuckWorker {
    async fn process(
        &self,
        item: &WorkItem,
        tracker: &Arc<dyn StageTracker>,
    ) -> Result<(), WorkerError> {
        report(
            tracker,
            Stage::DataScraping,
            EventPhase::Started,
            "Scraping forever",
            &item.username,
        )
        .await;
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// An in-memory account source handing out a fixed list of items.
#[allow(dead_code)]
pub struct ListSource {
    pending: Mutex<Vec<WorkItem>>,
    finished: Arc<Mutex<Vec<(String, bool)>>>,
}

#[allow(dead_code)]
impl ListSource {
    pub fn new(usernames: &[&str]) -> Self {
        Self {
            pending: Mutex::new(usernames.iter().rev().map(|u| WorkItem::new(*u)).collect()),
            finished: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `(key, succeeded)` for every finished claim, in order.
    pub fn finished(&self) -> Arc<Mutex<Vec<(String, bool)>>> {
        Arc::clone(&self.finished)
    }
}

#[async_trait]
impl WorkSource for ListSource {
    async fn claim(&self) -> Option<Claim> {
        let item = self.pending.lock().expect("lock poisoned").pop()?;
        Some(Claim {
            key: item.username.clone(),
            item,
        })
    }

    async fn finish(&self, claim: &Claim, succeeded: bool) {
        self.finished
            .lock()
            .expect("lock poisoned")
            .push((claim.key.clone(), succeeded));
    }
}
