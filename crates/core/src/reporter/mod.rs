//! Status reporter.
//!
//! The reporter polls the status store, turns every change it observes into
//! an `Event`, and logs it. It runs as its own task and never holds the
//! store's write lock, so a slow or stuck reporter cannot delay the pipeline.

use crate::store::{StatusStore, StoreError};
use mk_protocol::config_models::ReporterSettings;
use mk_protocol::ipc::Event;
use mk_protocol::stage_models::EventPhase;
use mk_protocol::status_models::{ModuleStatus, PipelineStatus};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Watches the status store and reports transitions.
pub struct Reporter {
    store: StatusStore,
    settings: ReporterSettings,
    events_tx: Option<mpsc::Sender<Event>>,

    initialized: bool,
    last_revision: u64,
    last_seq: u64,
    last_modules: BTreeMap<String, (ModuleStatus, u32)>,
    corrupt_reported: bool,
}

impl Reporter {
    pub fn new(store: StatusStore, settings: ReporterSettings) -> Self {
        Self {
            store,
            settings,
            events_tx: None,
            initialized: false,
            last_revision: 0,
            last_seq: 0,
            last_modules: BTreeMap::new(),
            corrupt_reported: false,
        }
    }

    /// Forward every observed event to `events_tx` as well as logging it.
    pub fn with_events(mut self, events_tx: mpsc::Sender<Event>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    /// Diff `status` against what was seen on the previous call.
    ///
    /// - The first non-empty snapshot yields a single `Initialized`.
    /// - Each new entry in the event tail yields a stage event, followed by
    ///   `SequenceAnomaly` if it was flagged.
    /// - Entries that fell out of the tail between two calls are reported as
    ///   one `EventsMissed`.
    /// - A snapshot older than the previous one yields `StoreReset`, after
    ///   which the reporter re-initialises from the new snapshot.
    pub fn observe(&mut self, status: &PipelineStatus) -> Vec<Event> {
        let mut events = Vec::new();

        let went_backwards =
            status.revision < self.last_revision || status.last_seq < self.last_seq;
        if self.initialized && went_backwards {
            events.push(Event::StoreReset);
            self.initialized = false;
            self.last_revision = 0;
            self.last_seq = 0;
            self.last_modules.clear();
        }

        if status.is_initial() {
            return events;
        }

        if !self.initialized {
            events.push(Event::Initialized {
                stage: status.current_stage,
                phase: status.stage_phase,
                username: status.active_username.clone(),
            });
            self.initialized = true;
            self.last_revision = status.revision;
            self.last_seq = status.last_seq;
            self.last_modules = module_summary(status);
            return events;
        }

        let fresh: Vec<_> = status
            .recent_events
            .iter()
            .filter(|r| r.seq > self.last_seq)
            .collect();
        let expected = self.last_seq + 1;
        let missed = match fresh.first() {
            Some(first) => first.seq.saturating_sub(expected),
            None => status.last_seq.saturating_sub(self.last_seq),
        };
        if missed > 0 {
            events.push(Event::EventsMissed { count: missed });
        }

        for record in fresh {
            let e = &record.event;
            let stage = e.stage;
            let username = e.username.clone();
            let message = e.message.clone();
            events.push(match e.phase {
                EventPhase::Started => Event::StageStarted {
                    stage,
                    username: username.clone(),
                    message,
                },
                EventPhase::Completed => Event::StageCompleted {
                    stage,
                    username: username.clone(),
                    message,
                },
                EventPhase::Failed => Event::StageFailed {
                    stage,
                    username: username.clone(),
                    message,
                },
            });
            if e.sequence_anomaly {
                events.push(Event::SequenceAnomaly { stage, username });
            }
        }

        let modules = module_summary(status);
        for (name, &(state, restart_count)) in &modules {
            if self.last_modules.get(name) != Some(&(state, restart_count)) {
                events.push(Event::ModuleStateChanged {
                    module: name.clone(),
                    state,
                    restart_count,
                });
            }
        }

        self.last_modules = modules;
        self.last_revision = status.revision;
        self.last_seq = status.last_seq;
        events
    }

    /// Read the store once and report whatever changed.
    pub async fn poll_once(&mut self) -> Vec<Event> {
        let status = match self.store.try_read_async().await {
            Ok(status) => {
                self.corrupt_reported = false;
                status.unwrap_or_default()
            }
            Err(e @ StoreError::Corrupt { .. }) => {
                if !self.corrupt_reported {
                    warn!(error = %e, "Status snapshot unreadable");
                    self.corrupt_reported = true;
                }
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "Failed to read status snapshot");
                return Vec::new();
            }
        };

        let events = self.observe(&status);
        for event in &events {
            log_event(event);
            if let Some(tx) = &self.events_tx {
                let _ = tx.send(event.clone()).await;
            }
        }
        events
    }

    /// Run the reporter until `cancel` fires.
    ///
    /// Transitions are polled every `poll_interval`; the aggregate status line
    /// is logged every `summary_interval`. A final poll runs after
    /// cancellation so the last transitions are not lost.
    pub fn spawn(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut poll = time::interval(self.settings.poll_interval());
            poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut summary = time::interval(self.settings.summary_interval());
            summary.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First summary tick completes immediately; skip it.
            summary.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = poll.tick() => {
                        self.poll_once().await;
                    }
                    _ = summary.tick() => {
                        info!("{}", summary_line(&self.store.read_async().await));
                    }
                }
            }

            self.poll_once().await;
        })
    }
}

fn module_summary(status: &PipelineStatus) -> BTreeMap<String, (ModuleStatus, u32)> {
    status
        .module_states
        .iter()
        .map(|(name, m)| (name.clone(), (m.state, m.restart_count)))
        .collect()
}

/// Log one event at the level matching its severity.
pub fn log_event(event: &Event) {
    match event {
        Event::Initialized {
            stage,
            phase,
            username,
        } => info!(
            stage = stage.id(),
            username = %username,
            "Status initialized: stage {} ({stage}) {phase}",
            stage.id()
        ),
        Event::StageStarted {
            stage,
            username,
            message,
        } => info!(
            stage = stage.id(),
            username = %username,
            "Stage {} ({stage}) started: {message}",
            stage.id()
        ),
        Event::StageCompleted {
            stage,
            username,
            message,
        } => info!(
            stage = stage.id(),
            username = %username,
            "Stage {} ({stage}) completed: {message}",
            stage.id()
        ),
        Event::StageFailed {
            stage,
            username,
            message,
        } => error!(
            stage = stage.id(),
            username = %username,
            "Stage {} ({stage}) failed: {message}",
            stage.id()
        ),
        Event::SequenceAnomaly { stage, username } => warn!(
            stage = stage.id(),
            username = %username,
            "Stage {} ({stage}) finished without a matching start",
            stage.id()
        ),
        Event::EventsMissed { count } => {
            warn!(count, "Missed {count} stage events between polls")
        }
        Event::StoreReset => warn!("Status store was reset; re-initializing"),
        Event::ModuleStateChanged {
            module,
            state: ModuleStatus::Crashed,
            restart_count,
        } => error!(module = %module, restart_count, "Module {module} crashed"),
        Event::ModuleStateChanged {
            module,
            state,
            restart_count,
        } => info!(module = %module, restart_count, "Module {module} is {state}"),
    }
}

/// Render the one-line aggregate status.
///
/// ```text
/// Mode: watchdog | content-pipeline: Running | image-generator: Crashed (restarts 3, escalated) | Stage: Data Scraping - Running (alice)
/// ```
pub fn summary_line(status: &PipelineStatus) -> String {
    let mut line = format!("Mode: {}", status.mode);

    for (name, module) in &status.module_states {
        let _ = write!(line, " | {name}: {}", module.state);
        let mut notes = Vec::new();
        if module.restart_count > 0 {
            notes.push(format!("restarts {}", module.restart_count));
        }
        if module.escalated {
            notes.push("escalated".to_string());
        }
        if !notes.is_empty() {
            let _ = write!(line, " ({})", notes.join(", "));
        }
    }

    let _ = write!(
        line,
        " | Stage: {} - {}",
        status.current_stage, status.stage_phase
    );
    if !status.active_username.is_empty() {
        let _ = write!(line, " ({})", status.active_username);
    }
    line
}
