//! Pipeline supervisor.
//!
//! The Supervisor is the long-running owner of the pipeline. It
//! discovers accounts (watchdog mode) or takes one explicitly (direct mode),
//! hands each to the worker, keeps the module processes alive, and runs the
//! status reporter alongside. Three loops run concurrently:
//!
//! - the dispatch loop, on the caller's task
//! - the health loop, owning the modules
//! - the reporter, reading the status store
//!
//! All three share one `CancellationToken`; `shutdown` cancels it, stops the
//! modules and records `Mode::Stopped`.

pub mod health;
pub mod module;
pub mod restart;
pub mod source;

pub use health::HealthMonitor;
pub use module::{Liveness, Module, ModuleError, ProcessModule};
pub use restart::RestartPolicy;
pub use source::{Claim, QueueDirSource, WorkSource};

use crate::reporter::Reporter;
use crate::state::snapshot::{mark_stopped, set_supervisor};
use crate::store::{StatusStore, StoreError};
use crate::tracker::{self, current_async, record_async, StageTracker};
use crate::worker::{Worker, WorkerError};
use mk_protocol::config_models::{MinerConfig, ReporterSettings, SupervisorSettings};
use mk_protocol::ipc::Event;
use mk_protocol::stage_models::{DetailValue, Details, EventPhase, Stage, StageEvent};
use mk_protocol::status_models::{Mode, StagePhase, SupervisorState};
use mk_protocol::work_models::WorkItem;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Extra time allowed for background tasks to wind down after the modules'
/// grace period.
const JOIN_SLACK: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The configured status path cannot hold a status file.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Background tasks started for one run.
struct Running {
    cancel: CancellationToken,
    health: JoinHandle<HealthMonitor>,
    reporter: Option<JoinHandle<()>>,
}

pub struct Supervisor {
    settings: SupervisorSettings,
    reporter_settings: ReporterSettings,
    store: Option<StatusStore>,
    tracker: Arc<dyn StageTracker>,
    worker: Arc<dyn Worker>,
    source: Arc<dyn WorkSource>,
    monitor: Option<HealthMonitor>,
    events_tx: Option<mpsc::Sender<Event>>,
}

impl Supervisor {
    /// Create a supervisor for `config` that hands accounts to `worker`.
    ///
    /// Every configured module becomes a `ProcessModule`; accounts are
    /// read from `supervisor.queue_dir`. With tracking disabled the
    /// supervisor runs without a status store or reporter.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Store` if tracking is enabled but the
    /// status path is unusable (a directory, no file name, or an uncreatable
    /// parent). Workers tolerate this; the supervisor refuses to start.
    pub fn new(config: &MinerConfig, worker: Arc<dyn Worker>) -> Result<Self, SupervisorError> {
        let settings = config.supervisor.clone();
        let store = if config.status.disabled {
            info!("Stage tracking disabled; running without a status store");
            None
        } else {
            Some(StatusStore::open(&config.status)?)
        };
        let tracker = tracker::for_store(store.clone());

        let mut monitor = HealthMonitor::new(
            RestartPolicy::from_settings(&settings.restart),
            store.clone(),
            settings.shutdown_grace(),
        );
        for spec in &config.modules {
            monitor.add(Box::new(ProcessModule::new(spec.clone())));
        }

        Ok(Self {
            source: Arc::new(QueueDirSource::new(settings.queue_dir.clone())),
            settings,
            reporter_settings: config.reporter.clone(),
            store,
            tracker,
            worker,
            monitor: Some(monitor),
            events_tx: None,
        })
    }

    /// Replace the account source used in watchdog mode.
    pub fn with_source(mut self, source: Arc<dyn WorkSource>) -> Self {
        self.source = source;
        self
    }

    /// Supervise an additional module.
    pub fn with_module(mut self, module: Box<dyn Module>) -> Self {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.add(module);
        }
        self
    }

    /// Replace the restart policy read from the configuration.
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.set_policy(policy);
        }
        self
    }

    /// Forward reporter events to `events_tx`.
    pub fn with_events(mut self, events_tx: mpsc::Sender<Event>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    pub fn tracker(&self) -> Arc<dyn StageTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn store(&self) -> Option<&StatusStore> {
        self.store.as_ref()
    }

    /// Discover and process accounts until `cancel` fires.
    ///
    /// When the source has nothing pending the supervisor reports stage 0
    /// ("waiting for account information") and sleeps for `scan_interval`
    /// before scanning again. After each account it rescans immediately.
    pub async fn run_watchdog(mut self, cancel: CancellationToken) -> Result<(), SupervisorError> {
        info!(queue = %self.settings.queue_dir.display(), "Starting supervisor in watchdog mode");
        let running = self.launch(Mode::Watchdog, &cancel).await;

        while !cancel.is_cancelled() {
            self.record_state(Mode::Watchdog, SupervisorState::Idle).await;

            match self.source.claim().await {
                Some(claim) => {
                    let result = self.dispatch(&claim.item, Mode::Watchdog, &cancel).await;
                    self.source.finish(&claim, result.is_ok()).await;
                }
                None => {
                    self.report_waiting().await;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.scan_interval()) => {}
                    }
                }
            }
        }

        self.shutdown(running).await;
        Ok(())
    }

    /// Process a single account, then shut down.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Worker` if the worker failed or was
    /// cancelled. Shutdown has completed either way.
    pub async fn run_direct(
        mut self,
        item: WorkItem,
        cancel: CancellationToken,
    ) -> Result<(), SupervisorError> {
        info!(username = %item.username, platform = %item.platform, "Starting supervisor in direct mode");
        let running = self.launch(Mode::Direct, &cancel).await;

        let result = self.dispatch(&item, Mode::Direct, &cancel).await;

        self.shutdown(running).await;
        result.map_err(SupervisorError::from)
    }

    /// Start the modules and spawn the health loop and reporter.
    async fn launch(&mut self, mode: Mode, cancel: &CancellationToken) -> Running {
        self.record_state(mode, SupervisorState::Idle).await;
        let cancel = cancel.child_token();

        let mut monitor = self.monitor.take().unwrap_or_else(|| {
            HealthMonitor::new(
                RestartPolicy::from_settings(&self.settings.restart),
                self.store.clone(),
                self.settings.shutdown_grace(),
            )
        });
        monitor.start_all().await;
        let health = monitor.spawn(self.settings.health_check_interval(), cancel.clone());

        let reporter = self.store.clone().map(|store| {
            let mut reporter = Reporter::new(store, self.reporter_settings.clone());
            if let Some(tx) = &self.events_tx {
                reporter = reporter.with_events(tx.clone());
            }
            reporter.spawn(cancel.clone())
        });

        Running {
            cancel,
            health,
            reporter,
        }
    }

    /// Hand `item` to the worker and record the outcome.
    async fn dispatch(
        &self,
        item: &WorkItem,
        mode: Mode,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError> {
        info!(username = %item.username, platform = %item.platform, "Dispatching account");
        self.record_state(mode, SupervisorState::Dispatching).await;
        self.record_state(mode, SupervisorState::WorkerRunning).await;

        let result = tokio::select! {
            r = self.worker.process(item, &self.tracker) => r,
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
        };

        match &result {
            Ok(()) => info!(username = %item.username, "Account finished"),
            Err(e) => {
                error!(username = %item.username, error = %e, "Worker failed");
                self.recover(item, e).await;
            }
        }

        self.record_state(mode, SupervisorState::Idle).await;
        result
    }

    /// Close out a stage the worker left `Running` when it died.
    async fn recover(&self, item: &WorkItem, error: &WorkerError) {
        let status = current_async(&self.tracker).await;
        if status.active_username != item.username || status.stage_phase != StagePhase::Running {
            return;
        }

        warn!(
            username = %item.username,
            stage = status.current_stage.id(),
            "Recording failure for interrupted stage"
        );
        let mut details = Details::new();
        details.insert("error".to_string(), DetailValue::Text(error.to_string()));
        let event = StageEvent::new(
            status.current_stage,
            EventPhase::Failed,
            format!("Worker stopped unexpectedly: {error}"),
            item.username.as_str(),
            details,
        );
        record_async(&self.tracker, event).await;
    }

    /// Record stage 0 "waiting" unless it is already the current state.
    async fn report_waiting(&self) {
        let status = current_async(&self.tracker).await;
        let already_waiting = status.current_stage == Stage::Initialization
            && status.stage_phase == StagePhase::Running
            && status.active_username.is_empty();
        if !already_waiting {
            let event = StageEvent::new(
                Stage::Initialization,
                EventPhase::Started,
                Stage::Initialization.description(),
                "",
                Details::new(),
            );
            record_async(&self.tracker, event).await;
        }
    }

    async fn record_state(&self, mode: Mode, state: SupervisorState) {
        let Some(store) = &self.store else {
            return;
        };
        let result = store
            .update_async(move |status| set_supervisor(status, mode, state))
            .await;
        if let Err(e) = result {
            warn!(error = %e, ?state, "Failed to record supervisor state");
        }
    }

    /// Cancel the background loops, stop the modules and mark the snapshot
    /// stopped. Each step is bounded by the shutdown grace period.
    async fn shutdown(&self, running: Running) {
        info!("Shutting down supervisor");
        running.cancel.cancel();
        let wait = self.settings.shutdown_grace() + JOIN_SLACK;

        let mut health = running.health;
        match tokio::time::timeout(wait, &mut health).await {
            Ok(Ok(mut monitor)) => monitor.stop_all().await,
            Ok(Err(e)) => error!("Health loop task panicked: {e}"),
            Err(_) => {
                warn!("Health loop did not stop in time; aborting it");
                health.abort();
            }
        }

        if let Some(mut reporter) = running.reporter {
            match tokio::time::timeout(wait, &mut reporter).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Reporter task panicked: {e}"),
                Err(_) => {
                    warn!("Reporter did not stop in time; aborting it");
                    reporter.abort();
                }
            }
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.update_async(mark_stopped).await {
                warn!(error = %e, "Failed to record supervisor stop");
            }
        }
        info!("Supervisor stopped");
    }
}
