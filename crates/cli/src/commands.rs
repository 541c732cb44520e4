//! Subcommand handlers.

use color_eyre::eyre::{bail, Result, WrapErr};
use colored::Colorize;
use mk_core::config::loader::{apply_overrides, load_config, STATUS_PATH_ENV, TRACKING_ENV};
use mk_core::config::models::AppConfig;
use mk_core::reporter::summary_line;
use mk_core::store::StatusStore;
use mk_core::supervisor::Supervisor;
use mk_core::tracker;
use mk_core::worker::CommandWorker;
use mk_protocol::stage_models::{DetailValue, Details, EventPhase, Stage, StageEvent};
use mk_protocol::work_models::WorkItem;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::StageAction;

pub async fn run(root: &Path) -> Result<()> {
    let config = load_config(root).await?;
    let supervisor = supervisor_for(&config)?;
    let cancel = cancel_on_ctrl_c();

    supervisor.run_watchdog(cancel).await?;
    Ok(())
}

pub async fn direct(root: &Path, item: WorkItem) -> Result<()> {
    let config = load_config(root).await?;
    let supervisor = supervisor_for(&config)?;
    let cancel = cancel_on_ctrl_c();

    let username = item.username.clone();
    supervisor
        .run_direct(item, cancel)
        .await
        .wrap_err_with(|| format!("Processing {username} failed"))?;
    Ok(())
}

pub async fn status(root: &Path, json: bool) -> Result<()> {
    let config = load_config(root).await?;
    let store = StatusStore::open(&config.miner.status)?;
    let snapshot = store.try_read_async().await?.unwrap_or_default();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("{}", summary_line(&snapshot));
    if let Some(event) = &snapshot.last_event {
        let phase = match event.phase {
            EventPhase::Started => event.phase.to_string().cyan(),
            EventPhase::Completed => event.phase.to_string().green(),
            EventPhase::Failed => event.phase.to_string().red(),
        };
        let mut line = format!("Last event: {} {} - {}", event.stage, phase, event.message);
        if event.sequence_anomaly {
            line.push_str(&format!(" {}", "(out of sequence)".yellow()));
        }
        println!("{line}");
    }
    if snapshot.is_initial() {
        println!("{}", "No status has been recorded yet".dimmed());
    }
    Ok(())
}

/// Record a stage transition on behalf of an external worker.
///
/// Never fails the caller: a broken configuration or unusable store only
/// produces a warning, so a worker's exit code is unaffected by tracking.
pub async fn stage(
    root: &Path,
    action: StageAction,
    stage: Stage,
    message: &str,
    username: &str,
    details: Vec<(String, DetailValue)>,
) -> Result<()> {
    let config = match load_config(root).await {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable configuration for stage tracking");
            let mut config = AppConfig::with_root(root);
            apply_overrides(
                &mut config,
                std::env::var(STATUS_PATH_ENV).ok(),
                std::env::var(TRACKING_ENV).ok(),
            );
            config
        }
    };

    let tracker = tracker::connect(&config.miner.status);
    let phase = match action {
        StageAction::Start => EventPhase::Started,
        StageAction::Complete => EventPhase::Completed,
        StageAction::Fail => EventPhase::Failed,
    };
    let details: Details = details.into_iter().collect();
    let event = StageEvent::new(stage, phase, message, username, details);
    tracker::record_async(&tracker, event).await;
    Ok(())
}

pub async fn reset(root: &Path) -> Result<()> {
    let config = load_config(root).await?;
    let store = StatusStore::open(&config.miner.status)?;
    let path = store.path().to_path_buf();
    tokio::task::spawn_blocking(move || store.reset()).await??;
    info!(path = %path.display(), "Status reset");
    Ok(())
}

fn supervisor_for(config: &AppConfig) -> Result<Supervisor> {
    let miner = &config.miner;
    if miner.worker.program.trim().is_empty() {
        bail!(
            "No worker program configured; set [worker].program in {}",
            config.root.join(".miner-kit").join("config.toml").display()
        );
    }
    let worker = CommandWorker::new(&miner.worker, miner.status.path.clone());
    let supervisor = Supervisor::new(miner, Arc::new(worker))?;
    Ok(supervisor)
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
    cancel
}
