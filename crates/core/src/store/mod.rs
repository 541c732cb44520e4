//! Shared, file-backed status store.
//!
//! The store holds a single `PipelineStatus` JSON document. Any number of
//! processes may read it without coordination; writers serialize through a
//! sibling `.lock` file and replace the document atomically, so a reader
//! sees either the old snapshot or the new one, never a partial write.

pub mod error;
pub mod lock;

pub use error::{StoreError, StoreResult};

use chrono::Utc;
use lock::LockGuard;
use mk_protocol::config_models::StatusSettings;
use mk_protocol::status_models::PipelineStatus;
use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Handle to the status file at a configured path.
///
/// Cloning is cheap; every clone refers to the same file.
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    stale_lock_after: Duration,
    tail_capacity: usize,
}

impl StatusStore {
    /// Open the store described by `settings`.
    ///
    /// The file itself does not need to exist; it is created on the first
    /// write. The parent directory is created here.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Misconfigured` if the path has no file name, points
    /// at a directory, or its parent directory cannot be created.
    pub fn open(settings: &StatusSettings) -> StoreResult<Self> {
        let path = settings.path.clone();
        let misconfigured = |reason: String| StoreError::Misconfigured {
            path: path.clone(),
            reason,
        };

        let file_name = path
            .file_name()
            .ok_or_else(|| misconfigured("path has no file name".to_string()))?;
        if path.is_dir() {
            return Err(misconfigured("path is a directory".to_string()));
        }

        let parent = parent_dir(&path);
        fs::create_dir_all(parent)
            .map_err(|e| misconfigured(format!("cannot create {}: {e}", parent.display())))?;

        let mut lock_name = OsString::from(file_name);
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);

        Ok(Self {
            lock_path,
            path,
            lock_timeout: settings.lock_timeout(),
            stale_lock_after: settings.stale_lock_after(),
            tail_capacity: settings.event_tail.max(1),
        })
    }

    /// Path of the status document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maximum number of events kept in the snapshot's tail.
    pub fn tail_capacity(&self) -> usize {
        self.tail_capacity
    }

    /// Read the current snapshot.
    ///
    /// Never fails: a missing file yields the default snapshot, and so does a
    /// corrupt one (with a warning).
    pub fn read(&self) -> PipelineStatus {
        match self.try_read() {
            Ok(Some(status)) => status,
            Ok(None) => PipelineStatus::default(),
            Err(e) => {
                warn!(error = %e, "Falling back to default status snapshot");
                PipelineStatus::default()
            }
        }
    }

    /// Read the current snapshot, surfacing corruption and I/O errors.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn try_read(&self) -> StoreResult<Option<PipelineStatus>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Replace the snapshot wholesale.
    ///
    /// The revision is set past whatever is currently on disk and
    /// `updated_at` is stamped. Returns the new revision.
    pub fn write(&self, status: &PipelineStatus) -> StoreResult<u64> {
        let _guard = self.lock()?;
        let mut next = status.clone();
        next.revision = self.persisted_revision().max(status.revision);
        self.persist(&mut next)?;
        Ok(next.revision)
    }

    /// Read-modify-write the snapshot under the lock.
    ///
    /// `f` sees the current snapshot (the default one if the file is missing
    /// or corrupt) and returns a value passed back to the caller. Writers
    /// that touch different fields never overwrite each other's changes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the lock could not be taken in
    /// time; in that case `f` is not called and nothing is written.
    pub fn update<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut PipelineStatus) -> R,
    {
        let _guard = self.lock()?;
        let mut status = self.read();
        let result = f(&mut status);
        self.persist(&mut status)?;
        Ok(result)
    }

    /// Replace the snapshot with a fresh default one.
    pub fn reset(&self) -> StoreResult<()> {
        let _guard = self.lock()?;
        let mut fresh = PipelineStatus::default();
        fresh.revision = self.persisted_revision();
        self.persist(&mut fresh)
    }

    /// `try_read` on the blocking thread pool, for async callers.
    pub async fn try_read_async(&self) -> StoreResult<Option<PipelineStatus>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.try_read())
            .await
            .map_err(|e| StoreError::Spawn(e.to_string()))?
    }

    /// `read` on the blocking thread pool, for async callers.
    pub async fn read_async(&self) -> PipelineStatus {
        match self.try_read_async().await {
            Ok(status) => status.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Falling back to default status snapshot");
                PipelineStatus::default()
            }
        }
    }

    /// `update` on the blocking thread pool, so that waiting for the lock
    /// never stalls an async runtime thread.
    pub async fn update_async<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut PipelineStatus) -> R + Send + 'static,
        R: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update(f))
            .await
            .map_err(|e| StoreError::Spawn(e.to_string()))?
    }

    fn lock(&self) -> StoreResult<LockGuard> {
        LockGuard::acquire(&self.lock_path, self.lock_timeout, self.stale_lock_after)
    }

    fn persisted_revision(&self) -> u64 {
        self.try_read()
            .ok()
            .flatten()
            .map(|s| s.revision)
            .unwrap_or(0)
    }

    /// Bump the revision, stamp the time and atomically replace the file.
    /// Caller must hold the lock.
    fn persist(&self, status: &mut PipelineStatus) -> StoreResult<()> {
        status.revision += 1;
        status.updated_at = Some(Utc::now());

        let dir = parent_dir(&self.path);
        fs::create_dir_all(dir).map_err(io_err(dir))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err(dir))?;
        serde_json::to_writer_pretty(&mut tmp, status).map_err(StoreError::Serialize)?;
        tmp.write_all(b"\n").map_err(io_err(tmp.path()))?;
        tmp.as_file().sync_all().map_err(io_err(tmp.path()))?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io {
            path: self.path.clone(),
            source: e.error,
        })?;

        debug!(revision = status.revision, path = %self.path.display(), "Status written");
        Ok(())
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
