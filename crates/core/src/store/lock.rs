//! Cross-process write lock.
//!
//! The lock is a sibling file created with `create_new`, which fails if the
//! file already exists. Whoever creates it owns the lock until the guard is
//! dropped. The file holds an owner token (pid and a random nonce); a lock
//! file is only ever removed by someone who has checked that it still holds
//! the token they expect.

use crate::store::error::{StoreError, StoreResult};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive lock on the status file, released when dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    token: String,
}

impl LockGuard {
    /// Acquire the lock at `path`, waiting at most `timeout`.
    ///
    /// A lock file older than `stale_after` is assumed to belong to a writer
    /// that died inside its critical section and is removed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the lock is still held when the
    /// timeout expires, or `StoreError::Io` if the lock file cannot be
    /// created for any other reason.
    pub fn acquire(path: &Path, timeout: Duration, stale_after: Duration) -> StoreResult<Self> {
        let started = Instant::now();
        let token = format!("{} {}", std::process::id(), Uuid::new_v4());

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    if let Err(source) = writeln!(file, "{token}").and_then(|()| file.sync_all()) {
                        let _ = fs::remove_file(path);
                        return Err(StoreError::Io {
                            path: path.to_path_buf(),
                            source,
                        });
                    }
                    return Ok(Self {
                        path: path.to_path_buf(),
                        token,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(owner) = stale_owner(path, stale_after) {
                        warn!(lock = %path.display(), %owner, "Breaking stale status lock");
                        remove_if_owned(path, &owner);
                        continue;
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    let parent = path.parent().unwrap_or_else(|| Path::new("."));
                    fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                    continue;
                }
                Err(source) => {
                    return Err(StoreError::Io {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }

            let waited = started.elapsed();
            if waited >= timeout {
                debug!(lock = %path.display(), ?waited, "Status lock busy");
                return Err(StoreError::LockTimeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            thread::sleep(RETRY_INTERVAL.min(timeout - waited));
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !remove_if_owned(&self.path, &self.token) {
            warn!(lock = %self.path.display(), "Status lock was taken over before release");
        }
    }
}

fn read_owner(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|content| content.trim().to_string())
}

/// The owner token of the lock at `path` if the lock is older than
/// `stale_after`.
fn stale_owner(path: &Path, stale_after: Duration) -> Option<String> {
    let age = fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())?;
    if age <= stale_after {
        return None;
    }
    read_owner(path)
}

/// Remove the lock at `path` only if it still belongs to `owner`.
///
/// The file is first renamed to a private name so that nobody else can act
/// on it, then checked. A lock that turns out to belong to someone else is
/// linked back into place; if a third writer has created a new lock in the
/// meantime, that lock is left alone.
fn remove_if_owned(path: &Path, owner: &str) -> bool {
    let mut claimed = path.as_os_str().to_owned();
    claimed.push(format!(".{}", Uuid::new_v4()));
    let claimed = PathBuf::from(claimed);

    if fs::rename(path, &claimed).is_err() {
        return false;
    }

    let owned = read_owner(&claimed).as_deref() == Some(owner);
    if !owned {
        if let Err(e) = fs::hard_link(&claimed, path) {
            debug!(lock = %path.display(), error = %e, "Could not restore status lock");
        }
    }
    let _ = fs::remove_file(&claimed);
    owned
}
