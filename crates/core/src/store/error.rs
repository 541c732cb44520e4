//! Error types for the status store.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the status store.
///
/// Callers on the pipeline's hot path never see these: the stage tracker
/// logs them and drops the update.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The configured status path cannot be used at all.
    #[error("Status path {path} is unusable: {reason}")]
    Misconfigured { path: PathBuf, reason: String },

    /// Another writer held the lock for longer than the configured timeout.
    #[error("Timed out after {waited:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    /// Reading, writing or renaming a file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The snapshot could not be serialized.
    #[error("Failed to serialize status snapshot: {0}")]
    Serialize(serde_json::Error),

    /// The persisted snapshot is not valid JSON for `PipelineStatus`.
    #[error("Status file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A store operation moved off the async runtime did not complete.
    #[error("Status store task failed: {0}")]
    Spawn(String),
}

/// Type alias for Result with StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
