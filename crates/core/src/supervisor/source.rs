//! Sources of account descriptors for watchdog mode.

use async_trait::async_trait;
use mk_protocol::work_models::WorkItem;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A unit of work taken from a source, together with the source's own
/// handle for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub item: WorkItem,
    /// Opaque to the supervisor; passed back to `WorkSource::finish`.
    pub key: String,
}

/// Discovers units of work.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Take the next pending item, if any. A claimed item is not returned
    /// again by this or any other claimant.
    async fn claim(&self) -> Option<Claim>;

    /// Report the outcome of a claimed item.
    async fn finish(&self, claim: &Claim, succeeded: bool);
}

/// Reads JSON account descriptors from a directory.
///
/// ```text
/// queue/
///   alice.json        pending
///   processing/       claimed
///   done/             finished successfully
///   failed/           failed or malformed
/// ```
#[derive(Debug, Clone)]
pub struct QueueDirSource {
    dir: PathBuf,
}

impl QueueDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn pending(&self) -> Vec<PathBuf> {
        if !self.dir.exists() {
            return Vec::new();
        }

        WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "Failed to scan queue directory");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("json"))
            .collect()
    }

    /// Move `path` into the `bucket` subdirectory, returning the new path.
    fn move_to(&self, path: &Path, bucket: &str) -> Option<PathBuf> {
        let target_dir = self.dir.join(bucket);
        let file_name = path.file_name()?;
        let target = target_dir.join(file_name);

        let moved = fs::create_dir_all(&target_dir).and_then(|()| fs::rename(path, &target));
        match moved {
            Ok(()) => Some(target),
            Err(e) => {
                debug!(from = %path.display(), bucket, error = %e, "Failed to move descriptor");
                None
            }
        }
    }
}

#[async_trait]
impl WorkSource for QueueDirSource {
    async fn claim(&self) -> Option<Claim> {
        for path in self.pending() {
            // Another claimant may win the rename; just try the next file.
            let Some(claimed) = self.move_to(&path, "processing") else {
                continue;
            };

            let parsed = fs::read_to_string(&claimed)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    serde_json::from_str::<WorkItem>(&content).map_err(|e| e.to_string())
                });

            match parsed {
                Ok(item) if !item.username.trim().is_empty() => {
                    info!(username = %item.username, file = %claimed.display(), "Claimed account");
                    return Some(Claim {
                        item,
                        key: claimed.to_string_lossy().into_owned(),
                    });
                }
                Ok(_) => {
                    warn!(file = %path.display(), "Account descriptor has an empty username");
                    self.move_to(&claimed, "failed");
                }
                Err(reason) => {
                    warn!(file = %path.display(), %reason, "Malformed account descriptor");
                    self.move_to(&claimed, "failed");
                }
            }
        }
        None
    }

    async fn finish(&self, claim: &Claim, succeeded: bool) {
        let bucket = if succeeded { "done" } else { "failed" };
        if self.move_to(Path::new(&claim.key), bucket).is_none() {
            warn!(username = %claim.item.username, bucket, "Could not file finished descriptor");
        }
    }
}
