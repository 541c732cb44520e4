//! Unit-of-work descriptors.
//!
//! An account descriptor is produced by an external discovery mechanism and
//! only needs to identify the account; everything else is the worker's
//! business.

use serde::{Deserialize, Serialize};

/// One account to be processed end-to-end through the pipeline.
///
/// # Example
///
/// ```json
/// { "username": "alice", "platform": "instagram" }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub username: String,

    #[serde(default = "default_platform")]
    pub platform: String,

    /// Ask the worker to skip any cached data for this account.
    #[serde(default)]
    pub force_fresh: bool,
}

fn default_platform() -> String {
    "instagram".to_string()
}

impl WorkItem {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            platform: default_platform(),
            force_fresh: false,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_force_fresh(mut self, force_fresh: bool) -> Self {
        self.force_fresh = force_fresh;
        self
    }
}
