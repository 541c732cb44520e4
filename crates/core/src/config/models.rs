//! Resolved application configuration.
//!
//! `AppConfig` wraps the parsed `MinerConfig` together with the project root
//! it was loaded from, with every relative path already resolved against
//! that root.

use mk_protocol::config_models::MinerConfig;
use std::path::{Path, PathBuf};

/// Configuration loaded from a project's `.miner-kit/` directory.
///
/// # Example
///
/// ```rust,no_run
/// use mk_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Status file: {}", config.miner.status.path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Directory that contains `.miner-kit/`.
    pub root: PathBuf,

    /// Parsed settings with absolute paths.
    pub miner: MinerConfig,
}

impl AppConfig {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: &Path) -> Self {
        let mut config = Self {
            root: root.to_path_buf(),
            miner: MinerConfig::default(),
        };
        config.resolve_paths();
        config
    }

    /// Make every relative path absolute with respect to `root`.
    pub(crate) fn resolve_paths(&mut self) {
        let root = self.root.clone();
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        };

        resolve(&mut self.miner.status.path);
        resolve(&mut self.miner.supervisor.queue_dir);
        if let Some(cwd) = self.miner.worker.cwd.as_mut() {
            resolve(cwd);
        }
        for module in &mut self.miner.modules {
            if let Some(cwd) = module.cwd.as_mut() {
                resolve(cwd);
            }
            if let Some(heartbeat) = module.heartbeat_file.as_mut() {
                resolve(heartbeat);
            }
        }
    }
}
