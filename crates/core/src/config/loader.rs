//! Configuration file loader for the `.miner-kit/` directory.
//!
//! Loads `config.toml`, resolves relative paths against the project root and
//! applies the environment overrides shared by the supervisor and the
//! workers it launches.

use crate::config::error::ConfigError;
use crate::config::error::ConfigResult;
use crate::config::models::AppConfig;
use mk_protocol::config_models::MinerConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Overrides `status.path`. Set by the supervisor for every worker it starts.
pub const STATUS_PATH_ENV: &str = "MINER_KIT_STATUS_PATH";

/// `off`, `0` or `false` disables stage tracking.
pub const TRACKING_ENV: &str = "MINER_KIT_TRACKING";

/// Loads configuration from the `.miner-kit/` directory under `root`.
///
/// If the directory or `config.toml` is missing, the defaults are returned
/// rather than an error. Environment overrides are applied last.
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - `config.toml` exists but cannot be read
/// - `config.toml` has invalid TOML syntax or field types
/// - Module definitions are invalid (empty or duplicate names)
///
/// # Example
///
/// ```rust,no_run
/// use mk_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Supervising {} modules", config.miner.modules.len());
/// # Ok(())
/// # }
/// ```
pub async fn load_config(root: &Path) -> ConfigResult<AppConfig> {
    let mut config = load_config_file(root)?;
    apply_overrides(
        &mut config,
        std::env::var(STATUS_PATH_ENV).ok(),
        std::env::var(TRACKING_ENV).ok(),
    );
    Ok(config)
}

/// Loads `config.toml` without consulting the environment.
pub fn load_config_file(root: &Path) -> ConfigResult<AppConfig> {
    let config_path = root.join(".miner-kit").join("config.toml");

    // If config.toml doesn't exist, return default
    if !config_path.exists() {
        return Ok(AppConfig::with_root(root));
    }

    let content =
        std::fs::read_to_string(&config_path).map_err(|source| ConfigError::FileRead {
            path: config_path.clone(),
            source,
        })?;

    let miner: MinerConfig =
        toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: config_path.clone(),
            source,
        })?;

    validate(&miner, &config_path)?;

    let mut config = AppConfig {
        root: root.to_path_buf(),
        miner,
    };
    config.resolve_paths();

    Ok(config)
}

/// Applies the status-path and tracking overrides.
pub fn apply_overrides(
    config: &mut AppConfig,
    status_path: Option<String>,
    tracking: Option<String>,
) {
    if let Some(path) = status_path.filter(|p| !p.trim().is_empty()) {
        let path = PathBuf::from(path);
        config.miner.status.path = if path.is_relative() {
            config.root.join(path)
        } else {
            path
        };
    }

    if let Some(value) = tracking {
        if matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "off" | "0" | "false" | "disabled"
        ) {
            config.miner.status.disabled = true;
        }
    }
}

fn validate(config: &MinerConfig, path: &Path) -> ConfigResult<()> {
    if config.status.event_tail == 0 {
        return Err(ConfigError::InvalidConfig {
            path: path.to_path_buf(),
            reason: "status.event_tail must be at least 1".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for module in &config.modules {
        if module.name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig {
                path: path.to_path_buf(),
                reason: "module name must not be empty".to_string(),
            });
        }
        if module.program.trim().is_empty() {
            return Err(ConfigError::InvalidConfig {
                path: path.to_path_buf(),
                reason: format!("module '{}' has no program", module.name),
            });
        }
        if !seen.insert(module.name.as_str()) {
            return Err(ConfigError::InvalidConfig {
                path: path.to_path_buf(),
                reason: format!("duplicate module name '{}'", module.name),
            });
        }
    }

    Ok(())
}
