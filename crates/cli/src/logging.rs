//! Logging setup for the `miner` binary.

use color_eyre::eyre::{eyre, Result};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level is `info`, or `debug` for
/// the miner-kit crates with `--verbose`. Logs go to stderr so that stdout
/// stays machine-readable.
pub fn init_logging(verbose: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(verbose)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!(e))
}

fn default_filter(verbose: bool) -> Result<EnvFilter> {
    if !verbose {
        return Ok(EnvFilter::new("info"));
    }
    Ok(EnvFilter::new("info")
        .add_directive("mk_core=debug".parse()?)
        .add_directive("miner=debug".parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_filter_targets_this_binary() {
        let filter = default_filter(true).expect("filter").to_string();

        assert!(filter.contains(&format!("{}=debug", env!("CARGO_CRATE_NAME"))));
        assert!(filter.contains("mk_core=debug"));
    }

    #[test]
    fn test_quiet_filter_is_info() {
        let filter = default_filter(false).expect("filter").to_string();

        assert_eq!(filter, "info");
    }
}
