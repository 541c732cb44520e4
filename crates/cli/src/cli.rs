//! Command-line argument definitions.

use clap::{Parser, Subcommand, ValueEnum};
use mk_protocol::stage_models::{DetailValue, Stage};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "miner")]
#[command(about = "Supervise the account pipeline and track its stages", long_about = None)]
pub struct Cli {
    /// Project directory containing `.miner-kit/`
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the supervisor in watchdog mode until Ctrl-C
    Run,

    /// Process a single account, then exit
    Direct {
        /// Account to process
        #[arg(long)]
        username: String,

        /// Platform the account lives on
        #[arg(long, default_value = "instagram")]
        platform: String,

        /// Ignore any cached data for the account
        #[arg(long)]
        force_fresh: bool,
    },

    /// Print the current pipeline status
    Status {
        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a stage transition (for external workers)
    Stage {
        #[arg(value_enum)]
        action: StageAction,

        /// Stage number (0-7)
        #[arg(value_parser = parse_stage)]
        stage: Stage,

        message: String,

        /// Account being processed
        #[arg(long, default_value = "")]
        username: String,

        /// Structured context, repeatable
        #[arg(long = "detail", value_name = "KEY=VALUE", value_parser = parse_detail)]
        details: Vec<(String, DetailValue)>,
    },

    /// Replace the status snapshot with a fresh one
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StageAction {
    Start,
    Complete,
    Fail,
}

fn parse_stage(raw: &str) -> Result<Stage, String> {
    let id: u8 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a stage number"))?;
    Stage::try_from(id)
}

fn parse_detail(raw: &str) -> Result<(String, DetailValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), DetailValue::parse(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stage_accepts_range() {
        assert_eq!(parse_stage("0"), Ok(Stage::Initialization));
        assert_eq!(parse_stage("7"), Ok(Stage::Complete));
        assert!(parse_stage("8").is_err());
        assert!(parse_stage("two").is_err());
    }

    #[test]
    fn test_parse_detail() {
        assert_eq!(
            parse_detail("posts=42"),
            Ok(("posts".to_string(), DetailValue::Integer(42)))
        );
        assert_eq!(
            parse_detail("note=a=b"),
            Ok(("note".to_string(), DetailValue::Text("a=b".to_string())))
        );
        assert!(parse_detail("novalue").is_err());
        assert!(parse_detail("=1").is_err());
    }

    #[test]
    fn test_stage_command_parses() {
        let cli = Cli::parse_from([
            "miner",
            "stage",
            "complete",
            "3",
            "Indexed posts",
            "--username",
            "alice",
            "--detail",
            "posts=12",
            "--root",
            "/tmp/project",
        ]);

        match cli.command {
            Command::Stage {
                action,
                stage,
                message,
                username,
                details,
            } => {
                assert_eq!(action, StageAction::Complete);
                assert_eq!(stage, Stage::VectorDatabase);
                assert_eq!(message, "Indexed posts");
                assert_eq!(username, "alice");
                assert_eq!(details.len(), 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.root, PathBuf::from("/tmp/project"));
    }
}
