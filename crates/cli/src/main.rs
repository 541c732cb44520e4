mod cli;
mod commands;
mod logging;

use clap::Parser;
use cli::{Cli, Command};
use mk_protocol::work_models::WorkItem;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    let root = cli.root;
    match cli.command {
        Command::Run => commands::run(&root).await,
        Command::Direct {
            username,
            platform,
            force_fresh,
        } => {
            let item = WorkItem::new(username)
                .with_platform(platform)
                .with_force_fresh(force_fresh);
            commands::direct(&root, item).await
        }
        Command::Status { json } => commands::status(&root, json).await,
        Command::Stage {
            action,
            stage,
            message,
            username,
            details,
        } => commands::stage(&root, action, stage, &message, &username, details).await,
        Command::Reset => commands::reset(&root).await,
    }
}
