//! Ossuary Control - operator CLI for the kiosk daemons

use anyhow::Result;
use clap::Parser;
use ossuaryctl::cli::{Cli, Commands};
use ossuaryctl::commands;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = cli.paths();

    let code = match &cli.command {
        Commands::Status { json } => commands::status(&paths, *json)?,
        Commands::Reload => commands::reload(&paths)?,
        Commands::StopApp => commands::stop_app(&paths)?,
        Commands::CheckConfig { path } => {
            commands::check_config(path.as_deref().unwrap_or(&paths.config_file))?
        }
    };
    std::process::exit(code);
}
