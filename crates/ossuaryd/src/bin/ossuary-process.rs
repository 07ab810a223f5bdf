//! Ossuary process supervisor
//!
//! Keeps the configured kiosk command running, restarts it on crash and
//! reloads it on SIGHUP.

use anyhow::{Context, Result};
use clap::Parser;
use ossuaryd::cli::{init_logging, DaemonArgs};
use ossuaryd::signals::Controls;
use ossuaryd::supervisor::{Supervisor, SupervisorOptions};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "ossuary-process")]
#[command(about = "Supervise the kiosk application", version)]
struct Args {
    #[command(flatten)]
    daemon: DaemonArgs,

    /// Command to run until the configuration document names one
    #[arg(long)]
    command: Option<String>,

    /// Page to show in a kiosk browser while nothing is configured
    #[arg(long, env = "OSSUARY_PLACEHOLDER_URL")]
    placeholder_url: Option<String>,

    /// Browser profile directory used for kiosk launches
    #[arg(long)]
    profile_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.daemon.verbose);

    info!("ossuary-process v{} starting", env!("CARGO_PKG_VERSION"));

    let mut options = SupervisorOptions::new(args.daemon.paths());
    options.initial_command = args.command;
    options.placeholder_url = args.placeholder_url;
    if let Some(dir) = args.profile_dir {
        options.profile_dir = dir;
    }

    let controls = Controls::install().context("failed to install signal handlers")?;
    Supervisor::new(options).run(controls).await
}
