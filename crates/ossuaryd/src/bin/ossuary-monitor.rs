//! Ossuary connectivity monitor
//!
//! Polls reachability, reacts to lost and regained connections, and runs
//! the time-of-day schedule.

use anyhow::{Context, Result};
use clap::Parser;
use ossuaryd::cli::{init_logging, DaemonArgs};
use ossuaryd::connectivity::PingProbe;
use ossuaryd::monitor::{Monitor, TICK};
use ossuaryd::refresh::{PortSource, RemotePage, SupervisorSignal};
use ossuaryd::signals::Controls;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "ossuary-monitor")]
#[command(about = "Connectivity and schedule engine for the kiosk", version)]
struct Args {
    #[command(flatten)]
    daemon: DaemonArgs,

    /// Seconds between engine ticks
    #[arg(long, default_value_t = TICK.as_secs())]
    tick_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.daemon.verbose);

    info!("ossuary-monitor v{} starting", env!("CARGO_PKG_VERSION"));

    let paths = args.daemon.paths();
    let page = RemotePage::new(
        PortSource::Status(paths.supervisor_status()),
        Box::new(SupervisorSignal::new(paths.supervisor_pid())),
    );
    let monitor = Monitor::new(paths, Box::new(PingProbe::new()), Arc::new(page));

    let controls = Controls::install().context("failed to install signal handlers")?;
    let period = Duration::from_secs(args.tick_secs.max(1));
    monitor.run(controls, period).await
}
