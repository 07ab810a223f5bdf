//! Settings and logging shared by both daemon binaries.

use clap::Args;
use ossuary_common::paths::{CONFIG_PATH, RUN_DIR, STATE_DIR};
use ossuary_common::RuntimePaths;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Locations and verbosity, overridable from the environment
#[derive(Debug, Clone, Args)]
pub struct DaemonArgs {
    /// Configuration document written by the config server
    #[arg(long, env = "OSSUARY_CONFIG", default_value = CONFIG_PATH)]
    pub config: PathBuf,

    /// Boot-lifetime directory for PID and state files
    #[arg(long, env = "OSSUARY_RUN_DIR", default_value = RUN_DIR)]
    pub run_dir: PathBuf,

    /// Reboot-surviving state directory
    #[arg(long, env = "OSSUARY_STATE_DIR", default_value = STATE_DIR)]
    pub state_dir: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    pub verbose: bool,
}

impl DaemonArgs {
    pub fn paths(&self) -> RuntimePaths {
        RuntimePaths::new(&self.config, &self.run_dir, &self.state_dir)
    }
}

/// Install the global tracing subscriber
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
