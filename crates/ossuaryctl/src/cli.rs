//! Command-line argument parsing.

use clap::{Parser, Subcommand};
use ossuary_common::paths::{CONFIG_PATH, RUN_DIR, STATE_DIR};
use ossuary_common::RuntimePaths;
use std::path::PathBuf;

/// Ossuary kiosk control
#[derive(Parser)]
#[command(name = "ossuaryctl")]
#[command(about = "Inspect and control the Ossuary kiosk daemons", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Configuration document
    #[arg(long, global = true, env = "OSSUARY_CONFIG", default_value = CONFIG_PATH)]
    pub config: PathBuf,

    /// Boot-lifetime directory holding PID and state files
    #[arg(long, global = true, env = "OSSUARY_RUN_DIR", default_value = RUN_DIR)]
    pub run_dir: PathBuf,

    /// Reboot-surviving state directory
    #[arg(long, global = true, env = "OSSUARY_STATE_DIR", default_value = STATE_DIR)]
    pub state_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn paths(&self) -> RuntimePaths {
        RuntimePaths::new(&self.config, &self.run_dir, &self.state_dir)
    }
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show supervisor, app and connectivity state
    Status {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Ask the supervisor to restart the app (SIGHUP)
    Reload,

    /// Terminate the running app; the supervisor starts it again
    StopApp,

    /// Validate a configuration document
    CheckConfig {
        /// Document to check (defaults to --config)
        path: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_dirs_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ossuaryctl",
            "status",
            "--json",
            "--run-dir",
            "/tmp/run",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Status { json: true }));
        assert_eq!(cli.paths().supervisor_pid(), PathBuf::from("/tmp/run/process.pid"));
    }

    #[test]
    fn test_check_config_path_is_optional() {
        let cli = Cli::try_parse_from(["ossuaryctl", "check-config"]).unwrap();
        assert!(matches!(cli.command, Commands::CheckConfig { path: None }));
    }
}
