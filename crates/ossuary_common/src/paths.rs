//! Filesystem layout shared with the external collaborators.
//!
//! The web UI and the installer hard-code these locations, so the defaults
//! must not move. Everything is rooted in a [`RuntimePaths`] value so tests
//! can point the daemons at a temporary directory.

use std::path::{Path, PathBuf};

/// Configuration document written by the config server
pub const CONFIG_PATH: &str = "/etc/ossuary/config.json";

/// Boot-lifetime directory (tmpfs)
pub const RUN_DIR: &str = "/run/ossuary";

/// Reboot-surviving state directory
pub const STATE_DIR: &str = "/var/lib/ossuary";

const SUPERVISOR_PID_FILE: &str = "process.pid";
const CHILD_PID_FILE: &str = "process.pid.child";
const SUPERVISOR_STATUS_FILE: &str = "process.status.json";
const MONITOR_PID_FILE: &str = "monitor.pid";
const CONNECTION_STATE_FILE: &str = "connection-state.json";
const FIRE_LEDGER_FILE: &str = "schedule-ledger.json";

/// Resolved locations of every file the core reads or writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub config_file: PathBuf,
    pub run_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl Default for RuntimePaths {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from(CONFIG_PATH),
            run_dir: PathBuf::from(RUN_DIR),
            state_dir: PathBuf::from(STATE_DIR),
        }
    }
}

impl RuntimePaths {
    pub fn new(
        config_file: impl Into<PathBuf>,
        run_dir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config_file: config_file.into(),
            run_dir: run_dir.into(),
            state_dir: state_dir.into(),
        }
    }

    /// Layout with every directory under one root (tests)
    pub fn with_root(root: &Path) -> Self {
        Self {
            config_file: root.join("config.json"),
            run_dir: root.join("run"),
            state_dir: root.join("state"),
        }
    }

    pub fn supervisor_pid(&self) -> PathBuf {
        self.run_dir.join(SUPERVISOR_PID_FILE)
    }

    pub fn child_pid(&self) -> PathBuf {
        self.run_dir.join(CHILD_PID_FILE)
    }

    pub fn supervisor_status(&self) -> PathBuf {
        self.run_dir.join(SUPERVISOR_STATUS_FILE)
    }

    pub fn monitor_pid(&self) -> PathBuf {
        self.run_dir.join(MONITOR_PID_FILE)
    }

    pub fn connection_state(&self) -> PathBuf {
        self.run_dir.join(CONNECTION_STATE_FILE)
    }

    pub fn fire_ledger(&self) -> PathBuf {
        self.state_dir.join(FIRE_LEDGER_FILE)
    }
}
