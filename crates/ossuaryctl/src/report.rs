//! Status report assembled from the runtime files.

use ossuary_common::status::{is_alive, read_pid};
use ossuary_common::{
    Connectivity, ConnectivityRecord, FireLedger, KioskConfig, RuntimePaths, SupervisorState,
    SupervisorStatus,
};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::fmt::Write;
use std::path::Path;

/// Liveness of a process named by a PID file
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Liveness {
    pub pid: Option<i32>,
    pub alive: bool,
}

impl Liveness {
    pub fn probe(pid_file: &Path) -> Self {
        let pid = read_pid(pid_file).ok().flatten();
        Self {
            pid,
            alive: pid.is_some_and(is_alive),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub supervisor: Liveness,
    pub child: Liveness,
    pub monitor: Liveness,
    pub configured_command: Option<String>,
    pub supervisor_status: Option<SupervisorStatus>,
    pub connectivity: Option<ConnectivityRecord>,
    pub ledger_entries: usize,
}

impl StatusReport {
    pub fn collect(paths: &RuntimePaths) -> Self {
        let config = KioskConfig::load_or_default(&paths.config_file);
        let connection_file = paths.connection_state();
        let ledger_file = paths.fire_ledger();

        Self {
            supervisor: Liveness::probe(&paths.supervisor_pid()),
            child: Liveness::probe(&paths.child_pid()),
            monitor: Liveness::probe(&paths.monitor_pid()),
            configured_command: config.command().map(str::to_string),
            supervisor_status: SupervisorStatus::load(&paths.supervisor_status())
                .ok()
                .flatten(),
            connectivity: connection_file
                .exists()
                .then(|| ConnectivityRecord::load_or_unknown(&connection_file)),
            ledger_entries: if ledger_file.exists() {
                FireLedger::load_or_empty(&ledger_file).len()
            } else {
                0
            },
        }
    }

    /// Human-readable rendering
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", "[PROCESSES]".bold());
        let _ = writeln!(out, "  Supervisor: {}", liveness(&self.supervisor));
        let _ = writeln!(out, "  App:        {}", liveness(&self.child));
        let _ = writeln!(out, "  Monitor:    {}", liveness(&self.monitor));

        let _ = writeln!(out);
        let _ = writeln!(out, "{}", "[APP]".bold());
        let _ = writeln!(
            out,
            "  Configured: {}",
            self.configured_command.as_deref().unwrap_or("(none)")
        );
        match &self.supervisor_status {
            Some(status) => {
                let _ = writeln!(out, "  State:      {}", state(status.state));
                if let Some(command) = &status.command {
                    let _ = writeln!(out, "  Running:    {}", command);
                }
                if let Some(server) = status.display_server {
                    let _ = writeln!(out, "  Display:    {}", server);
                }
                if let Some(port) = status.debugging_port {
                    let _ = writeln!(out, "  Debugging:  127.0.0.1:{}", port);
                }
                let _ = writeln!(out, "  Crashes:    {} in current window", status.crash_count);
                if let Some(exit) = &status.last_exit {
                    let _ = writeln!(out, "  Last exit:  {}", exit);
                }
                let _ = writeln!(
                    out,
                    "  Updated:    {}",
                    status.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            None => {
                let _ = writeln!(out, "  State:      {}", "no status record".dimmed());
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "{}", "[NETWORK]".bold());
        match &self.connectivity {
            Some(record) => {
                let _ = writeln!(out, "  State:      {}", connectivity(record.current));
                if let Some(since) = record.disconnected_since {
                    let _ = writeln!(
                        out,
                        "  Offline since {}",
                        since.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
            }
            None => {
                let _ = writeln!(out, "  State:      {}", "unknown".yellow());
            }
        }
        let _ = writeln!(out, "  Schedule ledger: {} entries", self.ledger_entries);
        out
    }
}

fn liveness(l: &Liveness) -> String {
    match (l.pid, l.alive) {
        (Some(pid), true) => format!("{} (pid {})", "running".green(), pid),
        (Some(pid), false) => format!("{} (stale pid {})", "not running".red(), pid),
        (None, _) => "not running".red().to_string(),
    }
}

fn state(s: SupervisorState) -> String {
    match s {
        SupervisorState::Running => s.green().to_string(),
        SupervisorState::Crashed => s.red().to_string(),
        SupervisorState::Starting | SupervisorState::Stopping => s.yellow().to_string(),
        SupervisorState::Idle => s.dimmed().to_string(),
    }
}

fn connectivity(c: Connectivity) -> String {
    match c {
        Connectivity::Connected => c.green().to_string(),
        Connectivity::Disconnected => c.red().to_string(),
        Connectivity::Unknown => c.yellow().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossuary_common::status::write_pid;

    #[test]
    fn test_empty_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let report = StatusReport::collect(&RuntimePaths::with_root(dir.path()));
        assert_eq!(report.supervisor, Liveness { pid: None, alive: false });
        assert!(report.supervisor_status.is_none());
        assert!(report.connectivity.is_none());
        assert_eq!(report.ledger_entries, 0);
        assert!(report.render().contains("not running"));
    }

    #[test]
    fn test_live_and_stale_pids() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RuntimePaths::with_root(dir.path());
        write_pid(&paths.supervisor_pid(), std::process::id()).unwrap();
        write_pid(&paths.child_pid(), 0x7fff_fff0).unwrap();

        let report = StatusReport::collect(&paths);
        assert!(report.supervisor.alive);
        assert_eq!(report.child.pid, Some(0x7fff_fff0));
        assert!(!report.child.alive);
        assert!(report.render().contains("stale pid"));
    }

    #[test]
    fn test_records_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RuntimePaths::with_root(dir.path());
        std::fs::write(
            &paths.config_file,
            r#"{"startup_command": "chromium --kiosk https://example.com"}"#,
        )
        .unwrap();
        SupervisorStatus {
            state: SupervisorState::Running,
            debugging_port: Some(9222),
            ..SupervisorStatus::default()
        }
        .save(&paths.supervisor_status())
        .unwrap();
        ConnectivityRecord {
            current: Connectivity::Connected,
            ..ConnectivityRecord::default()
        }
        .save(&paths.connection_state())
        .unwrap();

        let report = StatusReport::collect(&paths);
        assert_eq!(
            report.configured_command.as_deref(),
            Some("chromium --kiosk https://example.com")
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["supervisor_status"]["state"], "running");
        assert_eq!(json["connectivity"]["current"], "connected");

        let text = report.render();
        assert!(text.contains("127.0.0.1:9222"));
        assert!(text.contains("connected"));
    }
}
