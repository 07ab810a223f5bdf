//! Runtime status records.
//!
//! The supervisor and the monitor keep their state in memory and serialize
//! it here after every change. External readers (web UI, `ossuaryctl`) only
//! ever see whole documents.

use crate::atomic::{write_atomic, write_json};
use crate::error::{SignalError, StatusError};
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Lifecycle of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

/// Graphical session flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayServer {
    X11,
    Wayland,
    Unknown,
}

impl fmt::Display for DisplayServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayServer::X11 => f.write_str("x11"),
            DisplayServer::Wayland => f.write_str("wayland"),
            DisplayServer::Unknown => f.write_str("unknown"),
        }
    }
}

/// Snapshot of the supervisor, rewritten after every state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub command: Option<String>,
    pub is_gui: bool,
    pub pid: Option<u32>,
    pub pgid: Option<i32>,
    pub crash_count: u32,
    pub window_start: Option<DateTime<Utc>>,
    pub display_server: Option<DisplayServer>,
    /// Port of the remote-debugging endpoint, when the app exposes one
    pub debugging_port: Option<u16>,
    pub last_exit: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            state: SupervisorState::Idle,
            command: None,
            is_gui: false,
            pid: None,
            pgid: None,
            crash_count: 0,
            window_start: None,
            display_server: None,
            debugging_port: None,
            last_exit: None,
            updated_at: Utc::now(),
        }
    }
}

impl SupervisorStatus {
    pub fn save(&self, path: &Path) -> Result<(), StatusError> {
        write_json(path, self, false)
    }

    /// `Ok(None)` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>, StatusError> {
        load_json(path)
    }
}

/// Classified reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Unknown => f.write_str("unknown"),
            Connectivity::Connected => f.write_str("connected"),
            Connectivity::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Connectivity state persisted to the boot-lifetime directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityRecord {
    pub current: Connectivity,
    pub disconnected_since: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ConnectivityRecord {
    fn default() -> Self {
        Self {
            current: Connectivity::Unknown,
            disconnected_since: None,
            updated_at: Utc::now(),
        }
    }
}

impl ConnectivityRecord {
    pub fn save(&self, path: &Path) -> Result<(), StatusError> {
        write_json(path, self, false)
    }

    /// Load the persisted record; any problem yields `Unknown`
    pub fn load_or_unknown(path: &Path) -> Self {
        match load_json(path) {
            Ok(Some(record)) => record,
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("Failed to read connectivity state: {}. Starting from unknown.", e);
                Self::default()
            }
        }
    }
}

pub(crate) fn load_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, StatusError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StatusError::io(path, e)),
    };
    Ok(Some(serde_json::from_str(&text)?))
}

/// Write a PID file atomically
pub fn write_pid(path: &Path, pid: u32) -> Result<(), StatusError> {
    write_atomic(path, format!("{}\n", pid).as_bytes())
}

/// Read a PID file; `Ok(None)` when the file does not exist
pub fn read_pid(path: &Path) -> Result<Option<i32>, StatusError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StatusError::io(path, e)),
    };
    match content.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        _ => Err(StatusError::BadPid {
            path: path.to_path_buf(),
            content,
        }),
    }
}

/// Remove a PID file, ignoring a missing one
pub fn remove_pid(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Signal-0 liveness probe
pub fn is_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // Exists but owned by someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Send `signal` to the process named by a PID file
pub fn signal_pid_file(path: &Path, signal: Signal) -> Result<i32, SignalError> {
    let pid = read_pid(path)?.ok_or_else(|| SignalError::NotRunning(path.to_path_buf()))?;
    kill(Pid::from_raw(pid), signal).map_err(|source| SignalError::Kill {
        pid,
        signal: signal.as_str(),
        source,
    })?;
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("process.pid");

        assert_eq!(read_pid(&path).unwrap(), None);
        write_pid(&path, 4242).unwrap();
        assert_eq!(read_pid(&path).unwrap(), Some(4242));
        remove_pid(&path);
        assert_eq!(read_pid(&path).unwrap(), None);
    }

    #[test]
    fn test_garbage_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("process.pid");
        fs::write(&path, "not-a-pid").unwrap();
        assert!(matches!(read_pid(&path), Err(StatusError::BadPid { .. })));
    }

    #[test]
    fn test_own_process_is_alive() {
        assert!(is_alive(std::process::id() as i32));
    }

    #[test]
    fn test_signal_without_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = signal_pid_file(&dir.path().join("missing.pid"), Signal::SIGHUP);
        assert!(matches!(result, Err(SignalError::NotRunning(_))));
    }

    #[test]
    fn test_connectivity_record_defaults_to_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connection-state.json");
        assert_eq!(
            ConnectivityRecord::load_or_unknown(&path).current,
            Connectivity::Unknown
        );

        fs::write(&path, "{{{").unwrap();
        assert_eq!(
            ConnectivityRecord::load_or_unknown(&path).current,
            Connectivity::Unknown
        );

        let record = ConnectivityRecord {
            current: Connectivity::Disconnected,
            disconnected_since: Some(Utc::now()),
            updated_at: Utc::now(),
        };
        record.save(&path).unwrap();
        assert_eq!(ConnectivityRecord::load_or_unknown(&path), record);
    }

    #[test]
    fn test_supervisor_status_serializes_snake_case() {
        let status = SupervisorStatus {
            state: SupervisorState::Running,
            display_server: Some(DisplayServer::Wayland),
            ..SupervisorStatus::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["display_server"], "wayland");
    }
}
