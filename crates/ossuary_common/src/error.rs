//! Error types shared by the daemons and the control CLI.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to read the configuration document.
///
/// Callers in the daemons never propagate this; they log it and carry on
/// as if nothing were configured.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure reading or writing one of the runtime status files.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode status record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("malformed pid file {path}: {content:?}")]
    BadPid { path: PathBuf, content: String },
}

impl StatusError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure delivering a control signal to another ossuary process.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("process is not running (no pid in {0})")]
    NotRunning(PathBuf),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("kill({pid}, {signal}) failed: {source}")]
    Kill {
        pid: i32,
        signal: &'static str,
        #[source]
        source: nix::Error,
    },
}
