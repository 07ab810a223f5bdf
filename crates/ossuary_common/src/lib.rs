//! Ossuary Common - shared configuration and status contract
//!
//! Types shared by the supervisor, the connectivity monitor and `ossuaryctl`:
//! the configuration document written by the external config server, and
//! the runtime files the core writes for external readers.

pub mod atomic;
pub mod config;
pub mod error;
pub mod ledger;
pub mod paths;
pub mod status;
pub mod validate;

pub use config::KioskConfig;
pub use error::{ConfigError, SignalError, StatusError};
pub use ledger::FireLedger;
pub use paths::RuntimePaths;
pub use status::{
    Connectivity, ConnectivityRecord, DisplayServer, SupervisorState, SupervisorStatus,
};
