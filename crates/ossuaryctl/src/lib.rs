//! ossuaryctl - inspect and control the Ossuary kiosk daemons

pub mod cli;
pub mod commands;
pub mod output;
pub mod report;

pub use report::StatusReport;
