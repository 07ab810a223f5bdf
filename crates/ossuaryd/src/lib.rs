//! Ossuary daemon library - the supervisor and the connectivity monitor.

pub mod cli;
pub mod connectivity;
pub mod crash;
pub mod display;
pub mod launch;
pub mod monitor;
pub mod proctable;
pub mod process_tree;
pub mod profile;
pub mod refresh;
pub mod schedule;
pub mod signals;
pub mod supervisor;
