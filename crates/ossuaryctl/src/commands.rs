//! Command implementations.
//!
//! Each returns the process exit code; I/O failures that prevent the
//! command from running at all propagate as errors.

use crate::output::{print_error, print_success, print_warning};
use crate::report::StatusReport;
use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use ossuary_common::status::signal_pid_file;
use ossuary_common::validate::validate_document;
use ossuary_common::{KioskConfig, RuntimePaths, SignalError};
use serde_json::Value;
use std::path::Path;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

pub fn status(paths: &RuntimePaths, json: bool) -> Result<i32> {
    let report = StatusReport::collect(paths);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render());
    }
    Ok(EXIT_SUCCESS)
}

fn deliver(pid_file: &Path, signal: Signal, what: &str) -> i32 {
    match signal_pid_file(pid_file, signal) {
        Ok(pid) => {
            print_success(&format!("sent {} to {} (pid {})", signal.as_str(), what, pid));
            EXIT_SUCCESS
        }
        Err(SignalError::NotRunning(_)) => {
            print_error(&format!("{} is not running", what));
            EXIT_FAILURE
        }
        Err(e) => {
            print_error(&format!("failed to signal {}: {}", what, e));
            EXIT_FAILURE
        }
    }
}

pub fn reload(paths: &RuntimePaths) -> Result<i32> {
    Ok(deliver(&paths.supervisor_pid(), Signal::SIGHUP, "supervisor"))
}

pub fn stop_app(paths: &RuntimePaths) -> Result<i32> {
    Ok(deliver(&paths.child_pid(), Signal::SIGTERM, "app"))
}

/// Problems the daemons would silently work around
pub fn config_problems(text: &str, path: &Path) -> Vec<String> {
    let doc: Value = match serde_json::from_str(text) {
        Ok(doc) => doc,
        Err(e) => return vec![format!("not valid JSON: {}", e)],
    };
    let mut problems = validate_document(&doc);
    if problems.is_empty() {
        if let Err(e) = KioskConfig::from_json(text, path) {
            problems.push(e.to_string());
        }
    }
    problems
}

pub fn check_config(path: &Path) -> Result<i32> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let problems = config_problems(&text, path);
    if problems.is_empty() {
        print_success(&format!("{} is valid", path.display()));
        return Ok(EXIT_SUCCESS);
    }
    for problem in &problems {
        print_warning(problem);
    }
    print_error(&format!(
        "{} has {} problem(s)",
        path.display(),
        problems.len()
    ));
    Ok(EXIT_FAILURE)
}
