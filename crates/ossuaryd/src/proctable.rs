//! Process table queries backed by sysinfo.

use sysinfo::System;

/// A process seen in the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: i32,
    pub name: String,
}

/// Snapshot of every process currently running
pub fn snapshot() -> Vec<ProcessEntry> {
    let mut system = System::new();
    system.refresh_processes();
    system
        .processes()
        .values()
        .map(|p| ProcessEntry {
            pid: p.pid().as_u32() as i32,
            name: p.name().to_string(),
        })
        .collect()
}

/// Names of every running process
pub fn running_names() -> Vec<String> {
    snapshot().into_iter().map(|p| p.name).collect()
}

/// Processes whose name matches one of `names`, excluding `exclude` pids
pub fn matching(names: &[&str], exclude: &[i32]) -> Vec<ProcessEntry> {
    if names.is_empty() {
        return Vec::new();
    }
    snapshot()
        .into_iter()
        .filter(|p| names.contains(&p.name.as_str()) && !exclude.contains(&p.pid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_contains_self() {
        let me = std::process::id() as i32;
        assert!(snapshot().iter().any(|p| p.pid == me));
    }

    #[test]
    fn test_matching_with_no_names() {
        assert!(matching(&[], &[]).is_empty());
    }
}
