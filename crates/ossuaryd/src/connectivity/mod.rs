//! Connectivity state machine.
//!
//! Classifies each probe result as connected or disconnected and reports a
//! transition only when the classification changes. The state is written
//! to the boot-lifetime directory after every change, so a restarted
//! monitor picks up where the previous one left off instead of replaying a
//! spurious "regained".

pub mod probe;

pub use probe::{PingProbe, ReachabilityProbe, SwitchProbe};

use chrono::Utc;
use ossuary_common::{Connectivity, ConnectivityRecord};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// A change worth acting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Lost,
    Regained,
}

pub struct ConnectivityMachine {
    record: ConnectivityRecord,
    state_file: PathBuf,
}

impl ConnectivityMachine {
    /// Resume from the persisted record (or `Unknown`)
    pub fn load(state_file: PathBuf) -> Self {
        let record = ConnectivityRecord::load_or_unknown(&state_file);
        info!("Connectivity state at start: {}", record.current);
        Self { record, state_file }
    }

    pub fn current(&self) -> Connectivity {
        self.record.current
    }

    pub fn record(&self) -> &ConnectivityRecord {
        &self.record
    }

    /// Feed one probe result.
    ///
    /// Unknown -> Connected is silent; Unknown -> Disconnected counts as a
    /// loss. Repeating the current state reports nothing.
    pub fn observe(&mut self, reachable: bool) -> Option<Transition> {
        let next = if reachable {
            Connectivity::Connected
        } else {
            Connectivity::Disconnected
        };
        let previous = self.record.current;
        if previous == next {
            return None;
        }

        let transition = match (previous, next) {
            (Connectivity::Disconnected, Connectivity::Connected) => Some(Transition::Regained),
            (_, Connectivity::Disconnected) => Some(Transition::Lost),
            _ => None,
        };

        let now = Utc::now();
        self.record.current = next;
        self.record.disconnected_since = match next {
            Connectivity::Disconnected => Some(now),
            _ => None,
        };
        self.record.updated_at = now;
        if let Err(e) = self.record.save(&self.state_file) {
            warn!("Failed to persist connectivity state: {}", e);
        }

        match transition {
            Some(Transition::Lost) => warn!("Connection lost ({} -> {})", previous, next),
            Some(Transition::Regained) => info!("Connection regained ({} -> {})", previous, next),
            None => info!("Connectivity: {} -> {}", previous, next),
        }
        transition
    }
}

/// Interval timer for the periodic refresh while connected
#[derive(Debug, Clone)]
pub struct RefreshTimer {
    last: Instant,
}

impl RefreshTimer {
    pub fn new(now: Instant) -> Self {
        Self { last: now }
    }

    /// Has `interval` passed since the last refresh?
    pub fn due(&self, interval: Option<Duration>, now: Instant) -> bool {
        match interval {
            Some(interval) => now.saturating_duration_since(self.last) >= interval,
            None => false,
        }
    }

    pub fn reset(&mut self, now: Instant) {
        self.last = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(dir: &tempfile::TempDir) -> ConnectivityMachine {
        ConnectivityMachine::load(dir.path().join("connection-state.json"))
    }

    #[test]
    fn test_first_success_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(&dir);
        assert_eq!(m.current(), Connectivity::Unknown);
        assert_eq!(m.observe(true), None);
        assert_eq!(m.current(), Connectivity::Connected);
    }

    #[test]
    fn test_repeated_failures_report_one_loss() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(&dir);
        m.observe(true);

        let transitions: Vec<_> = (0..3).filter_map(|_| m.observe(false)).collect();
        assert_eq!(transitions, vec![Transition::Lost]);
        assert!(m.record().disconnected_since.is_some());

        assert_eq!(m.observe(true), Some(Transition::Regained));
        assert_eq!(m.observe(true), None);
        assert!(m.record().disconnected_since.is_none());
    }

    #[test]
    fn test_offline_at_boot_counts_as_loss() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(&dir);
        assert_eq!(m.observe(false), Some(Transition::Lost));
    }

    #[test]
    fn test_restart_does_not_replay_regained() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut m = machine(&dir);
            m.observe(true);
        }
        let mut resumed = machine(&dir);
        assert_eq!(resumed.current(), Connectivity::Connected);
        assert_eq!(resumed.observe(true), None);
    }

    #[test]
    fn test_restart_while_offline_still_regains() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut m = machine(&dir);
            m.observe(false);
        }
        let mut resumed = machine(&dir);
        assert_eq!(resumed.observe(false), None);
        assert_eq!(resumed.observe(true), Some(Transition::Regained));
    }

    #[test]
    fn test_refresh_timer() {
        let start = Instant::now();
        let mut timer = RefreshTimer::new(start);
        let hour = Some(Duration::from_secs(3600));

        assert!(!timer.due(None, start + Duration::from_secs(100_000)));
        assert!(!timer.due(hour, start + Duration::from_secs(3599)));
        assert!(timer.due(hour, start + Duration::from_secs(3600)));

        timer.reset(start + Duration::from_secs(3600));
        assert!(!timer.due(hour, start + Duration::from_secs(3700)));
    }
}
