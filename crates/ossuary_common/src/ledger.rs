//! Schedule fire ledger.
//!
//! Maps `"<rule id>@<HH:MM>"` to the date of the occurrence that last fired.
//! Lives in the durable state directory: a power cut in the middle of a
//! matching minute must not make the rule fire twice after reboot.

use crate::atomic::write_json;
use crate::error::StatusError;
use crate::status::load_json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

const RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireLedger {
    #[serde(default)]
    entries: BTreeMap<String, NaiveDate>,
}

impl FireLedger {
    /// Ledger key for a rule firing at a given time of day
    pub fn key(rule_id: &str, hhmm: &str) -> String {
        format!("{}@{}", rule_id, hhmm)
    }

    pub fn has_fired(&self, key: &str, occurrence: NaiveDate) -> bool {
        self.entries.get(key) == Some(&occurrence)
    }

    pub fn record(&mut self, key: String, occurrence: NaiveDate) {
        self.entries.insert(key, occurrence);
        self.prune(occurrence);
    }

    /// Drop entries older than the retention window
    pub fn prune(&mut self, today: NaiveDate) {
        self.entries
            .retain(|_, date| (today - *date).num_days() <= RETENTION_DAYS);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load the ledger; a missing or unreadable file starts empty
    pub fn load_or_empty(path: &Path) -> Self {
        match load_json(path) {
            Ok(Some(ledger)) => ledger,
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("Failed to read fire ledger: {}. Starting empty.", e);
                Self::default()
            }
        }
    }

    /// Durable write (fsync before rename)
    pub fn save(&self, path: &Path) -> Result<(), StatusError> {
        write_json(path, self, true)
    }
}
