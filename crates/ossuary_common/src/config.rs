//! Configuration document model.
//!
//! The document lives at /etc/ossuary/config.json and is owned by the
//! external config server. The core only reads it. Missing keys take the
//! same defaults the config server would write, unknown keys are ignored.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Top-level configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskConfig {
    /// Command to supervise; empty means "nothing configured"
    #[serde(default)]
    pub startup_command: String,

    #[serde(default)]
    pub behaviors: Behaviors,

    #[serde(default)]
    pub schedule: Schedule,

    /// Named launch profiles (only consulted by `switch_profile` rules)
    #[serde(default)]
    pub profiles: BTreeMap<String, serde_json::Value>,

    #[serde(default = "default_active_profile")]
    pub active_profile: String,
}

fn default_active_profile() -> String {
    "custom".to_string()
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            startup_command: String::new(),
            behaviors: Behaviors::default(),
            schedule: Schedule::default(),
            profiles: BTreeMap::new(),
            active_profile: default_active_profile(),
        }
    }
}

impl KioskConfig {
    /// Parse a document from its JSON text
    pub fn from_json(text: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read and parse the document at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, path)
    }

    /// Load the document, falling back to defaults on any error.
    ///
    /// A missing file is normal before first-time setup and is only logged
    /// at debug level.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                debug!("No configuration at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("{}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// The configured command, trimmed; `None` when empty
    pub fn command(&self) -> Option<&str> {
        let trimmed = self.startup_command.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// Reactions to connectivity changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Behaviors {
    #[serde(default = "default_on_lost")]
    pub on_connection_lost: LostBehavior,

    #[serde(default = "default_on_regained")]
    pub on_connection_regained: RegainedBehavior,

    #[serde(default)]
    pub scheduled_refresh: ScheduledRefresh,
}

impl Default for Behaviors {
    fn default() -> Self {
        Self {
            on_connection_lost: default_on_lost(),
            on_connection_regained: default_on_regained(),
            scheduled_refresh: ScheduledRefresh::default(),
        }
    }
}

fn default_on_lost() -> LostBehavior {
    LostBehavior {
        action: Some(LostAction::ShowOverlay),
        timeout_seconds: default_lost_timeout(),
    }
}

fn default_on_regained() -> RegainedBehavior {
    RegainedBehavior {
        action: Some(RegainedAction::RefreshPage),
        delay_seconds: default_regained_delay(),
    }
}

fn default_lost_timeout() -> u64 {
    60
}

fn default_regained_delay() -> u64 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LostAction {
    ShowOverlay,
    Pause,
    Refresh,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LostBehavior {
    #[serde(default)]
    pub action: Option<LostAction>,

    /// Carried for the web UI; the core does not act on it
    #[serde(default = "default_lost_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegainedAction {
    RefreshPage,
    Refresh,
    Restart,
    Continue,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegainedBehavior {
    #[serde(default)]
    pub action: Option<RegainedAction>,

    /// Settling delay before acting on a regained connection
    #[serde(default = "default_regained_delay")]
    pub delay_seconds: u64,
}

impl RegainedBehavior {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

/// Periodic refresh while connected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledRefresh {
    #[serde(default)]
    pub enabled: bool,

    /// Kept raw: the web UI has been known to store strings here
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: serde_json::Value,
}

fn default_interval_minutes() -> serde_json::Value {
    serde_json::Value::from(60)
}

impl Default for ScheduledRefresh {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: default_interval_minutes(),
        }
    }
}

impl ScheduledRefresh {
    /// Effective interval; `None` when disabled, zero, or not a positive integer
    pub fn interval(&self) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        let minutes = match &self.interval_minutes {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => {
                let s = s.trim();
                if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                    s.parse::<u64>().ok()
                } else {
                    None
                }
            }
            _ => None,
        }?;
        (minutes > 0).then(|| Duration::from_secs(minutes.saturating_mul(60)))
    }
}

/// Time-of-day rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub enabled: bool,

    /// "auto" or an IANA zone name
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default)]
    pub rules: Vec<ScheduleRule>,
}

fn default_timezone() -> String {
    "auto".to_string()
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            enabled: false,
            timezone: default_timezone(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRule {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub trigger: Trigger,

    #[serde(default)]
    pub action: RuleAction,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type", default = "default_trigger_type")]
    pub kind: String,

    /// "HH:MM", 24-hour clock
    #[serde(default)]
    pub time: String,

    /// Weekday abbreviations ("mon", "tue", ...)
    #[serde(default)]
    pub days: Vec<String>,
}

fn default_trigger_type() -> String {
    "time".to_string()
}

impl Default for Trigger {
    fn default() -> Self {
        Self {
            kind: default_trigger_type(),
            time: String::new(),
            days: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleActionKind {
    Refresh,
    Restart,
    SwitchProfile,
    #[default]
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type", default)]
    pub kind: RuleActionKind,

    #[serde(default)]
    pub profile: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> KioskConfig {
        KioskConfig::from_json(&value.to_string(), Path::new("test.json")).unwrap()
    }

    #[test]
    fn test_empty_document_takes_server_defaults() {
        let config = parse(json!({}));
        assert_eq!(config.command(), None);
        assert_eq!(
            config.behaviors.on_connection_lost.action,
            Some(LostAction::ShowOverlay)
        );
        assert_eq!(
            config.behaviors.on_connection_regained.action,
            Some(RegainedAction::RefreshPage)
        );
        assert_eq!(config.behaviors.on_connection_regained.delay_seconds, 3);
        assert!(config.behaviors.scheduled_refresh.interval().is_none());
        assert!(!config.schedule.enabled);
        assert_eq!(config.active_profile, "custom");
    }

    #[test]
    fn test_explicitly_absent_action() {
        let config = parse(json!({
            "behaviors": { "on_connection_lost": { "timeout_seconds": 10 } }
        }));
        assert_eq!(config.behaviors.on_connection_lost.action, None);
    }

    #[test]
    fn test_unknown_action_is_tolerated() {
        let config = parse(json!({
            "behaviors": { "on_connection_regained": { "action": "dance" } }
        }));
        assert_eq!(
            config.behaviors.on_connection_regained.action,
            Some(RegainedAction::Unsupported)
        );
    }

    #[test]
    fn test_command_is_trimmed() {
        let config = parse(json!({ "startup_command": "  chromium --kiosk  " }));
        assert_eq!(config.command(), Some("chromium --kiosk"));
        let blank = parse(json!({ "startup_command": "   " }));
        assert_eq!(blank.command(), None);
    }

    #[test]
    fn test_interval_only_positive_integers() {
        let cases = [
            (json!(15), Some(15 * 60)),
            (json!("30"), Some(30 * 60)),
            (json!(0), None),
            (json!(-5), None),
            (json!(2.5), None),
            (json!("abc"), None),
            (json!(null), None),
        ];
        for (value, expected) in cases {
            let refresh = ScheduledRefresh {
                enabled: true,
                interval_minutes: value.clone(),
            };
            assert_eq!(
                refresh.interval().map(|d| d.as_secs()),
                expected,
                "interval_minutes = {value}"
            );
        }
    }

    #[test]
    fn test_disabled_interval_is_suppressed() {
        let refresh = ScheduledRefresh {
            enabled: false,
            interval_minutes: json!(5),
        };
        assert!(refresh.interval().is_none());
    }

    #[test]
    fn test_schedule_rule_parsing() {
        let config = parse(json!({
            "schedule": {
                "enabled": true,
                "rules": [{
                    "id": "rule-1",
                    "trigger": { "type": "time", "time": "08:00", "days": ["mon"] },
                    "action": { "type": "switch_profile", "profile": "lumencanvas" }
                }, {
                    "id": "rule-2",
                    "enabled": false,
                    "action": { "type": "run_command" }
                }]
            }
        }));
        let rules = &config.schedule.rules;
        assert_eq!(rules.len(), 2);
        assert!(rules[0].enabled);
        assert_eq!(rules[0].trigger.time, "08:00");
        assert_eq!(rules[0].action.kind, RuleActionKind::SwitchProfile);
        assert_eq!(rules[0].action.profile.as_deref(), Some("lumencanvas"));
        assert_eq!(rules[1].action.kind, RuleActionKind::Unsupported);
        assert_eq!(rules[1].trigger.kind, "time");
    }

    #[test]
    fn test_load_or_default_on_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(KioskConfig::load(&path).is_err());
        assert_eq!(KioskConfig::load_or_default(&path).command(), None);
    }
}
