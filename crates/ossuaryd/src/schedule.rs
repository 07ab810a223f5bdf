//! Time-of-day schedule rules.
//!
//! Evaluated once per monitor tick while connected. A rule matches when its
//! `HH:MM` is within one minute of the current time and the matching
//! occurrence falls on one of its days. The first matching rule that has not
//! already fired for that occurrence is recorded in the durable fire ledger
//! and returned; later rules wait for the next tick.

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use ossuary_common::config::{RuleAction, Schedule, ScheduleRule};
use ossuary_common::validate::parse_hhmm;
use ossuary_common::FireLedger;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Allowed distance between the rule time and the clock, in minutes
pub const TOLERANCE_MINUTES: i64 = 1;

/// A rule chosen to fire this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    pub rule_id: String,
    pub action: RuleAction,
    /// Date and time of the occurrence being fired
    pub occurrence: NaiveDateTime,
}

pub struct ScheduleEngine {
    ledger: FireLedger,
    ledger_path: PathBuf,
    timezone_warned: bool,
}

impl ScheduleEngine {
    pub fn load(ledger_path: PathBuf) -> Self {
        let ledger = FireLedger::load_or_empty(&ledger_path);
        debug!("Fire ledger loaded with {} entries", ledger.len());
        Self {
            ledger,
            ledger_path,
            timezone_warned: false,
        }
    }

    pub fn ledger(&self) -> &FireLedger {
        &self.ledger
    }

    /// Pick at most one rule to fire at local time `now`
    pub fn evaluate(&mut self, schedule: &Schedule, now: NaiveDateTime) -> Option<Firing> {
        if !schedule.enabled {
            return None;
        }
        if schedule.timezone != "auto" && !self.timezone_warned {
            warn!(
                "Schedule timezone {:?} is not supported; using the system local time",
                schedule.timezone
            );
            self.timezone_warned = true;
        }

        for rule in &schedule.rules {
            let Some(occurrence) = due_occurrence(rule, now) else {
                continue;
            };
            let key = FireLedger::key(&rule.id, &occurrence.format("%H:%M").to_string());
            if self.ledger.has_fired(&key, occurrence.date()) {
                continue;
            }

            self.ledger.record(key, occurrence.date());
            if let Err(e) = self.ledger.save(&self.ledger_path) {
                warn!("Failed to persist fire ledger: {}", e);
            }
            info!(
                "Schedule rule {} fires for {}",
                rule.name.as_deref().unwrap_or(&rule.id),
                occurrence.format("%a %Y-%m-%d %H:%M")
            );
            return Some(Firing {
                rule_id: rule.id.clone(),
                action: rule.action.clone(),
                occurrence,
            });
        }
        None
    }
}

/// Occurrence of `rule` within tolerance of `now`, if it is on one of its days
fn due_occurrence(rule: &ScheduleRule, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if !rule.enabled || rule.trigger.kind != "time" {
        return None;
    }
    let Some(minutes) = parse_hhmm(&rule.trigger.time) else {
        debug!("Rule {} has unusable time {:?}", rule.id, rule.trigger.time);
        return None;
    };
    let occurrence = nearest_occurrence(minutes, now)?;
    runs_on(&rule.trigger.days, occurrence.weekday()).then_some(occurrence)
}

/// Closest instance of minute-of-day `minutes` to `now`, if within tolerance.
///
/// Yesterday and tomorrow are considered so that 23:59 and 00:00 are one
/// minute apart.
pub fn nearest_occurrence(minutes: u32, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let time = NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)?;
    let now = now.with_second(0)?.with_nanosecond(0)?;
    let today = now.date();

    [-1, 0, 1]
        .into_iter()
        .filter_map(|offset| today.checked_add_signed(ChronoDuration::days(offset)))
        .map(|date: NaiveDate| date.and_time(time))
        .map(|candidate| (candidate, (candidate - now).num_minutes().abs()))
        .filter(|(_, distance)| *distance <= TOLERANCE_MINUTES)
        .min_by_key(|(_, distance)| *distance)
        .map(|(candidate, _)| candidate)
}

fn weekday_abbrev(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

/// Does the day list include `day`? Names match on their first three letters.
pub fn runs_on(days: &[String], day: Weekday) -> bool {
    let wanted = weekday_abbrev(day);
    days.iter().any(|d| {
        let d = d.trim().to_ascii_lowercase();
        d.get(..3) == Some(wanted)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossuary_common::config::{RuleActionKind, Trigger};

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, ss)
            .unwrap()
    }

    fn rule(id: &str, time: &str, days: &[&str], kind: RuleActionKind) -> ScheduleRule {
        ScheduleRule {
            id: id.to_string(),
            name: None,
            enabled: true,
            trigger: Trigger {
                kind: "time".to_string(),
                time: time.to_string(),
                days: days.iter().map(|d| d.to_string()).collect(),
            },
            action: RuleAction { kind, profile: None },
        }
    }

    fn schedule(rules: Vec<ScheduleRule>) -> Schedule {
        Schedule {
            enabled: true,
            rules,
            ..Schedule::default()
        }
    }

    fn engine(dir: &tempfile::TempDir) -> ScheduleEngine {
        ScheduleEngine::load(dir.path().join("schedule-ledger.json"))
    }

    #[test]
    fn test_monday_rule_fires_once_around_eight() {
        // 2024-01-01 is a Monday
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        let sched = schedule(vec![rule("r1", "08:00", &["mon"], RuleActionKind::Refresh)]);

        let mut fired = 0;
        let mut t = at(2024, 1, 1, 7, 59, 0);
        while t <= at(2024, 1, 1, 8, 1, 59) {
            if engine.evaluate(&sched, t).is_some() {
                fired += 1;
            }
            t += ChronoDuration::seconds(5);
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_monday_rule_silent_on_tuesday() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        let sched = schedule(vec![rule("r1", "08:00", &["mon"], RuleActionKind::Refresh)]);

        let mut t = at(2024, 1, 2, 7, 59, 0);
        while t <= at(2024, 1, 2, 8, 1, 59) {
            assert_eq!(engine.evaluate(&sched, t), None);
            t += ChronoDuration::seconds(5);
        }
    }

    #[test]
    fn test_fires_again_next_week() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        let sched = schedule(vec![rule("r1", "08:00", &["Monday"], RuleActionKind::Restart)]);

        assert!(engine.evaluate(&sched, at(2024, 1, 1, 8, 0, 0)).is_some());
        assert!(engine.evaluate(&sched, at(2024, 1, 8, 8, 0, 0)).is_some());
    }

    #[test]
    fn test_ledger_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let sched = schedule(vec![rule("r1", "08:00", &["mon"], RuleActionKind::Refresh)]);

        assert!(engine(&dir).evaluate(&sched, at(2024, 1, 1, 7, 59, 30)).is_some());
        // A new engine, as after a power cut mid-minute
        assert_eq!(engine(&dir).evaluate(&sched, at(2024, 1, 1, 8, 0, 30)), None);
    }

    #[test]
    fn test_one_rule_per_tick_in_document_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        let sched = schedule(vec![
            rule("first", "12:00", &["mon"], RuleActionKind::Refresh),
            rule("second", "12:00", &["mon"], RuleActionKind::Restart),
        ]);
        let now = at(2024, 1, 1, 12, 0, 0);

        assert_eq!(engine.evaluate(&sched, now).unwrap().rule_id, "first");
        assert_eq!(engine.evaluate(&sched, now).unwrap().rule_id, "second");
        assert_eq!(engine.evaluate(&sched, now), None);
    }

    #[test]
    fn test_midnight_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        // Sunday 23:59 rule seen at Monday 00:00
        let sched = schedule(vec![rule("late", "23:59", &["sun"], RuleActionKind::Refresh)]);
        let firing = engine.evaluate(&sched, at(2024, 1, 1, 0, 0, 10)).unwrap();
        assert_eq!(firing.occurrence, at(2023, 12, 31, 23, 59, 0));
    }

    #[test]
    fn test_disabled_and_foreign_rules_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        let mut disabled = rule("d", "08:00", &["mon"], RuleActionKind::Refresh);
        disabled.enabled = false;
        let mut other = rule("o", "08:00", &["mon"], RuleActionKind::Refresh);
        other.trigger.kind = "sunrise".to_string();
        let sched = schedule(vec![disabled, other]);
        assert_eq!(engine.evaluate(&sched, at(2024, 1, 1, 8, 0, 0)), None);

        let mut off = schedule(vec![rule("r", "08:00", &["mon"], RuleActionKind::Refresh)]);
        off.enabled = false;
        assert_eq!(engine.evaluate(&off, at(2024, 1, 1, 8, 0, 0)), None);
    }

    #[test]
    fn test_outside_tolerance() {
        let now = at(2024, 1, 1, 8, 0, 0);
        assert!(nearest_occurrence(8 * 60 + 2, now).is_none());
        assert!(nearest_occurrence(7 * 60 + 58, now).is_none());
        assert_eq!(nearest_occurrence(7 * 60 + 59, now), Some(at(2024, 1, 1, 7, 59, 0)));
    }

    #[test]
    fn test_day_names() {
        let days = vec!["MON".to_string(), " wednesday ".to_string(), "t".to_string()];
        assert!(runs_on(&days, Weekday::Mon));
        assert!(runs_on(&days, Weekday::Wed));
        assert!(!runs_on(&days, Weekday::Tue));
        assert!(!runs_on(&[], Weekday::Mon));
    }
}
