//! Structural validation of a raw configuration document.
//!
//! The daemons never reject a document (they fall back to defaults), so
//! this is only used by `ossuaryctl check-config` to tell an operator what
//! the daemons will ignore.

use serde_json::Value;

const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
const RULE_ACTIONS: [&str; 3] = ["refresh", "restart", "switch_profile"];

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Parse "HH:MM" into minutes past midnight
pub fn parse_hhmm(text: &str) -> Option<u32> {
    let (h, m) = text.trim().split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    (h < 24 && m < 60).then_some(h * 60 + m)
}

/// Validate a document; returns one message per problem, empty when valid
pub fn validate_document(doc: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    let Some(root) = doc.as_object() else {
        errors.push(format!("document should be a dict, got {}", type_name(doc)));
        return errors;
    };

    let expected: [(&str, fn(&Value) -> bool, &str); 7] = [
        ("startup_command", Value::is_string, "str"),
        ("saved_networks", Value::is_array, "list"),
        ("behaviors", Value::is_object, "dict"),
        ("schedule", Value::is_object, "dict"),
        ("profiles", Value::is_object, "dict"),
        ("active_profile", Value::is_string, "str"),
        ("version", Value::is_i64, "int"),
    ];
    for (key, check, name) in expected {
        if let Some(value) = root.get(key) {
            if !check(value) {
                errors.push(format!(
                    "'{}' should be {}, got {}",
                    key,
                    name,
                    type_name(value)
                ));
            }
        }
    }

    if let Some(Value::Array(networks)) = root.get("saved_networks") {
        for (i, network) in networks.iter().enumerate() {
            match network.as_object() {
                None => errors.push(format!("saved_networks[{}] should be a dict", i)),
                Some(obj) if !obj.contains_key("ssid") => {
                    errors.push(format!("saved_networks[{}] missing required 'ssid' field", i))
                }
                Some(_) => {}
            }
        }
    }

    if let Some(Value::Object(schedule)) = root.get("schedule") {
        if let Some(enabled) = schedule.get("enabled") {
            if !enabled.is_boolean() {
                errors.push("schedule.enabled should be boolean".to_string());
            }
        }
        match schedule.get("rules") {
            Some(Value::Array(rules)) => {
                for (i, rule) in rules.iter().enumerate() {
                    validate_rule(i, rule, &mut errors);
                }
            }
            Some(_) => errors.push("schedule.rules should be a list".to_string()),
            None => {}
        }
    }

    errors
}

fn validate_rule(index: usize, rule: &Value, errors: &mut Vec<String>) {
    let Some(rule) = rule.as_object() else {
        errors.push(format!("schedule.rules[{}] should be a dict", index));
        return;
    };
    let label = rule
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("schedule.rules[{}]", index));

    if let Some(trigger) = rule.get("trigger").and_then(Value::as_object) {
        let kind = trigger.get("type").and_then(Value::as_str).unwrap_or("time");
        if kind == "time" {
            match trigger.get("time").and_then(Value::as_str) {
                Some(t) if parse_hhmm(t).is_some() => {}
                Some(t) => errors.push(format!("{}: trigger.time '{}' is not HH:MM", label, t)),
                None => errors.push(format!("{}: trigger.time is missing", label)),
            }
            if let Some(days) = trigger.get("days").and_then(Value::as_array) {
                for day in days {
                    let known = day
                        .as_str()
                        .map(|d| d.to_ascii_lowercase())
                        .is_some_and(|d| WEEKDAYS.iter().any(|w| d.starts_with(w)));
                    if !known {
                        errors.push(format!("{}: unknown day {}", label, day));
                    }
                }
            }
        }
    }

    if let Some(kind) = rule
        .get("action")
        .and_then(|a| a.get("type"))
        .and_then(Value::as_str)
    {
        if !RULE_ACTIONS.contains(&kind) {
            errors.push(format!("{}: action '{}' is not supported", label, kind));
        }
    }
}
