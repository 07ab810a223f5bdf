//! Browser profile housekeeping before a launch.
//!
//! After an unclean exit Chromium offers to "restore pages" on next start,
//! which covers the kiosk page with a bubble. Marking the profile as having
//! exited cleanly suppresses that.

use ossuary_common::atomic::write_atomic;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default private profile directory for the supervised browser
pub fn default_profile_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ossuary")
        .join("browser-profile")
}

fn mark_clean(doc: &mut Value) -> bool {
    let Some(root) = doc.as_object_mut() else {
        return false;
    };
    let mut changed = false;

    if let Some(profile) = root.get_mut("profile").and_then(Value::as_object_mut) {
        if profile.get("exit_type") != Some(&Value::from("Normal")) {
            profile.insert("exit_type".to_string(), Value::from("Normal"));
            changed = true;
        }
        if profile.get("exited_cleanly") != Some(&Value::Bool(true)) {
            profile.insert("exited_cleanly".to_string(), Value::Bool(true));
            changed = true;
        }
    }
    if root.get("exited_cleanly").is_some_and(|v| v != &Value::Bool(true)) {
        root.insert("exited_cleanly".to_string(), Value::Bool(true));
        changed = true;
    }
    changed
}

fn clean_file(path: &Path) {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return,
    };
    let mut doc: Value = match serde_json::from_str(&text) {
        Ok(doc) => doc,
        Err(e) => {
            debug!("Skipping unparsable {}: {}", path.display(), e);
            return;
        }
    };
    if !mark_clean(&mut doc) {
        return;
    }
    match serde_json::to_vec(&doc) {
        Ok(bytes) => {
            if let Err(e) = write_atomic(path, &bytes) {
                warn!("Failed to clear crash state in {}: {}", path.display(), e);
            } else {
                debug!("Cleared crash-restore state in {}", path.display());
            }
        }
        Err(e) => warn!("Failed to encode {}: {}", path.display(), e),
    }
}

/// Mark the profile as cleanly exited; missing or corrupt files are skipped
pub fn clear_crash_state(profile_dir: &Path) {
    clean_file(&profile_dir.join("Default").join("Preferences"));
    clean_file(&profile_dir.join("Local State"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_crashed_preferences_are_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = dir.path().join("Default/Preferences");
        fs::create_dir_all(prefs.parent().unwrap()).unwrap();
        fs::write(
            &prefs,
            json!({
                "profile": { "exit_type": "Crashed", "exited_cleanly": false, "name": "kiosk" },
                "homepage": "https://example.com"
            })
            .to_string(),
        )
        .unwrap();
        fs::write(
            dir.path().join("Local State"),
            json!({ "exited_cleanly": false }).to_string(),
        )
        .unwrap();

        clear_crash_state(dir.path());

        let prefs: Value = serde_json::from_str(&fs::read_to_string(&prefs).unwrap()).unwrap();
        assert_eq!(prefs["profile"]["exit_type"], "Normal");
        assert_eq!(prefs["profile"]["exited_cleanly"], true);
        assert_eq!(prefs["profile"]["name"], "kiosk");
        assert_eq!(prefs["homepage"], "https://example.com");

        let local: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("Local State")).unwrap())
                .unwrap();
        assert_eq!(local["exited_cleanly"], true);
    }

    #[test]
    fn test_missing_and_corrupt_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        clear_crash_state(dir.path());

        fs::write(dir.path().join("Local State"), "{ corrupt").unwrap();
        clear_crash_state(dir.path());
        assert_eq!(
            fs::read_to_string(dir.path().join("Local State")).unwrap(),
            "{ corrupt"
        );
    }
}
