//! Atomic file replacement.
//!
//! Every file the core shares with another process is replaced with
//! write-temp-then-rename so a concurrent reader sees either the old or the
//! new document, never a torn one.

use crate::error::StatusError;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp.{}", std::process::id()));
    path.with_file_name(name)
}

fn write_replace(path: &Path, contents: &[u8], durable: bool) -> Result<(), StatusError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StatusError::io(parent, e))?;
    }

    let temp = temp_path(path);
    replace_via(&temp, path, contents, durable).map_err(|e| {
        let _ = fs::remove_file(&temp);
        StatusError::io(path, e)
    })
}

fn replace_via(temp: &Path, path: &Path, contents: &[u8], durable: bool) -> std::io::Result<()> {
    let mut file = File::create(temp)?;
    file.write_all(contents)?;
    if durable {
        file.sync_all()?;
    }
    fs::rename(temp, path)?;
    if durable {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            // Persist the rename itself
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}

/// Replace `path` atomically (volatile state: no fsync)
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StatusError> {
    write_replace(path, contents, false)
}

/// Serialize `value` as pretty JSON and replace `path` atomically
pub fn write_json<T: serde::Serialize>(
    path: &Path,
    value: &T,
    durable: bool,
) -> Result<(), StatusError> {
    let json = serde_json::to_vec_pretty(value)?;
    write_replace(path, &json, durable)
}
