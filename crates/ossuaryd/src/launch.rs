//! Turning a configured command string into something safe to exec.
//!
//! The configuration document is writable by the web UI, so the command is
//! never handed to `sh -c`. It is tokenized once here, leading `NAME=value`
//! assignments become explicit environment entries, and what remains is an
//! argument vector.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Port used when the command does not pick its own
pub const DEFAULT_DEBUGGING_PORT: u16 = 9222;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("command is empty")]
    Empty,

    #[error("cannot parse command: {0}")]
    Parse(String),
}

/// A tokenized command ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub env: BTreeMap<String, String>,
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// Shell-quoted rendering for logs; never executed
    pub fn display(&self) -> String {
        let env = self.env.iter().map(|(k, v)| format!("{}={}", k, v));
        let words: Vec<String> = env
            .chain(std::iter::once(self.program.clone()))
            .chain(self.args.iter().cloned())
            .collect();
        shell_words::join(words)
    }

    /// Program name without any directory part
    pub fn program_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }
}

fn env_assignment(token: &str) -> Option<(&str, &str)> {
    let (name, value) = token.split_once('=')?;
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((name, value))
}

/// Tokenize a configured command, extracting a `NAME=value ...` prefix
pub fn parse_command(command: &str) -> Result<LaunchSpec, CommandError> {
    let tokens = shell_words::split(command).map_err(|e| CommandError::Parse(e.to_string()))?;
    let mut tokens = tokens.into_iter().peekable();

    let mut env = BTreeMap::new();
    while let Some(token) = tokens.peek() {
        match env_assignment(token) {
            Some((name, value)) => {
                env.insert(name.to_string(), value.to_string());
                tokens.next();
            }
            None => break,
        }
    }

    let program = tokens.next().ok_or(CommandError::Empty)?;
    Ok(LaunchSpec {
        env,
        program,
        args: tokens.collect(),
    })
}

/// Application family, used for kiosk flags and for process sweeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppFamily {
    Chromium,
    Firefox,
    /// Some other program that needs a display
    OtherGui,
    Console,
}

const CHROMIUM_PROGRAMS: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];
const FIREFOX_PROGRAMS: &[&str] = &["firefox", "firefox-esr"];
const OTHER_GUI_PROGRAMS: &[&str] = &["epiphany", "epiphany-browser", "falkon", "midori", "surf"];

impl AppFamily {
    pub fn of(spec: &LaunchSpec) -> Self {
        let name = spec.program_name().to_ascii_lowercase();
        if CHROMIUM_PROGRAMS.contains(&name.as_str()) {
            AppFamily::Chromium
        } else if FIREFOX_PROGRAMS.contains(&name.as_str()) {
            AppFamily::Firefox
        } else if OTHER_GUI_PROGRAMS.contains(&name.as_str())
            || spec.env.contains_key("DISPLAY")
            || spec.env.contains_key("WAYLAND_DISPLAY")
        {
            AppFamily::OtherGui
        } else {
            AppFamily::Console
        }
    }

    pub fn is_gui(self) -> bool {
        self != AppFamily::Console
    }

    /// Process names (as the kernel reports them, 15 chars max) of this family
    pub fn process_names(self) -> &'static [&'static str] {
        match self {
            AppFamily::Chromium => &[
                "chromium",
                "chromium-browse",
                "chrome",
                "google-chrome",
                "chrome_crashpad",
            ],
            AppFamily::Firefox => &["firefox", "firefox-esr", "firefox-bin"],
            AppFamily::OtherGui | AppFamily::Console => &[],
        }
    }
}

/// Normalized switch name: no leading dashes, no value, lowercase
fn switch_name(arg: &str) -> Option<String> {
    let stripped = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'))?;
    let name = stripped.split('=').next().unwrap_or(stripped);
    if name.is_empty() {
        return None;
    }
    Some(name.to_ascii_lowercase())
}

/// Does `args` already carry the switch `name`, in any spelling?
pub fn has_switch(args: &[String], name: &str) -> bool {
    args.iter()
        .filter_map(|a| switch_name(a))
        .any(|n| n == name)
}

/// Value of a switch given as `--name=value` or `--name value`
pub fn switch_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if switch_name(arg).as_deref() != Some(name) {
            continue;
        }
        if let Some((_, value)) = arg.split_once('=') {
            return Some(value);
        }
        return iter
            .next()
            .map(String::as_str)
            .filter(|v| !v.starts_with('-'));
    }
    None
}

/// Remote-debugging port the command will expose, if it is a Chromium
pub fn debugging_port(spec: &LaunchSpec) -> Option<u16> {
    if AppFamily::of(spec) != AppFamily::Chromium {
        return None;
    }
    match switch_value(&spec.args, "remote-debugging-port") {
        Some(value) => value.parse().ok(),
        None => Some(DEFAULT_DEBUGGING_PORT),
    }
}

/// Profile directory the command will use, if it names one
pub fn user_data_dir(spec: &LaunchSpec) -> Option<PathBuf> {
    switch_value(&spec.args, "user-data-dir").map(PathBuf::from)
}

/// Inputs for kiosk flag augmentation
#[derive(Debug, Clone)]
pub struct KioskOptions {
    pub profile_dir: PathBuf,
    pub debugging_port: u16,
    pub wayland: bool,
}

/// Append the kiosk switch set to a Chromium command.
///
/// Each switch is added only when no spelling of it is already present, so
/// applying this twice is a no-op and user choices (a different port, a
/// different password store) are kept.
pub fn apply_kiosk_flags(spec: &mut LaunchSpec, options: &KioskOptions) {
    if AppFamily::of(spec) != AppFamily::Chromium {
        return;
    }

    let mut flags: Vec<(&str, Option<String>)> = vec![
        ("password-store", Some("basic".to_string())),
        ("disable-session-crashed-bubble", None),
        ("noerrdialogs", None),
        ("no-first-run", None),
        ("no-default-browser-check", None),
        ("disable-notifications", None),
        ("autoplay-policy", Some("no-user-gesture-required".to_string())),
        (
            "user-data-dir",
            Some(options.profile_dir.display().to_string()),
        ),
        (
            "remote-debugging-port",
            Some(options.debugging_port.to_string()),
        ),
    ];
    if options.wayland {
        flags.push(("ozone-platform", Some("wayland".to_string())));
    }

    for (name, value) in flags {
        if has_switch(&spec.args, name) {
            continue;
        }
        spec.args.push(match value {
            Some(value) => format!("--{}={}", name, value),
            None => format!("--{}", name),
        });
    }
}

/// Command used for the first-run placeholder page
pub fn placeholder_command(url: &str) -> String {
    format!("chromium --kiosk {}", shell_words::quote(url))
}
