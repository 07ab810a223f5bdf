//! Display environment resolution.
//!
//! Works out whether the graphical session is Wayland or X11 and whether it
//! accepts clients yet. Pure probe: nothing is persisted, and the caller
//! launches anyway when the display never becomes ready.
//!
//! Detection order (first match wins):
//! 1. XDG_SESSION_TYPE hint
//! 2. a wayland-N socket in the user's runtime directory
//! 3. WAYLAND_DISPLAY in the environment
//! 4. a known compositor process
//! 5. an X server process, or an X socket that accepts connections

use ossuary_common::DisplayServer;
use std::collections::BTreeMap;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often readiness is re-checked
pub const DISPLAY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Wait budget before launching the supervised app
pub const MAIN_DISPLAY_WAIT: Duration = Duration::from_secs(60);

/// Wait budget before launching the first-run placeholder page
pub const PLACEHOLDER_DISPLAY_WAIT: Duration = Duration::from_secs(30);

const COMPOSITORS: &[&str] = &[
    "labwc",
    "wayfire",
    "sway",
    "weston",
    "Hyprland",
    "kwin_wayland",
    "cage",
    "mutter",
];
const X_SERVERS: &[&str] = &["Xorg", "X"];
const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";

type ProcessLister = Box<dyn Fn() -> Vec<String> + Send + Sync>;

/// Probe for the session the supervised app will draw into
pub struct DisplayResolver {
    session_type: Option<String>,
    wayland_display: Option<String>,
    x_display: String,
    runtime_dir: PathBuf,
    x11_socket_dir: PathBuf,
    home: Option<PathBuf>,
    processes: ProcessLister,
    server: DisplayServer,
}

impl DisplayResolver {
    /// Resolver for the current user and environment
    pub fn from_env() -> Self {
        let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                PathBuf::from(format!("/run/user/{}", nix::unistd::getuid().as_raw()))
            });
        Self {
            session_type: std::env::var("XDG_SESSION_TYPE").ok(),
            wayland_display: std::env::var("WAYLAND_DISPLAY").ok(),
            x_display: std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string()),
            runtime_dir,
            x11_socket_dir: PathBuf::from(X11_SOCKET_DIR),
            home: dirs::home_dir(),
            processes: Box::new(crate::proctable::running_names),
            server: DisplayServer::Unknown,
        }
    }

    /// Resolver with every input supplied explicitly (tests)
    pub fn with_inputs(
        session_type: Option<&str>,
        wayland_display: Option<&str>,
        runtime_dir: &Path,
        x11_socket_dir: &Path,
        processes: impl Fn() -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            session_type: session_type.map(str::to_string),
            wayland_display: wayland_display.map(str::to_string),
            x_display: ":0".to_string(),
            runtime_dir: runtime_dir.to_path_buf(),
            x11_socket_dir: x11_socket_dir.to_path_buf(),
            home: None,
            processes: Box::new(processes),
            server: DisplayServer::Unknown,
        }
    }

    /// Last detection result
    pub fn server(&self) -> DisplayServer {
        self.server
    }

    fn wayland_socket(&self) -> Option<String> {
        if let Some(name) = &self.wayland_display {
            if self.runtime_dir.join(name).exists() {
                return Some(name.clone());
            }
        }
        let mut sockets: Vec<String> = std::fs::read_dir(&self.runtime_dir)
            .ok()?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.starts_with("wayland-") && !n.ends_with(".lock"))
            .collect();
        sockets.sort();
        sockets.into_iter().next()
    }

    fn x_socket(&self) -> PathBuf {
        let number = self
            .x_display
            .rsplit(':')
            .next()
            .and_then(|d| d.split('.').next())
            .filter(|d| !d.is_empty())
            .unwrap_or("0");
        self.x11_socket_dir.join(format!("X{}", number))
    }

    fn x_responsive(&self) -> bool {
        UnixStream::connect(self.x_socket()).is_ok()
    }

    /// Classify the session and remember the answer
    pub fn detect(&mut self) -> DisplayServer {
        let server = self.classify();
        if server != self.server {
            debug!("Display server detected: {}", server);
        }
        self.server = server;
        server
    }

    fn classify(&self) -> DisplayServer {
        match self.session_type.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("wayland") => return DisplayServer::Wayland,
            Some("x11") => return DisplayServer::X11,
            _ => {}
        }
        if self.wayland_socket().is_some() {
            return DisplayServer::Wayland;
        }
        if self.wayland_display.is_some() {
            return DisplayServer::Wayland;
        }

        let running = (self.processes)();
        if running.iter().any(|p| COMPOSITORS.contains(&p.as_str())) {
            return DisplayServer::Wayland;
        }
        if running.iter().any(|p| X_SERVERS.contains(&p.as_str())) || self.x_responsive() {
            return DisplayServer::X11;
        }
        DisplayServer::Unknown
    }

    /// Is the detected session accepting clients?
    pub fn is_ready(&self) -> bool {
        match self.server {
            DisplayServer::Wayland => self.wayland_socket().is_some(),
            DisplayServer::X11 => self.x_responsive(),
            DisplayServer::Unknown => false,
        }
    }

    /// Poll until the display is ready or `max_wait` runs out.
    ///
    /// Detection is re-run halfway through in case the session was
    /// classified before the compositor came up.
    pub async fn wait_for_display(&mut self, max_wait: Duration) -> bool {
        let started = tokio::time::Instant::now();
        let mut redetected = false;
        self.detect();

        loop {
            if self.is_ready() {
                info!("Display ready ({})", self.server);
                return true;
            }

            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                warn!(
                    "Display not ready after {}s ({}); launching anyway",
                    max_wait.as_secs(),
                    self.server
                );
                return false;
            }
            if !redetected && elapsed >= max_wait / 2 {
                redetected = true;
                let before = self.server;
                if self.detect() != before {
                    info!("Display server re-detected as {} (was {})", self.server, before);
                }
            }

            let remaining = max_wait - elapsed;
            tokio::time::sleep(DISPLAY_POLL_INTERVAL.min(remaining)).await;
            if self.server == DisplayServer::Unknown {
                self.detect();
            }
        }
    }

    /// Variables the child needs to reach the session
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "XDG_RUNTIME_DIR".to_string(),
            self.runtime_dir.display().to_string(),
        );
        match self.server {
            DisplayServer::Wayland => {
                let socket = self
                    .wayland_socket()
                    .or_else(|| self.wayland_display.clone())
                    .unwrap_or_else(|| "wayland-0".to_string());
                env.insert("WAYLAND_DISPLAY".to_string(), socket);
            }
            DisplayServer::X11 | DisplayServer::Unknown => {
                env.insert("DISPLAY".to_string(), self.x_display.clone());
                if let Some(home) = &self.home {
                    let xauthority = home.join(".Xauthority");
                    if xauthority.exists() {
                        env.insert(
                            "XAUTHORITY".to_string(),
                            xauthority.display().to_string(),
                        );
                    }
                }
            }
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    fn resolver(
        session: Option<&str>,
        wayland_env: Option<&str>,
        dirs: &TempDir,
        processes: Vec<&'static str>,
    ) -> DisplayResolver {
        let runtime = dirs.path().join("runtime");
        let x11 = dirs.path().join("x11");
        std::fs::create_dir_all(&runtime).unwrap();
        std::fs::create_dir_all(&x11).unwrap();
        DisplayResolver::with_inputs(session, wayland_env, &runtime, &x11, move || {
            processes.iter().map(|p| p.to_string()).collect()
        })
    }

    #[test]
    fn test_session_hint_wins() {
        let dirs = TempDir::new().unwrap();
        std::fs::write(dirs.path().join("runtime/wayland-0"), "").ok();
        let mut r = resolver(Some("x11"), None, &dirs, vec!["labwc"]);
        assert_eq!(r.detect(), DisplayServer::X11);
    }

    #[test]
    fn test_wayland_socket_detected() {
        let dirs = TempDir::new().unwrap();
        let mut r = resolver(None, None, &dirs, vec![]);
        std::fs::write(dirs.path().join("runtime/wayland-1"), "").unwrap();
        std::fs::write(dirs.path().join("runtime/wayland-1.lock"), "").unwrap();
        assert_eq!(r.detect(), DisplayServer::Wayland);
        assert!(r.is_ready());
        assert_eq!(
            r.environment().get("WAYLAND_DISPLAY").map(String::as_str),
            Some("wayland-1")
        );
    }

    #[test]
    fn test_wayland_env_without_socket() {
        let dirs = TempDir::new().unwrap();
        let mut r = resolver(None, Some("wayland-0"), &dirs, vec![]);
        assert_eq!(r.detect(), DisplayServer::Wayland);
        assert!(!r.is_ready());
    }

    #[test]
    fn test_compositor_process_detected() {
        let dirs = TempDir::new().unwrap();
        let mut r = resolver(None, None, &dirs, vec!["systemd", "wayfire"]);
        assert_eq!(r.detect(), DisplayServer::Wayland);
    }

    #[test]
    fn test_x_server_detected() {
        let dirs = TempDir::new().unwrap();
        let mut r = resolver(None, None, &dirs, vec!["Xorg"]);
        assert_eq!(r.detect(), DisplayServer::X11);
        assert!(!r.is_ready());
        assert_eq!(r.environment().get("DISPLAY").map(String::as_str), Some(":0"));

        let _listener = UnixListener::bind(dirs.path().join("x11/X0")).unwrap();
        assert!(r.is_ready());
    }

    #[test]
    fn test_nothing_running() {
        let dirs = TempDir::new().unwrap();
        let mut r = resolver(None, None, &dirs, vec!["bash"]);
        assert_eq!(r.detect(), DisplayServer::Unknown);
        assert!(!r.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let dirs = TempDir::new().unwrap();
        let mut r = resolver(None, None, &dirs, vec![]);
        let started = tokio::time::Instant::now();
        assert!(!r.wait_for_display(Duration::from_secs(30)).await);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_picks_up_late_compositor() {
        let dirs = TempDir::new().unwrap();
        let runtime = dirs.path().join("runtime");
        let mut r = resolver(None, None, &dirs, vec![]);

        let socket = runtime.join("wayland-0");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            std::fs::write(socket, "").unwrap();
        });

        assert!(r.wait_for_display(MAIN_DISPLAY_WAIT).await);
        assert_eq!(r.server(), DisplayServer::Wayland);
    }
}
