//! The process supervisor loop.
//!
//! Keeps exactly one configured command running. Each pass re-reads the
//! configuration document, prepares the display and browser profile for GUI
//! apps, launches the command in its own session, and then waits for one of:
//! the child exiting, a control signal, or the configured command changing.

use crate::crash::{CrashPolicy, CrashWindow, RestartDecision};
use crate::display::{DisplayResolver, MAIN_DISPLAY_WAIT, PLACEHOLDER_DISPLAY_WAIT};
use crate::launch::{
    apply_kiosk_flags, debugging_port, parse_command, placeholder_command, user_data_dir,
    AppFamily, CommandError, KioskOptions, LaunchSpec, DEFAULT_DEBUGGING_PORT,
};
use crate::process_tree::{terminate_family, AppProcess, STOP_GRACE};
use crate::profile::{clear_crash_state, default_profile_dir};
use crate::signals::{ControlSignal, Controls};
use anyhow::Context;
use chrono::Utc;
use ossuary_common::status::{remove_pid, write_pid};
use ossuary_common::{DisplayServer, KioskConfig, RuntimePaths, SupervisorState, SupervisorStatus};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Poll interval while nothing is configured
pub const IDLE_POLL: Duration = Duration::from_secs(10);

/// How often the document is re-read while the app runs
pub const CONFIG_POLL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Builds the resolver consulted before each GUI launch
pub type DisplaySource = Arc<dyn Fn() -> DisplayResolver + Send + Sync>;

/// Tunables for one supervisor instance
#[derive(Clone)]
pub struct SupervisorOptions {
    pub paths: RuntimePaths,
    /// Command from the command line, used while the document has none
    pub initial_command: Option<String>,
    /// First-run page shown when no command is configured at all
    pub placeholder_url: Option<String>,
    pub profile_dir: PathBuf,
    pub crash_policy: CrashPolicy,
    pub stop_grace: Duration,
    pub idle_poll: Duration,
    pub config_poll: Duration,
    pub display: DisplaySource,
}

impl SupervisorOptions {
    pub fn new(paths: RuntimePaths) -> Self {
        Self {
            paths,
            initial_command: None,
            placeholder_url: None,
            profile_dir: default_profile_dir(),
            crash_policy: CrashPolicy::default(),
            stop_grace: STOP_GRACE,
            idle_poll: IDLE_POLL,
            config_poll: CONFIG_POLL,
            display: Arc::new(DisplayResolver::from_env),
        }
    }
}

/// What should be supervised right now
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Configured(String),
    Placeholder(String),
}

impl Target {
    fn command(&self) -> &str {
        match self {
            Target::Configured(c) | Target::Placeholder(c) => c,
        }
    }

    fn display_wait(&self) -> Duration {
        match self {
            Target::Configured(_) => MAIN_DISPLAY_WAIT,
            Target::Placeholder(_) => PLACEHOLDER_DISPLAY_WAIT,
        }
    }
}

/// Why the watch on a running app ended
#[derive(Debug)]
enum WatchEnd {
    Exited(Option<ExitStatus>),
    Reload,
    CommandChanged,
    Terminate,
}

/// A launch whose display and profile are ready
struct Prepared {
    spec: LaunchSpec,
    session_env: BTreeMap<String, String>,
    is_gui: bool,
    display_server: Option<DisplayServer>,
    debugging_port: Option<u16>,
}

/// How a wait between launches ended
enum Pause {
    Elapsed,
    Reload,
    Terminate,
}

pub struct Supervisor {
    options: SupervisorOptions,
    crashes: CrashWindow,
    status: SupervisorStatus,
    current: Option<Target>,
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        let crashes = CrashWindow::new(options.crash_policy.clone());
        Self {
            options,
            crashes,
            status: SupervisorStatus::default(),
            current: None,
        }
    }

    fn resolve_target(&self) -> Option<Target> {
        let config = KioskConfig::load_or_default(&self.options.paths.config_file);
        if let Some(command) = config.command() {
            return Some(Target::Configured(command.to_string()));
        }
        if let Some(command) = self
            .options
            .initial_command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            return Some(Target::Configured(command.to_string()));
        }
        self.options
            .placeholder_url
            .as_deref()
            .map(|url| Target::Placeholder(placeholder_command(url)))
    }

    fn publish(&mut self, state: SupervisorState) {
        if self.status.state != state {
            info!("Supervisor state: {} -> {}", self.status.state, state);
        }
        self.status.state = state;
        self.status.crash_count = self.crashes.count() as u32;
        self.status.window_start = self.crashes.window_start().map(|start| {
            let age = chrono::Duration::from_std(start.elapsed())
                .unwrap_or_else(|_| chrono::Duration::zero());
            Utc::now() - age
        });
        self.status.updated_at = Utc::now();
        if let Err(e) = self.status.save(&self.options.paths.supervisor_status()) {
            warn!("Failed to write supervisor status: {}", e);
        }
    }

    /// Supervise until a terminate signal arrives
    pub async fn run(mut self, mut controls: Controls) -> anyhow::Result<()> {
        let paths = self.options.paths.clone();
        write_pid(&paths.supervisor_pid(), std::process::id())
            .context("failed to write supervisor pid file")?;
        info!("Supervisor started (pid {})", std::process::id());

        loop {
            let target = self.resolve_target();
            if target != self.current {
                if self.current.is_some() {
                    info!("Configured command changed; resetting crash window");
                }
                self.crashes.reset();
                self.current = target.clone();
            }

            let Some(target) = target else {
                self.status.command = None;
                self.publish(SupervisorState::Idle);
                debug!("No command configured; polling again in {:?}", self.options.idle_poll);
                match controls.sleep(self.options.idle_poll).await {
                    Some(ControlSignal::Terminate) => break,
                    _ => continue,
                }
            };

            self.status.command = Some(target.command().to_string());
            self.publish(SupervisorState::Starting);

            // Display wait and family teardown can take a minute
            let prepared = tokio::select! {
                prepared = self.prepare(&target) => Ok(prepared),
                sig = controls.recv() => Err(sig),
            };
            let prepared = match prepared {
                Ok(prepared) => prepared,
                Err(ControlSignal::Terminate) => {
                    info!("Terminate requested while starting; launch abandoned");
                    break;
                }
                Err(ControlSignal::Reload) => {
                    info!("Reload requested while starting; starting over");
                    continue;
                }
            };

            let mut app = match prepared.and_then(|prepared| self.launch(prepared)) {
                Ok(app) => app,
                Err(e) => {
                    error!("Launch failed: {}", e);
                    self.status.last_exit = Some(e.to_string());
                    let decision = self.crashes.record_crash(tokio::time::Instant::now());
                    self.publish(SupervisorState::Crashed);
                    match self.pause(&mut controls, decision).await {
                        Pause::Terminate => break,
                        Pause::Elapsed | Pause::Reload => continue,
                    }
                }
            };
            self.publish(SupervisorState::Running);

            match self.watch(&mut app, &mut controls).await {
                WatchEnd::Exited(status) => {
                    app.release(self.options.stop_grace).await;
                    remove_pid(&paths.child_pid());
                    self.clear_child();
                    let (decision, state) = match status {
                        Some(status) if status.success() => {
                            info!("Supervised process exited cleanly");
                            self.status.last_exit = Some(status.to_string());
                            (self.crashes.record_clean_exit(), SupervisorState::Idle)
                        }
                        other => {
                            let reason = other
                                .map(|s| s.to_string())
                                .unwrap_or_else(|| "wait failed".to_string());
                            warn!("Supervised process crashed ({})", reason);
                            self.status.last_exit = Some(reason);
                            let now = tokio::time::Instant::now();
                            (self.crashes.record_crash(now), SupervisorState::Crashed)
                        }
                    };
                    self.publish(state);
                    match self.pause(&mut controls, decision).await {
                        Pause::Terminate => break,
                        Pause::Elapsed | Pause::Reload => continue,
                    }
                }
                WatchEnd::Reload => {
                    info!("Reload requested; restarting supervised process");
                    self.stop(app).await;
                }
                WatchEnd::CommandChanged => {
                    self.stop(app).await;
                }
                WatchEnd::Terminate => {
                    self.stop(app).await;
                    break;
                }
            }
        }

        info!("Supervisor shutting down");
        self.publish(SupervisorState::Idle);
        remove_pid(&paths.child_pid());
        remove_pid(&paths.supervisor_pid());
        Ok(())
    }

    async fn prepare(&self, target: &Target) -> Result<Prepared, LaunchError> {
        let mut spec = parse_command(target.command())?;
        let family = AppFamily::of(&spec);
        let mut session_env = BTreeMap::new();
        let mut display_server = None;
        let mut debugging_port_flag = None;

        if family.is_gui() {
            let mut display = (self.options.display)();
            display.wait_for_display(target.display_wait()).await;
            session_env = display.environment();
            display_server = Some(display.server());

            terminate_family(family, self.options.stop_grace).await;
            if family == AppFamily::Chromium {
                self.prepare_chromium(&mut spec, display.server());
                debugging_port_flag = debugging_port(&spec);
            }
        }

        Ok(Prepared {
            spec,
            session_env,
            is_gui: family.is_gui(),
            display_server,
            debugging_port: debugging_port_flag,
        })
    }

    fn launch(&mut self, prepared: Prepared) -> Result<AppProcess, LaunchError> {
        let Prepared {
            spec,
            session_env,
            is_gui,
            display_server,
            debugging_port,
        } = prepared;
        self.status.is_gui = is_gui;
        self.status.display_server = display_server;
        self.status.debugging_port = debugging_port;

        info!("Launching: {}", spec.display());
        let app = AppProcess::spawn(&spec, &session_env).map_err(|source| LaunchError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        if let Err(e) = write_pid(&self.options.paths.child_pid(), app.pid()) {
            warn!("Failed to write child pid file: {}", e);
        }
        self.status.pid = Some(app.pid());
        self.status.pgid = Some(app.pgid());
        self.status.last_exit = None;
        Ok(app)
    }

    fn prepare_chromium(&self, spec: &mut LaunchSpec, server: DisplayServer) {
        let profile_dir = user_data_dir(spec).unwrap_or_else(|| self.options.profile_dir.clone());
        clear_crash_state(&profile_dir);

        let options = KioskOptions {
            profile_dir,
            debugging_port: debugging_port(spec).unwrap_or(DEFAULT_DEBUGGING_PORT),
            wayland: server == DisplayServer::Wayland,
        };
        apply_kiosk_flags(spec, &options);
    }

    async fn watch(&self, app: &mut AppProcess, controls: &mut Controls) -> WatchEnd {
        let mut config_poll = tokio::time::interval(self.options.config_poll);
        config_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        config_poll.tick().await;

        loop {
            tokio::select! {
                status = app.wait() => {
                    return WatchEnd::Exited(status.ok());
                }
                sig = controls.recv() => {
                    return match sig {
                        ControlSignal::Reload => WatchEnd::Reload,
                        ControlSignal::Terminate => WatchEnd::Terminate,
                    };
                }
                _ = config_poll.tick() => {
                    if self.resolve_target() != self.current {
                        info!("Configured command changed; tearing down current process");
                        return WatchEnd::CommandChanged;
                    }
                }
            }
        }
    }

    async fn stop(&mut self, app: AppProcess) {
        self.publish(SupervisorState::Stopping);
        let status = app.stop(self.options.stop_grace).await;
        remove_pid(&self.options.paths.child_pid());
        self.clear_child();
        self.status.last_exit = status.map(|s| s.to_string());
        self.publish(SupervisorState::Idle);
    }

    fn clear_child(&mut self) {
        self.status.pid = None;
        self.status.pgid = None;
    }

    async fn pause(&mut self, controls: &mut Controls, decision: RestartDecision) -> Pause {
        let delay = decision.delay();
        match decision {
            RestartDecision::Backoff(_) => warn!(
                "More than {} crashes within {}s; backing off for {}s",
                self.crashes.policy().threshold,
                self.crashes.policy().window.as_secs(),
                delay.as_secs()
            ),
            RestartDecision::Restart(_) => debug!("Restarting in {:?}", delay),
        }
        let backing_off = matches!(decision, RestartDecision::Backoff(_));
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match controls.sleep(remaining).await {
                None => return Pause::Elapsed,
                Some(ControlSignal::Terminate) => return Pause::Terminate,
                // A reload must not cut the crash backoff short
                Some(ControlSignal::Reload) if backing_off => info!(
                    "Reload requested during crash backoff; restarting in {}s",
                    deadline
                        .saturating_duration_since(tokio::time::Instant::now())
                        .as_secs()
                ),
                Some(ControlSignal::Reload) => return Pause::Reload,
            }
        }
    }
}
