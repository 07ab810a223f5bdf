//! Spawning and tearing down the supervised process tree.
//!
//! The app is started as the leader of a new session, so its process group
//! id equals its pid and every helper it forks stays in that group unless it
//! deliberately leaves. Teardown signals the whole group, then sweeps any
//! stray processes of the same application family that escaped it.

use crate::launch::{AppFamily, LaunchSpec};
use crate::proctable;
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Time between SIGTERM and SIGKILL
pub const STOP_GRACE: Duration = Duration::from_secs(5);

const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A running supervised app and its process group
#[derive(Debug)]
pub struct AppProcess {
    child: Child,
    pid: u32,
    family: AppFamily,
}

impl AppProcess {
    /// Spawn `spec` in a new session.
    ///
    /// `session_env` carries the display variables; the command's own
    /// `NAME=value` prefix is applied on top of it.
    pub fn spawn(
        spec: &LaunchSpec,
        session_env: &BTreeMap<String, String>,
    ) -> std::io::Result<Self> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(session_env)
            .envs(&spec.env)
            .stdin(Stdio::null());

        // SAFETY: setsid is async-signal-safe and touches no parent state
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });
        }

        let child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "child has no pid"))?;

        debug!("Spawned {} as pid {}", spec.program_name(), pid);
        Ok(Self {
            child,
            pid,
            family: AppFamily::of(spec),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Process group id; the child is its own session and group leader
    pub fn pgid(&self) -> i32 {
        self.pid as i32
    }

    /// Wait for the app itself to exit
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Terminate the whole process group.
    ///
    /// SIGTERM first; whatever is left after `grace` gets SIGKILL. Stray
    /// processes of the same family are swept afterwards.
    pub async fn stop(mut self, grace: Duration) -> Option<ExitStatus> {
        let pgid = self.pgid();
        info!("Stopping process group {}", pgid);
        signal_group(pgid, Signal::SIGTERM);

        let graceful = tokio::time::timeout(grace, async {
            let status = self.child.wait().await.ok();
            while group_alive(pgid) {
                tokio::time::sleep(GROUP_POLL_INTERVAL).await;
            }
            status
        })
        .await;

        let status = match graceful {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    "Process group {} still alive after {}s, sending SIGKILL",
                    pgid,
                    grace.as_secs_f32()
                );
                signal_group(pgid, Signal::SIGKILL);
                self.child.wait().await.ok()
            }
        };

        sweep_strays(self.family, &[]);
        status
    }

    /// Clear out what the app left behind after it exited on its own.
    ///
    /// Helpers it forked are still in the group; they get SIGTERM, then
    /// SIGKILL after `grace`.
    pub async fn release(self, grace: Duration) {
        let pgid = self.pgid();
        if group_alive(pgid) {
            info!("App exited; stopping what remains of process group {}", pgid);
            signal_group(pgid, Signal::SIGTERM);
            let drained = tokio::time::timeout(grace, async {
                while group_alive(pgid) {
                    tokio::time::sleep(GROUP_POLL_INTERVAL).await;
                }
            })
            .await;
            if drained.is_err() {
                warn!("Leftovers of process group {} ignored SIGTERM, sending SIGKILL", pgid);
                signal_group(pgid, Signal::SIGKILL);
            }
        }
        sweep_strays(self.family, &[]);
    }
}

/// Signal every process in group `pgid`; a vanished group is not an error
pub fn signal_group(pgid: i32, signal: Signal) {
    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) => {}
        Err(Errno::ESRCH) => debug!("Process group {} already gone", pgid),
        Err(e) => warn!("killpg({}, {}) failed: {}", pgid, signal, e),
    }
}

/// Does any process remain in group `pgid`?
pub fn group_alive(pgid: i32) -> bool {
    !matches!(killpg(Pid::from_raw(pgid), None), Err(Errno::ESRCH))
}

fn signal_pid(pid: i32, signal: Signal) -> bool {
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!("kill({}, {}) failed: {}", pid, signal, e);
            false
        }
    }
}

/// SIGKILL any process of `family` that outlived its group
pub fn sweep_strays(family: AppFamily, exclude: &[i32]) -> usize {
    let mut exclude = exclude.to_vec();
    exclude.push(std::process::id() as i32);

    let strays = proctable::matching(family.process_names(), &exclude);
    let mut killed = 0;
    for stray in strays {
        if signal_pid(stray.pid, Signal::SIGKILL) {
            debug!("Killed stray {} (pid {})", stray.name, stray.pid);
            killed += 1;
        }
    }
    if killed > 0 {
        info!("Swept {} stray process(es)", killed);
    }
    killed
}

/// Stop instances of `family` that were already running before a launch.
///
/// A second Chromium started against a profile that is in use just hands
/// its URL to the first one and exits.
pub async fn terminate_family(family: AppFamily, grace: Duration) -> usize {
    let me = std::process::id() as i32;
    let existing = proctable::matching(family.process_names(), &[me]);
    if existing.is_empty() {
        return 0;
    }

    info!(
        "Terminating {} pre-existing instance(s) of the app",
        existing.len()
    );
    let pids: Vec<i32> = existing
        .iter()
        .filter(|p| signal_pid(p.pid, Signal::SIGTERM))
        .map(|p| p.pid)
        .collect();

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline
        && pids.iter().any(|&pid| ossuary_common::status::is_alive(pid))
    {
        tokio::time::sleep(GROUP_POLL_INTERVAL).await;
    }
    for &pid in &pids {
        if ossuary_common::status::is_alive(pid) {
            signal_pid(pid, Signal::SIGKILL);
        }
    }
    existing.len()
}
