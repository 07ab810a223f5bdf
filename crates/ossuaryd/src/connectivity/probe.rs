//! Reachability probes.
//!
//! Production code uses [`PingProbe`], which shells out to `ping`. Tests
//! use [`SwitchProbe`], whose answer is flipped by hand.

use async_trait::async_trait;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Public addresses tried before the gateway
pub const PUBLIC_TARGETS: &[&str] = &["8.8.8.8", "1.1.1.1"];

/// How long `ip route` gets to answer
pub const ROUTE_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-ping reply timeout, in seconds (ping -W)
pub const PING_TIMEOUT_SECS: u32 = 2;

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// One layered probe; `true` if anything answered
    async fn reachable(&self) -> bool;
}

/// `ping` to public targets, then to the default gateway
pub struct PingProbe {
    targets: Vec<String>,
    timeout_secs: u32,
}

impl PingProbe {
    pub fn new() -> Self {
        Self {
            targets: PUBLIC_TARGETS.iter().map(|t| t.to_string()).collect(),
            timeout_secs: PING_TIMEOUT_SECS,
        }
    }

    pub fn with_targets(targets: Vec<String>, timeout_secs: u32) -> Self {
        Self {
            targets,
            timeout_secs,
        }
    }

    async fn ping(&self, host: &str) -> bool {
        let status = Command::new("ping")
            .args(["-c", "1", "-W", &self.timeout_secs.to_string(), host])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        // -W does not cover name resolution
        let limit = Duration::from_secs(u64::from(self.timeout_secs) + 1);
        match tokio::time::timeout(limit, status).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!("ping {} could not run: {}", host, e);
                false
            }
            Err(_) => false,
        }
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    async fn reachable(&self) -> bool {
        for target in &self.targets {
            if self.ping(target).await {
                return true;
            }
        }
        match default_gateway().await {
            Some(gateway) => {
                let ok = self.ping(&gateway).await;
                debug!("Public targets unreachable; gateway {} reachable: {}", gateway, ok);
                ok
            }
            None => {
                debug!("Public targets unreachable and no default route");
                false
            }
        }
    }
}

/// Gateway of the default route, from `ip route show default`
pub async fn default_gateway() -> Option<String> {
    let mut cmd = Command::new("ip");
    cmd.args(["route", "show", "default"]);
    let output = bounded_output(cmd, ROUTE_TIMEOUT).await?;
    if !output.status.success() {
        return None;
    }
    parse_default_gateway(&String::from_utf8_lossy(&output.stdout))
}

/// Collect `cmd`'s output, killing it if it runs past `limit`
async fn bounded_output(mut cmd: Command, limit: Duration) -> Option<Output> {
    cmd.stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    let program = cmd.as_std().get_program().to_owned();
    match tokio::time::timeout(limit, cmd.output()).await {
        Ok(output) => output.ok(),
        Err(_) => {
            warn!("{:?} gave no answer within {:?}", program, limit);
            None
        }
    }
}

/// Extract the `via` address of the first default route
pub fn parse_default_gateway(text: &str) -> Option<String> {
    text.lines()
        .filter(|l| l.trim_start().starts_with("default"))
        .find_map(|line| {
            let mut words = line.split_whitespace();
            while let Some(word) = words.next() {
                if word == "via" {
                    return words.next().map(str::to_string);
                }
            }
            None
        })
}

/// Probe whose answer is set by hand (testing)
#[derive(Clone)]
pub struct SwitchProbe {
    up: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl SwitchProbe {
    pub fn new(up: bool) -> Self {
        Self {
            up: Arc::new(AtomicBool::new(up)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    /// Number of probes answered so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for SwitchProbe {
    async fn reachable(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.up.load(Ordering::SeqCst)
    }
}
