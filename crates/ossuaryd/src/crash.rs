//! Crash-loop protection for the supervised process.
//!
//! Crashes are counted in a rolling window. Up to the threshold the process
//! is restarted after a short delay; one crash past it imposes a long
//! backoff and starts a fresh window.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Rolling window crashes are counted in
pub const CRASH_WINDOW: Duration = Duration::from_secs(300);

/// Crashes tolerated inside one window
pub const CRASH_THRESHOLD: usize = 5;

/// Delay before an ordinary restart
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Delay imposed once the threshold is exceeded
pub const BACKOFF_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CrashPolicy {
    pub window: Duration,
    pub threshold: usize,
    pub restart_delay: Duration,
    pub backoff_delay: Duration,
}

impl Default for CrashPolicy {
    fn default() -> Self {
        Self {
            window: CRASH_WINDOW,
            threshold: CRASH_THRESHOLD,
            restart_delay: RESTART_DELAY,
            backoff_delay: BACKOFF_DELAY,
        }
    }
}

/// What to do after the supervised process exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart(Duration),
    Backoff(Duration),
}

impl RestartDecision {
    pub fn delay(self) -> Duration {
        match self {
            RestartDecision::Restart(d) | RestartDecision::Backoff(d) => d,
        }
    }
}

/// Crash history within the current window
#[derive(Debug, Clone)]
pub struct CrashWindow {
    policy: CrashPolicy,
    crashes: VecDeque<Instant>,
}

impl CrashWindow {
    pub fn new(policy: CrashPolicy) -> Self {
        Self {
            policy,
            crashes: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> &CrashPolicy {
        &self.policy
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.crashes.front() {
            if now.saturating_duration_since(oldest) > self.policy.window {
                self.crashes.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record an abnormal exit at `now`
    pub fn record_crash(&mut self, now: Instant) -> RestartDecision {
        self.expire(now);
        self.crashes.push_back(now);

        if self.crashes.len() > self.policy.threshold {
            self.crashes.clear();
            RestartDecision::Backoff(self.policy.backoff_delay)
        } else {
            RestartDecision::Restart(self.policy.restart_delay)
        }
    }

    /// Record a zero exit status; clears the window
    pub fn record_clean_exit(&mut self) -> RestartDecision {
        self.reset();
        RestartDecision::Restart(self.policy.restart_delay)
    }

    pub fn reset(&mut self) {
        self.crashes.clear();
    }

    /// Crashes currently inside the window
    pub fn count(&self) -> usize {
        self.crashes.len()
    }

    /// Oldest crash still inside the window
    pub fn window_start(&self) -> Option<Instant> {
        self.crashes.front().copied()
    }
}

impl Default for CrashWindow {
    fn default() -> Self {
        Self::new(CrashPolicy::default())
    }
}
