//! The connectivity and schedule engine.
//!
//! One tick every five seconds: probe reachability, act on a lost or
//! regained transition, and while connected run the periodic refresh and
//! the schedule rules. The configuration document is re-read on every tick.

use crate::connectivity::{ConnectivityMachine, ReachabilityProbe, RefreshTimer, Transition};
use crate::refresh::{PageControl, RefreshOutcome};
use crate::schedule::{Firing, ScheduleEngine};
use crate::signals::{ControlSignal, Controls};
use anyhow::Context;
use chrono::NaiveDateTime;
use ossuary_common::config::{LostAction, RegainedAction, RuleActionKind};
use ossuary_common::status::{remove_pid, write_pid};
use ossuary_common::{Connectivity, KioskConfig, RuntimePaths};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Poll period of the engine
pub const TICK: Duration = Duration::from_secs(5);

/// Source of local wall-clock time for schedule rules
pub type LocalClock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub struct Monitor {
    paths: RuntimePaths,
    probe: Box<dyn ReachabilityProbe>,
    page: Arc<dyn PageControl>,
    connectivity: ConnectivityMachine,
    schedule: ScheduleEngine,
    refresh_timer: RefreshTimer,
    overlay_shown: bool,
    clock: LocalClock,
}

impl Monitor {
    pub fn new(
        paths: RuntimePaths,
        probe: Box<dyn ReachabilityProbe>,
        page: Arc<dyn PageControl>,
    ) -> Self {
        let connectivity = ConnectivityMachine::load(paths.connection_state());
        let schedule = ScheduleEngine::load(paths.fire_ledger());
        Self {
            paths,
            probe,
            page,
            connectivity,
            schedule,
            refresh_timer: RefreshTimer::new(Instant::now()),
            overlay_shown: false,
            clock: Box::new(|| chrono::Local::now().naive_local()),
        }
    }

    /// Replace the wall clock used for schedule rules
    pub fn with_clock(mut self, clock: LocalClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity.current()
    }

    pub fn schedule(&self) -> &ScheduleEngine {
        &self.schedule
    }

    /// One engine pass
    pub async fn tick(&mut self) {
        let config = KioskConfig::load_or_default(&self.paths.config_file);

        let reachable = self.probe.reachable().await;
        match self.connectivity.observe(reachable) {
            Some(Transition::Lost) => self.on_lost(&config).await,
            Some(Transition::Regained) => self.on_regained(&config).await,
            None => {}
        }

        if self.connectivity.current() != Connectivity::Connected {
            return;
        }

        let interval = config.behaviors.scheduled_refresh.interval();
        if self.refresh_timer.due(interval, Instant::now()) {
            info!("Scheduled refresh interval elapsed");
            self.refresh().await;
        }

        let now = (self.clock)();
        if let Some(firing) = self.schedule.evaluate(&config.schedule, now) {
            self.execute(firing, &config).await;
        }
    }

    async fn refresh(&mut self) -> RefreshOutcome {
        let outcome = self.page.refresh().await;
        info!("Refresh outcome: {:?}", outcome);
        self.refresh_timer.reset(Instant::now());
        if outcome != RefreshOutcome::Failed {
            self.overlay_shown = false;
        }
        outcome
    }

    async fn restart(&mut self) -> RefreshOutcome {
        let outcome = self.page.restart().await;
        info!("Restart outcome: {:?}", outcome);
        self.refresh_timer.reset(Instant::now());
        if outcome != RefreshOutcome::Failed {
            self.overlay_shown = false;
        }
        outcome
    }

    async fn on_lost(&mut self, config: &KioskConfig) {
        match config.behaviors.on_connection_lost.action {
            Some(LostAction::ShowOverlay) => {
                self.page.show_overlay().await;
                self.overlay_shown = true;
            }
            Some(LostAction::Pause) => info!("Connection lost; actions paused until it returns"),
            Some(LostAction::Refresh) => {
                self.refresh().await;
            }
            Some(LostAction::Unsupported) => warn!("Unsupported on_connection_lost action"),
            None => debug!("No on_connection_lost action configured"),
        }
    }

    async fn on_regained(&mut self, config: &KioskConfig) {
        let behavior = &config.behaviors.on_connection_regained;
        match behavior.action {
            Some(RegainedAction::RefreshPage) | Some(RegainedAction::Refresh) => {
                self.settle(behavior.delay()).await;
                self.refresh().await;
            }
            Some(RegainedAction::Restart) => {
                self.settle(behavior.delay()).await;
                self.restart().await;
            }
            Some(RegainedAction::Continue) | Some(RegainedAction::Unsupported) | None => {
                if behavior.action == Some(RegainedAction::Unsupported) {
                    warn!("Unsupported on_connection_regained action");
                }
                if self.overlay_shown {
                    self.page.hide_overlay().await;
                    self.overlay_shown = false;
                }
            }
        }
    }

    async fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            debug!("Waiting {:?} for the connection to settle", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn execute(&mut self, firing: Firing, config: &KioskConfig) {
        match firing.action.kind {
            RuleActionKind::Refresh => {
                self.refresh().await;
            }
            RuleActionKind::Restart => {
                self.restart().await;
            }
            RuleActionKind::SwitchProfile => match firing.action.profile.as_deref() {
                Some(profile) if config.profiles.contains_key(profile) => info!(
                    "Rule {} asks for profile {:?}; profile switching is not applied",
                    firing.rule_id, profile
                ),
                Some(profile) => warn!(
                    "Rule {} names unknown profile {:?}",
                    firing.rule_id, profile
                ),
                None => warn!("Rule {} switch_profile without a profile", firing.rule_id),
            },
            RuleActionKind::Unsupported => {
                warn!("Rule {} has an unsupported action", firing.rule_id)
            }
        }
    }

    /// Tick until a terminate signal arrives
    pub async fn run(mut self, mut controls: Controls, period: Duration) -> anyhow::Result<()> {
        let pid_file = self.paths.monitor_pid();
        write_pid(&pid_file, std::process::id()).context("failed to write monitor pid file")?;
        info!(
            "Monitor started (pid {}, tick {:?})",
            std::process::id(),
            period
        );

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'ticks: loop {
            tokio::select! {
                _ = ticker.tick() => {}
                sig = controls.recv() => match sig {
                    ControlSignal::Terminate => break 'ticks,
                    ControlSignal::Reload => {
                        info!("Reload requested; configuration is re-read on every tick");
                        continue 'ticks;
                    }
                },
            }

            let pass = self.tick();
            tokio::pin!(pass);
            loop {
                tokio::select! {
                    _ = &mut pass => break,
                    sig = controls.recv() => {
                        if sig == ControlSignal::Terminate {
                            break 'ticks;
                        }
                    }
                }
            }
        }

        info!("Monitor shutting down");
        remove_pid(&pid_file);
        Ok(())
    }
}
