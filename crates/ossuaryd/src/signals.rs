//! Control signals.
//!
//! OS signals are forwarded into a channel so the daemons' loops can be
//! woken from any wait with `tokio::select!`, and so tests can drive them
//! without signalling the test runner.

use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// What the outside world asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// SIGHUP: re-read configuration and restart the supervised process
    Reload,
    /// SIGTERM / SIGINT: orderly teardown and exit
    Terminate,
}

/// Receiving side of the control channel
pub struct Controls {
    rx: mpsc::Receiver<ControlSignal>,
    tx: mpsc::Sender<ControlSignal>,
}

impl Controls {
    /// Channel with no OS signal handlers attached (tests, embedding)
    pub fn channel() -> Self {
        let (tx, rx) = mpsc::channel(16);
        Self { rx, tx }
    }

    /// Channel fed by SIGHUP, SIGTERM and SIGINT
    pub fn install() -> std::io::Result<Self> {
        let controls = Self::channel();
        let mut hangup = signal(SignalKind::hangup())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let tx = controls.sender();

        tokio::spawn(async move {
            loop {
                let sig = tokio::select! {
                    _ = hangup.recv() => ControlSignal::Reload,
                    _ = terminate.recv() => ControlSignal::Terminate,
                    _ = interrupt.recv() => ControlSignal::Terminate,
                };
                info!("Received {:?} signal", sig);
                if tx.send(sig).await.is_err() {
                    break;
                }
            }
        });

        Ok(controls)
    }

    /// Sender for injecting signals (self-reload, tests)
    pub fn sender(&self) -> mpsc::Sender<ControlSignal> {
        self.tx.clone()
    }

    /// Wait for the next control signal.
    ///
    /// Never resolves if every external sender is gone, because `self`
    /// keeps one sender alive.
    pub async fn recv(&mut self) -> ControlSignal {
        match self.rx.recv().await {
            Some(sig) => sig,
            None => std::future::pending().await,
        }
    }

    /// Sleep for `duration`, returning early with a signal if one arrives
    pub async fn sleep(&mut self, duration: Duration) -> Option<ControlSignal> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => None,
            sig = self.recv() => {
                debug!("Sleep interrupted by {:?}", sig);
                Some(sig)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_runs_to_completion() {
        let mut controls = Controls::channel();
        assert_eq!(controls.sleep(Duration::from_secs(10)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_signal() {
        let mut controls = Controls::channel();
        let tx = controls.sender();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(ControlSignal::Terminate).await.unwrap();
        });

        let started = tokio::time::Instant::now();
        let sig = controls.sleep(Duration::from_secs(3600)).await;
        assert_eq!(sig, Some(ControlSignal::Terminate));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
