//! Remote refresh of the supervised browser.
//!
//! A refresh first tries an in-place page reload through the browser's
//! remote-debugging endpoint: `GET /json` for the target list, then a
//! single `Page.reload` command over the page's WebSocket. Any failure along
//! the way falls back to asking the supervisor for a full restart with
//! SIGHUP, so every refresh ends in at least an attempted restart.

use async_trait::async_trait;
use futures_util::SinkExt;
use nix::sys::signal::Signal;
use ossuary_common::status::signal_pid_file;
use ossuary_common::{SignalError, SupervisorStatus};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Budget for each network stage of a refresh
pub const STAGE_TIMEOUT: Duration = Duration::from_secs(5);

const OVERLAY_ID: &str = "ossuary-connection-overlay";

/// Failure at one stage of the remote-debugging exchange
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("no remote-debugging endpoint is known for the supervised app")]
    NoEndpoint,

    #[error("debugging endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("malformed target list: {0}")]
    BadPageList(String),

    #[error("no page target to reload")]
    NoPage,

    #[error("websocket handshake rejected: {0}")]
    Handshake(String),

    #[error("failed to send command: {0}")]
    Send(String),

    #[error("timed out during {0}")]
    Timeout(&'static str),
}

/// Result of a refresh request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Page reloaded in place
    Reloaded,
    /// Supervisor asked to restart the app
    Restarted,
    /// Neither path worked
    Failed,
}

/// One entry of the `/json` target list
#[derive(Debug, Clone, Deserialize)]
pub struct PageTarget {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_url: Option<String>,
}

/// Minimal client for the browser's remote-debugging interface
pub struct DevToolsClient {
    http: reqwest::Client,
    base: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl DevToolsClient {
    pub fn new(port: u16) -> Self {
        Self::with_base(format!("http://127.0.0.1:{}", port), STAGE_TIMEOUT)
    }

    pub fn with_base(base: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base: base.into(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// First target of type "page" that has a WebSocket URL
    pub async fn page_target(&self) -> Result<PageTarget, RefreshError> {
        let url = format!("{}/json", self.base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RefreshError::Unreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RefreshError::Unreachable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        let targets: Vec<PageTarget> = response
            .json()
            .await
            .map_err(|e| RefreshError::BadPageList(e.to_string()))?;

        targets
            .into_iter()
            .find(|t| t.kind == "page" && t.ws_url.is_some())
            .ok_or(RefreshError::NoPage)
    }

    async fn activate(&self, target: &PageTarget) {
        let url = format!("{}/json/activate/{}", self.base, target.id);
        if let Err(e) = self.http.get(&url).send().await {
            debug!("Activating target {} failed: {}", target.id, e);
        }
    }

    /// Send one command to the first page target
    pub async fn send(&self, method: &str, params: Value) -> Result<(), RefreshError> {
        let target = self.page_target().await?;
        self.activate(&target).await;
        let ws_url = target.ws_url.as_deref().ok_or(RefreshError::NoPage)?;

        let (mut ws, _) = tokio::time::timeout(self.timeout, tokio_tungstenite::connect_async(ws_url))
            .await
            .map_err(|_| RefreshError::Timeout("websocket handshake"))?
            .map_err(|e| RefreshError::Handshake(e.to_string()))?;

        let command = json!({
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        debug!("Sending {} to target {}", method, target.id);

        tokio::time::timeout(self.timeout, ws.send(Message::Text(command.to_string().into())))
            .await
            .map_err(|_| RefreshError::Timeout("send"))?
            .map_err(|e| RefreshError::Send(e.to_string()))?;

        if let Err(e) = ws.close(None).await {
            debug!("Closing debugger socket: {}", e);
        }
        Ok(())
    }

    /// Reload the page, bypassing the cache
    pub async fn reload_page(&self) -> Result<(), RefreshError> {
        self.send("Page.reload", json!({ "ignoreCache": true })).await
    }

    /// Evaluate a script in the page
    pub async fn evaluate(&self, expression: &str) -> Result<(), RefreshError> {
        self.send("Runtime.evaluate", json!({ "expression": expression }))
            .await
    }
}

/// Coarse restart path: ask the supervisor to reload
pub trait ReloadSignal: Send + Sync {
    fn request_reload(&self) -> Result<(), SignalError>;
}

/// SIGHUP to the pid in the supervisor's PID file
pub struct SupervisorSignal {
    pid_file: PathBuf,
}

impl SupervisorSignal {
    pub fn new(pid_file: PathBuf) -> Self {
        Self { pid_file }
    }
}

impl ReloadSignal for SupervisorSignal {
    fn request_reload(&self) -> Result<(), SignalError> {
        let pid = signal_pid_file(&self.pid_file, Signal::SIGHUP)?;
        info!("Sent SIGHUP to supervisor (pid {})", pid);
        Ok(())
    }
}

/// Where the debugging port comes from
#[derive(Debug, Clone)]
pub enum PortSource {
    /// Read from the supervisor status record on every call
    Status(PathBuf),
    Fixed(u16),
}

impl PortSource {
    fn port(&self) -> Option<u16> {
        match self {
            PortSource::Fixed(port) => Some(*port),
            PortSource::Status(path) => match SupervisorStatus::load(path) {
                Ok(Some(status)) if status.is_gui => status.debugging_port,
                Ok(_) => None,
                Err(e) => {
                    debug!("Cannot read supervisor status: {}", e);
                    None
                }
            },
        }
    }
}

/// Actions the monitor can take on the supervised app
#[async_trait]
pub trait PageControl: Send + Sync {
    /// In-place reload, falling back to a restart
    async fn refresh(&self) -> RefreshOutcome;

    /// Full restart through the supervisor
    async fn restart(&self) -> RefreshOutcome;

    async fn show_overlay(&self);

    async fn hide_overlay(&self);
}

/// Production page control: remote debugging plus SIGHUP fallback
pub struct RemotePage {
    ports: PortSource,
    reload: Box<dyn ReloadSignal>,
    timeout: Duration,
}

impl RemotePage {
    pub fn new(ports: PortSource, reload: Box<dyn ReloadSignal>) -> Self {
        Self {
            ports,
            reload,
            timeout: STAGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn client(&self) -> Result<DevToolsClient, RefreshError> {
        let port = self.ports.port().ok_or(RefreshError::NoEndpoint)?;
        Ok(DevToolsClient::with_base(
            format!("http://127.0.0.1:{}", port),
            self.timeout,
        ))
    }

    async fn try_reload(&self) -> Result<(), RefreshError> {
        self.client()?.reload_page().await
    }

    async fn evaluate(&self, expression: &str, what: &str) {
        let result = match self.client() {
            Ok(client) => client.evaluate(expression).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => info!("{}", what),
            Err(e) => warn!("{} failed: {}", what, e),
        }
    }
}

#[async_trait]
impl PageControl for RemotePage {
    async fn refresh(&self) -> RefreshOutcome {
        match self.try_reload().await {
            Ok(()) => {
                info!("Page reloaded via remote debugging");
                RefreshOutcome::Reloaded
            }
            Err(e) => {
                warn!("In-place reload failed ({}); falling back to restart", e);
                self.restart().await
            }
        }
    }

    async fn restart(&self) -> RefreshOutcome {
        match self.reload.request_reload() {
            Ok(()) => RefreshOutcome::Restarted,
            Err(e) => {
                warn!("Restart request failed: {}", e);
                RefreshOutcome::Failed
            }
        }
    }

    async fn show_overlay(&self) {
        self.evaluate(&show_overlay_script(), "Connection-lost overlay shown")
            .await;
    }

    async fn hide_overlay(&self) {
        self.evaluate(&hide_overlay_script(), "Connection-lost overlay removed")
            .await;
    }
}

fn show_overlay_script() -> String {
    format!(
        "(function() {{\
           if (document.getElementById('{id}')) return;\
           var o = document.createElement('div');\
           o.id = '{id}';\
           o.style.cssText = 'position:fixed;inset:0;z-index:2147483647;display:flex;\
             align-items:center;justify-content:center;background:rgba(0,0,0,0.85);\
             color:#fff;font:32px sans-serif;';\
           o.textContent = 'Connection lost. Waiting for network...';\
           document.body.appendChild(o);\
         }})()",
        id = OVERLAY_ID
    )
}

fn hide_overlay_script() -> String {
    format!(
        "(function() {{ var o = document.getElementById('{}'); if (o) o.remove(); }})()",
        OVERLAY_ID
    )
}

/// Action recorded by [`RecordingPage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAction {
    Refresh,
    Restart,
    ShowOverlay,
    HideOverlay,
}

/// Page control that only records what it was asked to do (testing)
#[derive(Clone, Default)]
pub struct RecordingPage {
    actions: Arc<Mutex<Vec<(tokio::time::Instant, PageAction)>>>,
}

impl RecordingPage {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, action: PageAction) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push((tokio::time::Instant::now(), action));
        }
    }

    /// Every action so far, with the (possibly paused) clock reading
    pub fn log(&self) -> Vec<(tokio::time::Instant, PageAction)> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<PageAction> {
        self.log().into_iter().map(|(_, a)| a).collect()
    }

    pub fn count(&self, action: PageAction) -> usize {
        self.actions().iter().filter(|a| **a == action).count()
    }
}

#[async_trait]
impl PageControl for RecordingPage {
    async fn refresh(&self) -> RefreshOutcome {
        self.push(PageAction::Refresh);
        RefreshOutcome::Reloaded
    }

    async fn restart(&self) -> RefreshOutcome {
        self.push(PageAction::Restart);
        RefreshOutcome::Restarted
    }

    async fn show_overlay(&self) {
        self.push(PageAction::ShowOverlay);
    }

    async fn hide_overlay(&self) {
        self.push(PageAction::HideOverlay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossuary_common::status::write_pid;

    struct CountingSignal(Arc<AtomicU64>);

    impl ReloadSignal for CountingSignal {
        fn request_reload(&self) -> Result<(), SignalError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_falls_back_to_restart() {
        let restarts = Arc::new(AtomicU64::new(0));
        let page = RemotePage::new(
            PortSource::Fixed(closed_port()),
            Box::new(CountingSignal(restarts.clone())),
        )
        .with_timeout(Duration::from_secs(1));

        assert_eq!(page.refresh().await, RefreshOutcome::Restarted);
        assert_eq!(restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_port_in_status_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let status_file = dir.path().join("process.status.json");
        SupervisorStatus::default().save(&status_file).unwrap();

        let restarts = Arc::new(AtomicU64::new(0));
        let page = RemotePage::new(
            PortSource::Status(status_file),
            Box::new(CountingSignal(restarts.clone())),
        );
        assert_eq!(page.refresh().await, RefreshOutcome::Restarted);
        assert_eq!(restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fallback_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let page = RemotePage::new(
            PortSource::Status(dir.path().join("missing.json")),
            Box::new(SupervisorSignal::new(dir.path().join("process.pid"))),
        );
        assert_eq!(page.refresh().await, RefreshOutcome::Failed);
    }

    #[tokio::test]
    async fn test_overlay_failure_does_not_restart() {
        let restarts = Arc::new(AtomicU64::new(0));
        let page = RemotePage::new(
            PortSource::Fixed(closed_port()),
            Box::new(CountingSignal(restarts.clone())),
        )
        .with_timeout(Duration::from_secs(1));

        page.show_overlay().await;
        page.hide_overlay().await;
        assert_eq!(restarts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_supervisor_signal_reaches_process() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("process.pid");
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        write_pid(&pid_file, child.id()).unwrap();

        let result = SupervisorSignal::new(pid_file).request_reload();
        child.kill().ok();
        child.wait().unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_page_target_parsing() {
        let targets: Vec<PageTarget> = serde_json::from_value(json!([
            { "id": "sw", "type": "service_worker", "webSocketDebuggerUrl": "ws://x/sw" },
            { "id": "A1", "type": "page", "url": "https://example.com",
              "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/A1" }
        ]))
        .unwrap();
        assert_eq!(targets[1].kind, "page");
        assert_eq!(
            targets[1].ws_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/page/A1")
        );
    }

    #[test]
    fn test_overlay_scripts_reference_same_element() {
        assert!(show_overlay_script().contains(OVERLAY_ID));
        assert!(hide_overlay_script().contains(OVERLAY_ID));
    }
}
