//! Raw CDP transport: launch-or-connect, command routing, event pump.
//!
//! The transport speaks the wire protocol only; it knows nothing about
//! pages, selectors or evaluation semantics. Everything above it goes
//! through [`CdpTransport::send_command`] with a method name and a JSON
//! params object.

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionErrorKind};
use crate::util::extract_ws_url;

/// A protocol event forwarded out of the connection loop.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Whether a command addresses the browser endpoint or an attached target.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), SessionError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, SessionError>;

    /// Tear down the connection and any launched browser process.
    async fn shutdown(&self);
}

/// Transport stub for environments without a browser. Every command fails.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, SessionError> {
        Err(SessionError::new(SessionErrorKind::Closed)
            .with_hint(format!("no transport available for method {method}")))
    }

    async fn shutdown(&self) {}
}

type ConnFactory = Arc<
    dyn Fn(SessionConfig) -> BoxFuture<'static, Result<Arc<ConnState>, SessionError>> + Send + Sync,
>;

/// Transport over a live Chromium instance.
///
/// The underlying connection is created lazily on first use and recreated
/// if the connection loop has died since.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: SessionConfig,
    state: Arc<OnceCell<Mutex<Option<Arc<ConnState>>>>>,
    factory: ConnFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: SessionConfig) -> Self {
        let factory: ConnFactory = Arc::new(|cfg: SessionConfig| {
            Box::pin(async move { Ok(Arc::new(ConnState::open(cfg).await?)) })
        });
        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
        }
    }

    #[cfg(test)]
    fn with_factory(cfg: SessionConfig, factory: ConnFactory) -> Self {
        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
        }
    }

    async fn conn(&self) -> Result<Arc<ConnState>, SessionError> {
        let cell = self.state.get_or_init(|| async { Mutex::new(None) }).await;
        let mut guard = cell.lock().await;

        if let Some(conn) = guard.as_ref() {
            if conn.is_alive() {
                return Ok(conn.clone());
            }
            warn!(target: "cdp-transport", "connection loop dead, reopening");
        }

        let conn = (self.factory)(self.cfg.clone()).await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), SessionError> {
        let conn = self.conn().await?;
        let deadline = Duration::from_millis(self.cfg.default_deadline_ms);

        conn.submit(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            serde_json::json!({ "discover": true }),
            deadline,
        )
        .await?;
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.conn().await {
            Ok(conn) => conn.next_event().await,
            Err(err) => {
                warn!(target: "cdp-transport", ?err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, SessionError> {
        let conn = self.conn().await?;
        conn.submit(
            target,
            method,
            params,
            Duration::from_millis(self.cfg.default_deadline_ms),
        )
        .await
    }

    async fn shutdown(&self) {
        if let Some(cell) = self.state.get() {
            if cell.lock().await.take().is_some() {
                debug!(target: "cdp-transport", "connection shut down");
            }
        }
    }
}

struct PendingCommand {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, SessionError>>,
}

/// One live websocket connection plus the task demultiplexing it.
struct ConnState {
    command_tx: mpsc::Sender<PendingCommand>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl ConnState {
    async fn open(cfg: SessionConfig) -> Result<Self, SessionError> {
        let (child, ws_url) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url)
        } else {
            let browser_cfg = browser_config(&cfg)?;
            launch_browser(browser_cfg).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| SessionError::new(SessionErrorKind::Io).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();
        let loop_task = tokio::spawn(async move {
            let result = run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-transport", ?err, "connection loop terminated with error");
            }
        });

        info!(target: "cdp-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            child: Mutex::new(child),
            alive,
        })
    }

    #[cfg(test)]
    fn test_stub() -> (Arc<Self>, Arc<AtomicBool>) {
        let (command_tx, _command_rx) = mpsc::channel(8);
        let (_events_tx, events_rx) = mpsc::channel(8);
        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();
        let loop_task = tokio::spawn(async move {
            futures::future::pending::<()>().await;
            loop_alive.store(false, Ordering::Relaxed);
        });

        (
            Arc::new(Self {
                command_tx,
                events_rx: Mutex::new(events_rx),
                loop_task,
                child: Mutex::new(None),
                alive: alive.clone(),
            }),
            alive,
        )
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn submit(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, SessionError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let pending = PendingCommand {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(pending)
            .await
            .map_err(|err| SessionError::new(SessionErrorKind::Io).with_hint(err.to_string()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(SessionError::new(SessionErrorKind::Io)
                .with_hint("command response channel closed")),
            Err(_) => Err(SessionError::new(SessionErrorKind::Timeout)
                .with_hint(format!("no response within {deadline:?}"))),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }
}

impl Drop for ConnState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-transport", "no runtime available to kill chromium child");
                }
            }
        }
    }
}

fn browser_config(cfg: &SessionConfig) -> Result<BrowserConfig, SessionError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(SessionError::new(SessionErrorKind::Launch).with_hint(format!(
            "chrome executable not found at {} (set PAGEPILOT_CHROME)",
            cfg.executable.display()
        )));
    }

    let profile_dir = if cfg.user_data_dir.is_absolute() {
        cfg.user_data_dir.clone()
    } else {
        let cwd = std::env::current_dir().map_err(|err| {
            SessionError::new(SessionErrorKind::Launch)
                .with_hint(format!("failed to resolve cwd for user-data-dir: {err}"))
        })?;
        cwd.join(&cfg.user_data_dir)
    };
    fs::create_dir_all(&profile_dir).map_err(|err| {
        SessionError::new(SessionErrorKind::Launch)
            .with_hint(format!("failed to ensure user-data-dir: {err}"))
    })?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(Duration::from_secs(20));

    if !cfg.headless {
        builder = builder.with_head();
    }

    let port_flag = format!("--remote-debugging-port={}", cfg.port);
    let mut args = vec![
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-breakpad",
        "--disable-component-update",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-hang-monitor",
        "--disable-popup-blocking",
        "--disable-prompt-on-repost",
        "--disable-sync",
        "--no-first-run",
        "--no-default-browser-check",
        "--remote-allow-origins=*",
        port_flag.as_str(),
    ];
    if cfg.headless {
        args.push("--headless=new");
        args.push("--hide-scrollbars");
        args.push("--mute-audio");
    }
    builder = builder.args(args);

    if !cfg.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(cfg.executable.clone());
    }
    builder = builder.user_data_dir(profile_dir);

    builder.build().map_err(|err| {
        SessionError::new(SessionErrorKind::Launch).with_hint(format!("browser config error: {err}"))
    })
}

async fn launch_browser(config: BrowserConfig) -> Result<(Option<Child>, String), SessionError> {
    let mut child = config.launch().map_err(|err| {
        SessionError::new(SessionErrorKind::Launch)
            .with_hint(format!("failed to launch chromium: {err}"))
    })?;

    let ws_url = extract_ws_url(&mut child)
        .await
        .map_err(|err| SessionError::new(SessionErrorKind::Launch).with_hint(err.to_string()))?;

    Ok((Some(child), ws_url))
}

async fn run_loop(
    mut conn: Connection<CdpEventMessage>,
    mut command_rx: mpsc::Receiver<PendingCommand>,
    event_tx: mpsc::Sender<TransportEvent>,
) -> Result<(), SessionError> {
    let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, SessionError>>> =
        HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = command_rx.recv() => {
                submit_to_wire(&mut conn, cmd, &mut inflight)?;
            }
            message = conn.next() => {
                match message {
                    Some(Ok(Message::Response(resp))) => {
                        if let Some(sender) = inflight.remove(&resp.id) {
                            let _ = sender.send(extract_payload(resp));
                        }
                    }
                    Some(Ok(Message::Event(event))) => {
                        forward_event(event, &event_tx);
                    }
                    Some(Err(err)) => {
                        let mapped = map_cdp_error(err);
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(mapped.clone()));
                        }
                        return Err(mapped);
                    }
                    None => {
                        let err = SessionError::new(SessionErrorKind::Closed)
                            .with_hint("cdp connection closed");
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(err.clone()));
                        }
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn submit_to_wire(
    conn: &mut Connection<CdpEventMessage>,
    cmd: PendingCommand,
    inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, SessionError>>>,
) -> Result<(), SessionError> {
    let session = match cmd.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
    };

    let method_id: MethodId = cmd.method.clone().into();
    match conn.submit_command(method_id, session, cmd.params) {
        Ok(call_id) => {
            inflight.insert(call_id, cmd.responder);
            Ok(())
        }
        Err(err) => {
            let mapped = SessionError::new(SessionErrorKind::Io).with_hint(err.to_string());
            let _ = cmd.responder.send(Err(mapped.clone()));
            Err(mapped)
        }
    }
}

fn forward_event(event: CdpEventMessage, event_tx: &mpsc::Sender<TransportEvent>) {
    let raw: Result<CdpJsonEventMessage, _> = event.try_into();
    match raw {
        Ok(raw) => {
            let payload = TransportEvent {
                method: raw.method.into_owned(),
                params: raw.params,
                session_id: raw.session_id,
            };
            enqueue_event(payload, event_tx);
        }
        Err(err) => {
            warn!(target: "cdp-transport", %err, "failed to decode cdp event");
        }
    }
}

// Events are best-effort. A slow or absent consumer must never park the
// loop: blocking here would also stop command responses from being routed.
fn enqueue_event(payload: TransportEvent, event_tx: &mpsc::Sender<TransportEvent>) {
    match event_tx.try_send(payload) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            debug!(target: "cdp-transport", method = %dropped.method, "event buffer full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(target: "cdp-transport", "event receiver dropped");
        }
    }
}

fn extract_payload(resp: Response) -> Result<Value, SessionError> {
    if let Some(result) = resp.result {
        Ok(result)
    } else if let Some(error) = resp.error {
        let retriable = error.code >= 500;
        Err(SessionError::new(SessionErrorKind::Io)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(retriable))
    } else {
        Err(SessionError::new(SessionErrorKind::Protocol).with_hint("empty cdp response"))
    }
}

fn map_cdp_error(err: CdpError) -> SessionError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => SessionError::new(SessionErrorKind::Timeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::JavascriptException(_) => {
            SessionError::new(SessionErrorKind::Script).with_hint(hint)
        }
        CdpError::Serde(_) => SessionError::new(SessionErrorKind::Protocol).with_hint(hint),
        _ => SessionError::new(SessionErrorKind::Io)
            .with_hint(hint)
            .retriable(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[tokio::test]
    async fn reopens_connection_when_loop_dies() {
        let open_count = Arc::new(AtomicUsize::new(0));
        let alive_flags: Arc<Mutex<Vec<Arc<AtomicBool>>>> = Arc::new(Mutex::new(Vec::new()));

        let factory: ConnFactory = {
            let open_count = open_count.clone();
            let alive_flags = alive_flags.clone();
            Arc::new(move |_cfg: SessionConfig| {
                let open_count = open_count.clone();
                let alive_flags = alive_flags.clone();
                Box::pin(async move {
                    open_count.fetch_add(1, AtomicOrdering::SeqCst);
                    let (conn, alive) = ConnState::test_stub();
                    alive_flags.lock().await.push(alive);
                    Ok(conn)
                })
            })
        };

        let transport = ChromiumTransport::with_factory(SessionConfig::default(), factory);

        let first = transport.conn().await.expect("first connection");
        assert_eq!(open_count.load(AtomicOrdering::SeqCst), 1);

        // A healthy connection is reused.
        let again = transport.conn().await.expect("reused connection");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(open_count.load(AtomicOrdering::SeqCst), 1);

        alive_flags.lock().await[0].store(false, AtomicOrdering::SeqCst);

        let second = transport.conn().await.expect("reopened connection");
        assert_eq!(open_count.load(AtomicOrdering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn full_event_buffer_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let event = |method: &str| TransportEvent {
            method: method.to_string(),
            params: Value::Null,
            session_id: None,
        };

        // Second enqueue must return immediately even with no consumer.
        enqueue_event(event("Target.targetCreated"), &tx);
        enqueue_event(event("Target.targetInfoChanged"), &tx);

        assert_eq!(rx.recv().await.unwrap().method, "Target.targetCreated");
        assert!(rx.try_recv().is_err(), "overflow event must be dropped");

        drop(rx);
        enqueue_event(event("Target.targetDestroyed"), &tx);
    }

    #[tokio::test]
    async fn shutdown_drops_connection_and_next_use_reopens() {
        let open_count = Arc::new(AtomicUsize::new(0));
        let factory: ConnFactory = {
            let open_count = open_count.clone();
            Arc::new(move |_cfg: SessionConfig| {
                let open_count = open_count.clone();
                Box::pin(async move {
                    open_count.fetch_add(1, AtomicOrdering::SeqCst);
                    let (conn, _alive) = ConnState::test_stub();
                    Ok(conn)
                })
            })
        };

        let transport = ChromiumTransport::with_factory(SessionConfig::default(), factory);
        transport.conn().await.expect("first connection");
        transport.shutdown().await;

        transport.conn().await.expect("fresh connection");
        assert_eq!(open_count.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn noop_transport_rejects_commands() {
        let transport = NoopTransport;
        let err = transport
            .send_command(CommandTarget::Browser, "Page.navigate", Value::Null)
            .await
            .expect_err("noop must fail");
        assert_eq!(err.kind, SessionErrorKind::Closed);
    }
}
