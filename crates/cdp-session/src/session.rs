//! Typed session facade over the raw transport.
//!
//! [`BrowserSession`] is the capability surface the automation core
//! consumes: page navigation, expression evaluation, synthetic input and
//! lifecycle. [`CdpSession`] implements it against one attached page
//! target; tests implement it with mocks.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionErrorKind};
use crate::ids::SessionId;
use crate::metrics;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget};

/// One synthetic touch contact.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TouchPoint {
    pub x: f64,
    pub y: f64,
}

/// Parameters for `Input.dispatchKeyEvent`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub modifiers: u32,
    pub text: String,
    pub unmodified_text: String,
    pub windows_virtual_key_code: u32,
    pub native_virtual_key_code: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_keypad: Option<bool>,
}

impl KeyEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            modifiers: 0,
            text: String::new(),
            unmodified_text: String::new(),
            windows_virtual_key_code: 0,
            native_virtual_key_code: 0,
            is_keypad: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.unmodified_text = text.clone();
        self.text = text;
        self
    }

    pub fn with_key_code(mut self, code: u32) -> Self {
        self.windows_virtual_key_code = code;
        self.native_virtual_key_code = code;
        self
    }
}

/// Capability surface required by the automation core.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Begin loading a URL in the top-level page.
    async fn navigate(&self, url: &str) -> Result<(), SessionError>;

    /// Execute script in the active page context. Returns the raw
    /// `Runtime.evaluate` result object; unwrapping is the caller's job.
    async fn evaluate(&self, expression: &str, await_promise: bool)
        -> Result<Value, SessionError>;

    async fn dispatch_mouse_event(
        &self,
        kind: &str,
        x: f64,
        y: f64,
        button: &str,
        click_count: u32,
    ) -> Result<(), SessionError>;

    async fn dispatch_touch_event(
        &self,
        kind: &str,
        points: &[TouchPoint],
    ) -> Result<(), SessionError>;

    async fn dispatch_key_event(&self, event: KeyEvent) -> Result<(), SessionError>;

    /// End the session and the underlying browser process.
    async fn terminate(&self) -> Result<(), SessionError>;
}

/// A live debugging connection attached to one page target.
pub struct CdpSession {
    pub id: SessionId,
    transport: Arc<dyn CdpTransport>,
    page_session: Mutex<Option<String>>,
}

impl CdpSession {
    /// Launch (or connect to) a browser and attach to its first page.
    pub async fn connect(cfg: SessionConfig) -> Result<Self, SessionError> {
        let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::new(cfg));
        Self::with_transport(transport).await
    }

    /// Build a session over any transport. Used directly by tests.
    pub async fn with_transport(transport: Arc<dyn CdpTransport>) -> Result<Self, SessionError> {
        transport.start().await?;

        let session = Self {
            id: SessionId::new(),
            transport,
            page_session: Mutex::new(None),
        };
        session.attach_first_page().await?;
        Ok(session)
    }

    async fn attach_first_page(&self) -> Result<(), SessionError> {
        let targets = self
            .browser_command("Target.getTargets", json!({}))
            .await?;

        let mut target_id = targets
            .get("targetInfos")
            .and_then(|infos| infos.as_array())
            .and_then(|infos| {
                infos.iter().find_map(|info| {
                    (info.get("type").and_then(Value::as_str) == Some("page"))
                        .then(|| info.get("targetId").and_then(Value::as_str))
                        .flatten()
                        .map(str::to_string)
                })
            });

        if target_id.is_none() {
            let created = self
                .browser_command("Target.createTarget", json!({ "url": "about:blank" }))
                .await?;
            target_id = created
                .get("targetId")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        let target_id = target_id.ok_or_else(|| {
            SessionError::new(SessionErrorKind::Protocol).with_hint("no page target available")
        })?;

        let attached = self
            .browser_command(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;

        let cdp_session = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                SessionError::new(SessionErrorKind::Protocol)
                    .with_hint("attachToTarget returned no session id")
            })?;

        info!(
            target: "cdp-session",
            session = %self.id,
            page_session = %cdp_session,
            "attached to page target"
        );
        *self.page_session.lock().await = Some(cdp_session);
        Ok(())
    }

    async fn browser_command(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        self.timed_command(CommandTarget::Browser, method, params)
            .await
    }

    async fn page_command(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        let session = self
            .page_session
            .lock()
            .await
            .clone()
            .ok_or_else(|| SessionError::new(SessionErrorKind::Closed).with_hint("not attached"))?;
        self.timed_command(CommandTarget::Session(session), method, params)
            .await
    }

    async fn timed_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, SessionError> {
        metrics::record_command(method);
        let started = Instant::now();
        debug!(target: "cdp-session", session = %self.id, method, "sending command");

        match self.transport.send_command(target, method, params).await {
            Ok(value) => {
                metrics::record_command_success(method, started.elapsed());
                Ok(value)
            }
            Err(err) => {
                metrics::record_command_failure(method);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl BrowserSession for CdpSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.page_command("Page.navigate", json!({ "url": url }))
            .await?;
        Ok(())
    }

    async fn evaluate(
        &self,
        expression: &str,
        await_promise: bool,
    ) -> Result<Value, SessionError> {
        self.page_command(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "awaitPromise": await_promise,
                "returnByValue": true,
            }),
        )
        .await
    }

    async fn dispatch_mouse_event(
        &self,
        kind: &str,
        x: f64,
        y: f64,
        button: &str,
        click_count: u32,
    ) -> Result<(), SessionError> {
        self.page_command(
            "Input.dispatchMouseEvent",
            json!({
                "type": kind,
                "x": x,
                "y": y,
                "button": button,
                "clickCount": click_count,
            }),
        )
        .await?;
        Ok(())
    }

    async fn dispatch_touch_event(
        &self,
        kind: &str,
        points: &[TouchPoint],
    ) -> Result<(), SessionError> {
        let points = serde_json::to_value(points).map_err(|err| {
            SessionError::new(SessionErrorKind::Protocol).with_hint(err.to_string())
        })?;
        self.page_command(
            "Input.dispatchTouchEvent",
            json!({ "type": kind, "touchPoints": points }),
        )
        .await?;
        Ok(())
    }

    async fn dispatch_key_event(&self, event: KeyEvent) -> Result<(), SessionError> {
        let params = serde_json::to_value(&event).map_err(|err| {
            SessionError::new(SessionErrorKind::Protocol).with_hint(err.to_string())
        })?;
        self.page_command("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }

    async fn terminate(&self) -> Result<(), SessionError> {
        info!(target: "cdp-session", session = %self.id, "terminating session");
        let closed = self.browser_command("Browser.close", json!({})).await;
        self.transport.shutdown().await;
        closed.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEvent;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockTransport {
        commands: Mutex<Vec<(String, Value)>>,
        responses: Mutex<VecDeque<Value>>,
        shutdowns: AtomicUsize,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                commands: Mutex::new(Vec::new()),
                responses: Mutex::new(VecDeque::new()),
                shutdowns: AtomicUsize::new(0),
            })
        }

        async fn push_response(&self, value: Value) {
            self.responses.lock().await.push_back(value);
        }

        async fn commands(&self) -> Vec<(String, Value)> {
            self.commands.lock().await.clone()
        }
    }

    #[async_trait]
    impl CdpTransport for MockTransport {
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
            params: Value,
        ) -> Result<Value, SessionError> {
            self.commands
                .lock()
                .await
                .push((method.to_string(), params));
            Ok(self
                .responses
                .lock()
                .await
                .pop_front()
                .unwrap_or(Value::Null))
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn attached_session(transport: Arc<MockTransport>) -> CdpSession {
        transport
            .push_response(json!({
                "targetInfos": [{ "targetId": "T1", "type": "page" }]
            }))
            .await;
        transport
            .push_response(json!({ "sessionId": "S1" }))
            .await;
        CdpSession::with_transport(transport as Arc<dyn CdpTransport>)
            .await
            .expect("attach")
    }

    #[tokio::test]
    async fn attaches_to_existing_page_target() {
        let transport = MockTransport::new();
        let _session = attached_session(transport.clone()).await;

        let commands = transport.commands().await;
        let methods: Vec<&str> = commands.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(methods, vec!["Target.getTargets", "Target.attachToTarget"]);
        assert_eq!(commands[1].1["targetId"], "T1");
        assert_eq!(commands[1].1["flatten"], true);
    }

    #[tokio::test]
    async fn creates_page_target_when_none_exists() {
        let transport = MockTransport::new();
        transport
            .push_response(json!({ "targetInfos": [] }))
            .await;
        transport.push_response(json!({ "targetId": "T9" })).await;
        transport
            .push_response(json!({ "sessionId": "S9" }))
            .await;

        let _session = CdpSession::with_transport(transport.clone() as Arc<dyn CdpTransport>)
            .await
            .expect("attach");

        let methods: Vec<String> = transport
            .commands()
            .await
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(
            methods,
            vec![
                "Target.getTargets",
                "Target.createTarget",
                "Target.attachToTarget"
            ]
        );
    }

    #[tokio::test]
    async fn evaluate_requests_promise_await_and_value() {
        let transport = MockTransport::new();
        let session = attached_session(transport.clone()).await;

        transport
            .push_response(json!({ "result": { "value": 42 } }))
            .await;
        let out = session.evaluate("6 * 7", true).await.expect("evaluate");
        assert_eq!(out["result"]["value"], 42);

        let commands = transport.commands().await;
        let (method, params) = commands.last().expect("evaluate command");
        assert_eq!(method, "Runtime.evaluate");
        assert_eq!(params["awaitPromise"], true);
        assert_eq!(params["returnByValue"], true);
    }

    #[tokio::test]
    async fn terminate_closes_browser_then_shuts_down_transport() {
        let transport = MockTransport::new();
        let session = attached_session(transport.clone()).await;

        session.terminate().await.expect("terminate");

        let commands = transport.commands().await;
        assert_eq!(commands.last().unwrap().0, "Browser.close");
        assert_eq!(transport.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn key_event_serializes_with_cdp_field_names() {
        let event = KeyEvent::new("char").with_text("a").with_key_code(65);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "char");
        assert_eq!(value["text"], "a");
        assert_eq!(value["unmodifiedText"], "a");
        assert_eq!(value["windowsVirtualKeyCode"], 65);
        assert!(value.get("isKeypad").is_none());
    }
}
