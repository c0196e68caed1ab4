//! Test support: a scriptable in-memory [`BrowserSession`].
//!
//! Records every call it receives and replays queued `Runtime.evaluate`
//! responses, so unit and integration tests can drive the full pilot
//! surface without a browser.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use cdp_session::{BrowserSession, KeyEvent, SessionError, SessionErrorKind, TouchPoint};
use serde_json::{json, Value};
use tokio::sync::Mutex;

/// Everything a [`MockSession`] was asked to do, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Navigate(String),
    Evaluate(String),
    Mouse {
        kind: String,
        x: f64,
        y: f64,
        button: String,
        click_count: u32,
    },
    Touch {
        kind: String,
        points: usize,
    },
    Key {
        kind: String,
        text: String,
    },
    Terminate,
}

pub struct MockSession {
    calls: Mutex<Vec<Call>>,
    eval_results: Mutex<VecDeque<Result<Value, SessionError>>>,
    default_eval_result: Mutex<Value>,
}

impl MockSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            eval_results: Mutex::new(VecDeque::new()),
            default_eval_result: Mutex::new(json!({ "result": {} })),
        })
    }

    /// Queue one `Runtime.evaluate` response.
    pub async fn push_eval_result(&self, value: Value) {
        self.eval_results.lock().await.push_back(Ok(value));
    }

    /// Queue one `Runtime.evaluate` failure.
    pub async fn push_eval_error(&self, err: SessionError) {
        self.eval_results.lock().await.push_back(Err(err));
    }

    /// Response returned once the queue is drained.
    pub async fn set_default_eval_result(&self, value: Value) {
        *self.default_eval_result.lock().await = value;
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn expressions(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                Call::Evaluate(expr) => Some(expr.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn last_expression(&self) -> Option<String> {
        self.expressions().await.pop()
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.calls.lock().await.push(Call::Navigate(url.to_string()));
        Ok(())
    }

    async fn evaluate(
        &self,
        expression: &str,
        _await_promise: bool,
    ) -> Result<Value, SessionError> {
        self.calls
            .lock()
            .await
            .push(Call::Evaluate(expression.to_string()));
        match self.eval_results.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(self.default_eval_result.lock().await.clone()),
        }
    }

    async fn dispatch_mouse_event(
        &self,
        kind: &str,
        x: f64,
        y: f64,
        button: &str,
        click_count: u32,
    ) -> Result<(), SessionError> {
        self.calls.lock().await.push(Call::Mouse {
            kind: kind.to_string(),
            x,
            y,
            button: button.to_string(),
            click_count,
        });
        Ok(())
    }

    async fn dispatch_touch_event(
        &self,
        kind: &str,
        points: &[TouchPoint],
    ) -> Result<(), SessionError> {
        self.calls.lock().await.push(Call::Touch {
            kind: kind.to_string(),
            points: points.len(),
        });
        Ok(())
    }

    async fn dispatch_key_event(&self, event: KeyEvent) -> Result<(), SessionError> {
        self.calls.lock().await.push(Call::Key {
            kind: event.kind.clone(),
            text: event.text.clone(),
        });
        Ok(())
    }

    async fn terminate(&self) -> Result<(), SessionError> {
        self.calls.lock().await.push(Call::Terminate);
        Ok(())
    }
}

/// Convenience constructor for a session-level failure.
pub fn io_error(hint: &str) -> SessionError {
    SessionError::new(SessionErrorKind::Io).with_hint(hint)
}
