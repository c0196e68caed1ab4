//! Remote evaluation bridge.
//!
//! Couples the expression serializer with the browser session: renders a
//! [`Script`] against the current frame chain, ships it with
//! promise-awaiting evaluation, and unwraps the nested result value or
//! surfaces the remote exception.

use std::sync::Arc;

use cdp_session::BrowserSession;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::context::ContextStack;
use crate::error::{PilotError, PilotErrorKind};
use crate::script::Script;

/// Shared evaluation state: one session, one context stack.
///
/// Cloning is cheap and clones observe the same stack; mutation is safe
/// because the action queue guarantees single-flight execution.
#[derive(Clone)]
pub struct EvalContext {
    session: Arc<dyn BrowserSession>,
    stack: Arc<Mutex<ContextStack>>,
}

impl EvalContext {
    pub fn new(session: Arc<dyn BrowserSession>) -> Self {
        Self {
            session,
            stack: Arc::new(Mutex::new(ContextStack::new())),
        }
    }

    pub fn session(&self) -> &dyn BrowserSession {
        self.session.as_ref()
    }

    /// Evaluate a script in the active browsing context and unwrap its
    /// value. `None` means the remote behavior produced no value.
    pub async fn evaluate_now(&self, script: &Script) -> Result<Option<Value>, PilotError> {
        let frames = self.stack.lock().await.frames().to_vec();
        let expression = script.render(&frames);

        let response = self.session.evaluate(&expression, true).await?;

        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("remote evaluation raised an exception");
            return Err(PilotError::new(PilotErrorKind::Eval).with_hint(text));
        }

        Ok(response
            .get("result")
            .and_then(|result| result.get("value"))
            .cloned())
    }

    /// Enter a nested frame. Resolution failure is swallowed: the selector
    /// is only pushed once the page confirms it names a live frame.
    pub async fn enter_frame(&self, selector: &str) -> Result<(), PilotError> {
        let probe = Script::new(
            "function (win, frames, sel) {\n\
             const el = win.document.querySelector(sel);\n\
             return !!(el && el.contentWindow);\n\
             }",
        )
        .arg(selector)?;

        match self.evaluate_now(&probe).await? {
            Some(Value::Bool(true)) => {
                self.stack.lock().await.push_frame(selector);
                Ok(())
            }
            _ => {
                info!(target: "pagepilot", selector, "frame not entered (selector did not resolve)");
                Ok(())
            }
        }
    }

    /// Leave the innermost frame; no-op at the top window.
    pub async fn exit_frame(&self) {
        self.stack.lock().await.pop_frame();
    }

    /// Reset to the top window of the current page.
    pub async fn reset_frames(&self) {
        let mut stack = self.stack.lock().await;
        if !stack.at_top() {
            debug!(target: "pagepilot", depth = stack.depth(), "clearing context stack");
            stack.clear();
        }
    }

    pub async fn frame_depth(&self) -> usize {
        self.stack.lock().await.depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSession;
    use serde_json::json;

    #[tokio::test]
    async fn unwraps_nested_result_value() {
        let session = MockSession::new();
        session
            .push_eval_result(json!({ "result": { "value": { "ok": true } } }))
            .await;
        let ctx = EvalContext::new(session.clone());

        let out = ctx
            .evaluate_now(&Script::new("function (win, frames) { return { ok: true }; }"))
            .await
            .unwrap();
        assert_eq!(out, Some(json!({ "ok": true })));
    }

    #[tokio::test]
    async fn absent_value_is_none() {
        let session = MockSession::new();
        session
            .push_eval_result(json!({ "result": { "type": "undefined" } }))
            .await;
        let ctx = EvalContext::new(session.clone());

        let out = ctx
            .evaluate_now(&Script::new("function (win, frames) {}"))
            .await
            .unwrap();
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn remote_exception_becomes_eval_error() {
        let session = MockSession::new();
        session
            .push_eval_result(json!({
                "exceptionDetails": {
                    "text": "Uncaught",
                    "exception": { "description": "Error: cannot find an element" }
                },
                "result": {}
            }))
            .await;
        let ctx = EvalContext::new(session.clone());

        let err = ctx
            .evaluate_now(&Script::new("function (win, frames) { throw new Error('x'); }"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, PilotErrorKind::Eval);
        assert!(err.hint.unwrap().contains("cannot find an element"));
    }

    #[tokio::test]
    async fn enter_frame_pushes_only_on_confirmation() {
        let session = MockSession::new();
        let ctx = EvalContext::new(session.clone());

        session
            .push_eval_result(json!({ "result": { "value": true } }))
            .await;
        ctx.enter_frame("#present").await.unwrap();
        assert_eq!(ctx.frame_depth().await, 2);

        session
            .push_eval_result(json!({ "result": { "value": false } }))
            .await;
        ctx.enter_frame("#missing").await.unwrap();
        assert_eq!(ctx.frame_depth().await, 2, "failed push must be a no-op");
    }

    #[tokio::test]
    async fn evaluation_scopes_to_current_frame_chain() {
        let session = MockSession::new();
        let ctx = EvalContext::new(session.clone());

        session
            .push_eval_result(json!({ "result": { "value": true } }))
            .await;
        ctx.enter_frame("#outer").await.unwrap();

        session
            .push_eval_result(json!({ "result": { "value": 1 } }))
            .await;
        ctx.evaluate_now(&Script::new("function (win, frames) { return 1; }"))
            .await
            .unwrap();

        let last = session.last_expression().await.unwrap();
        assert!(last.contains(r##"const chain = ["#outer"]"##));
    }
}
