//! The automation facade.
//!
//! Every public operation is one unit of work on the action queue: ops run
//! strictly one at a time in submission order against the shared session
//! and context stack, and the first failure aborts everything queued
//! behind it. There is deliberately no catch-style combinator here;
//! callers handle the returned `Result` of each operation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use action_queue::ActionQueue;
use cdp_session::{BrowserSession, CdpSession, SessionConfig};
use serde_json::Value;
use tracing::debug;

use crate::bridge::EvalContext;
use crate::error::{PilotError, PilotErrorKind};
use crate::input;
use crate::poll::{self, POLL_TIMEOUT};
use crate::position;
use crate::registry::{ActionHandler, ActionRegistry};
use crate::script::Script;

/// Drives one browser session through scripted page interaction.
pub struct Pilot {
    ctx: EvalContext,
    queue: ActionQueue<PilotError>,
    registry: ActionRegistry,
}

impl Pilot {
    /// Launch (or connect to) a browser per the given configuration.
    pub async fn connect(cfg: SessionConfig) -> Result<Self, PilotError> {
        let session = CdpSession::connect(cfg).await.map_err(PilotError::from)?;
        Ok(Self::with_session(Arc::new(session)))
    }

    /// Build a pilot over any session implementation.
    pub fn with_session(session: Arc<dyn BrowserSession>) -> Self {
        Self {
            ctx: EvalContext::new(session),
            queue: ActionQueue::new(),
            registry: ActionRegistry::new(),
        }
    }

    async fn run<T, F, Fut>(&self, f: F) -> Result<T, PilotError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, PilotError>> + Send + 'static,
    {
        self.queue.submit(f).await.map_err(PilotError::from_queue)
    }

    // --- navigation -----------------------------------------------------

    /// Load a URL in the top-level page. The context stack resets to the
    /// top window: frame selectors from the previous document would
    /// otherwise silently rescope every lookup.
    pub async fn goto(&self, url: &str) -> Result<(), PilotError> {
        let ctx = self.ctx.clone();
        let url = url.to_string();
        self.run(move || async move {
            debug!(target: "pagepilot", %url, ".goto()");
            ctx.reset_frames().await;
            ctx.session().navigate(&url).await?;
            Ok(())
        })
        .await
    }

    pub async fn back(&self) -> Result<(), PilotError> {
        self.eval_op(".back()", "function (win, frames) { win.history.back(); }")
            .await
            .map(|_| ())
    }

    pub async fn forward(&self) -> Result<(), PilotError> {
        self.eval_op(".forward()", "function (win, frames) { win.history.forward(); }")
            .await
            .map(|_| ())
    }

    pub async fn refresh(&self) -> Result<(), PilotError> {
        self.eval_op(".refresh()", "function (win, frames) { win.location.reload(); }")
            .await
            .map(|_| ())
    }

    // --- reads ----------------------------------------------------------

    /// Top-level page URL.
    pub async fn url(&self) -> Result<Option<String>, PilotError> {
        self.eval_op(".url()", "function (win, frames) { return window.location.href; }")
            .await
            .map(as_string)
    }

    /// Top-level page path.
    pub async fn path(&self) -> Result<Option<String>, PilotError> {
        self.eval_op(
            ".path()",
            "function (win, frames) { return window.location.pathname; }",
        )
        .await
        .map(as_string)
    }

    /// Title of the active context's document.
    pub async fn title(&self) -> Result<Option<String>, PilotError> {
        self.eval_op(
            ".title()",
            "function (win, frames) { return win.document.title; }",
        )
        .await
        .map(as_string)
    }

    /// Whether the selector resolves in the active context's document.
    pub async fn exists(&self, selector: &str) -> Result<bool, PilotError> {
        let script = Script::new(
            "function (win, frames, sel) {\n\
             return win.document.querySelector(sel) !== null;\n\
             }",
        )
        .arg(selector)?;
        let ctx = self.ctx.clone();
        let label = format!(".exists() for {selector}");
        self.run(move || async move {
            debug!(target: "pagepilot", "{label}");
            Ok(ctx.evaluate_now(&script).await? == Some(Value::Bool(true)))
        })
        .await
    }

    /// Whether the element's rendered box has non-zero width and height.
    pub async fn visible(&self, selector: &str) -> Result<bool, PilotError> {
        let script = Script::new(
            "function (win, frames, sel) {\n\
             const el = win.document.querySelector(sel);\n\
             if (el) {\n\
             return el.offsetWidth > 0 && el.offsetHeight > 0;\n\
             }\n\
             return false;\n\
             }",
        )
        .arg(selector)?;
        let ctx = self.ctx.clone();
        let label = format!(".visible() for {selector}");
        self.run(move || async move {
            debug!(target: "pagepilot", "{label}");
            Ok(ctx.evaluate_now(&script).await? == Some(Value::Bool(true)))
        })
        .await
    }

    // --- waiting & scrolling --------------------------------------------

    /// Suspend the pipeline for a fixed duration.
    pub async fn wait_ms(&self, ms: u64) -> Result<(), PilotError> {
        self.run(move || async move {
            debug!(target: "pagepilot", ms, ".wait()");
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(())
        })
        .await
    }

    /// Poll for a selector with the default budget. Completes silently at
    /// timeout; see the poller's soft-timeout contract.
    pub async fn wait_for(&self, selector: &str) -> Result<(), PilotError> {
        self.wait_for_within(selector, POLL_TIMEOUT).await
    }

    pub async fn wait_for_within(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), PilotError> {
        let ctx = self.ctx.clone();
        let selector = selector.to_string();
        self.run(move || async move {
            debug!(target: "pagepilot", %selector, ?timeout, ".wait() for element");
            poll::wait_for_selector(&ctx, &selector, timeout).await
        })
        .await
    }

    /// Poll an arbitrary predicate script with the default budget.
    pub async fn wait_fn(&self, predicate: Script) -> Result<(), PilotError> {
        self.wait_fn_within(predicate, POLL_TIMEOUT).await
    }

    pub async fn wait_fn_within(
        &self,
        predicate: Script,
        timeout: Duration,
    ) -> Result<(), PilotError> {
        let ctx = self.ctx.clone();
        self.run(move || async move {
            debug!(target: "pagepilot", ?timeout, ".wait() for function");
            poll::poll_until(&ctx, &predicate, poll::POLL_INTERVAL, timeout).await
        })
        .await
    }

    pub async fn scroll_to(&self, x: f64, y: f64) -> Result<(), PilotError> {
        let script = Script::new("function (win, frames, x, y) { win.scrollTo(x, y); }")
            .arg(x)?
            .arg(y)?;
        let ctx = self.ctx.clone();
        self.run(move || async move {
            debug!(target: "pagepilot", ".scrollTo()");
            ctx.evaluate_now(&script).await?;
            Ok(())
        })
        .await
    }

    // --- frames ---------------------------------------------------------

    /// Enter a nested frame. A selector that does not resolve to a live
    /// frame is swallowed (logged, not surfaced).
    pub async fn iframe(&self, selector: &str) -> Result<(), PilotError> {
        let ctx = self.ctx.clone();
        let selector = selector.to_string();
        self.run(move || async move {
            debug!(target: "pagepilot", %selector, ".iframe()");
            ctx.enter_frame(&selector).await
        })
        .await
    }

    /// Leave the innermost frame; no-op at the top window.
    pub async fn parent(&self) -> Result<(), PilotError> {
        let ctx = self.ctx.clone();
        self.run(move || async move {
            debug!(target: "pagepilot", ".parent()");
            ctx.exit_frame().await;
            Ok(())
        })
        .await
    }

    // --- pointer --------------------------------------------------------

    /// Wait for the selector, resolve its page position, click it.
    pub async fn click(&self, selector: &str) -> Result<(), PilotError> {
        let ctx = self.ctx.clone();
        let selector = selector.to_string();
        self.run(move || async move {
            debug!(target: "pagepilot", %selector, ".click()");
            poll::wait_for_selector(&ctx, &selector, POLL_TIMEOUT).await?;
            click_selector(&ctx, &selector).await
        })
        .await
    }

    /// Wait for the selector, resolve its page position, tap it.
    pub async fn tap(&self, selector: &str) -> Result<(), PilotError> {
        let ctx = self.ctx.clone();
        let selector = selector.to_string();
        self.run(move || async move {
            debug!(target: "pagepilot", %selector, ".tap()");
            poll::wait_for_selector(&ctx, &selector, POLL_TIMEOUT).await?;
            let (x, y) = position::find_position(&ctx, &selector).await;
            input::dispatch_tap(ctx.session(), x, y).await
        })
        .await
    }

    pub async fn mousedown(&self, selector: &str) -> Result<(), PilotError> {
        self.dom_mouse_event(selector, "mousedown").await
    }

    pub async fn mouseup(&self, selector: &str) -> Result<(), PilotError> {
        self.dom_mouse_event(selector, "mouseup").await
    }

    pub async fn mouseover(&self, selector: &str) -> Result<(), PilotError> {
        let script = Script::new(
            "function (win, frames, sel) {\n\
             const el = win.document.querySelector(sel);\n\
             if (!el) {\n\
             throw new Error('unable to find element by selector: ' + sel);\n\
             }\n\
             const event = win.document.createEvent('MouseEvent');\n\
             event.initMouseEvent('mouseover', true, true);\n\
             el.dispatchEvent(event);\n\
             }",
        )
        .arg(selector)?;
        let ctx = self.ctx.clone();
        let label = format!(".mouseover() on {selector}");
        self.run(move || async move {
            debug!(target: "pagepilot", "{label}");
            ctx.evaluate_now(&script).await?;
            Ok(())
        })
        .await
    }

    // --- forms ----------------------------------------------------------

    /// Wait, click to focus, set the input's value (empty text clears),
    /// then blur. The value is set wholesale, not typed per character.
    pub async fn type_text(&self, selector: &str, text: &str) -> Result<(), PilotError> {
        let set_value = Script::new(
            "function (win, frames, sel, text) {\n\
             win.document.querySelector(sel).value = text;\n\
             }",
        )
        .arg(selector)?
        .arg(text)?;
        let blur = blur_script(selector)?;

        let ctx = self.ctx.clone();
        let selector = selector.to_string();
        let preview = text.to_string();
        self.run(move || async move {
            debug!(target: "pagepilot", %selector, text = %preview, ".type()");
            poll::wait_for_selector(&ctx, &selector, POLL_TIMEOUT).await?;
            click_selector(&ctx, &selector).await?;
            ctx.evaluate_now(&set_value).await?;
            ctx.evaluate_now(&blur).await?;
            Ok(())
        })
        .await
    }

    /// Wait, click to focus, then emit one key-event triplet per
    /// character against the focused element.
    pub async fn insert(&self, selector: &str, text: &str) -> Result<(), PilotError> {
        let ctx = self.ctx.clone();
        let selector = selector.to_string();
        let text = text.to_string();
        self.run(move || async move {
            debug!(target: "pagepilot", %selector, ".insert()");
            poll::wait_for_selector(&ctx, &selector, POLL_TIMEOUT).await?;
            click_selector(&ctx, &selector).await?;
            for ch in text.chars() {
                input::send_key(ctx.session(), ch).await?;
            }
            Ok(())
        })
        .await
    }

    pub async fn check(&self, selector: &str) -> Result<(), PilotError> {
        self.set_checked(selector, true, ".check()").await
    }

    pub async fn uncheck(&self, selector: &str) -> Result<(), PilotError> {
        self.set_checked(selector, false, ".uncheck()").await
    }

    /// Set a `<select>`'s value and fire a synthetic change event.
    pub async fn select(&self, selector: &str, option: &str) -> Result<(), PilotError> {
        let script = Script::new(
            "function (win, frames, sel, option) {\n\
             const el = win.document.querySelector(sel);\n\
             const event = win.document.createEvent('HTMLEvents');\n\
             el.value = option;\n\
             event.initEvent('change', true, true);\n\
             el.dispatchEvent(event);\n\
             }",
        )
        .arg(selector)?
        .arg(option)?;
        let ctx = self.ctx.clone();
        let label = format!(".select() {selector}");
        self.run(move || async move {
            debug!(target: "pagepilot", "{label}");
            ctx.evaluate_now(&script).await?;
            Ok(())
        })
        .await
    }

    // --- scripting ------------------------------------------------------

    /// Evaluate an arbitrary script in the active browsing context.
    pub async fn evaluate(&self, script: Script) -> Result<Option<Value>, PilotError> {
        let ctx = self.ctx.clone();
        self.run(move || async move { ctx.evaluate_now(&script).await })
            .await
    }

    // --- named operations -----------------------------------------------

    /// Register a named operation. Names must be unique.
    pub fn register_action(
        &self,
        name: impl Into<String>,
        handler: ActionHandler,
    ) -> Result<(), PilotError> {
        self.registry.register(name, handler)
    }

    /// Run a registered operation through the queue.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Option<Value>, PilotError> {
        let handler = self
            .registry
            .get(name)
            .ok_or_else(|| PilotError::new(PilotErrorKind::UnknownAction).with_hint(name))?;
        let ctx = self.ctx.clone();
        let label = name.to_string();
        self.run(move || async move {
            debug!(target: "pagepilot", action = %label, "invoking registered action");
            handler(ctx, args).await
        })
        .await
    }

    // --- lifecycle ------------------------------------------------------

    /// Terminate the session and stop accepting operations.
    pub async fn end(&self) -> Result<(), PilotError> {
        let ctx = self.ctx.clone();
        let result = self
            .run(move || async move {
                debug!(target: "pagepilot", ".end()");
                ctx.session().terminate().await?;
                Ok(())
            })
            .await;
        self.queue.close().await;
        result
    }

    // --- helpers --------------------------------------------------------

    async fn eval_op(&self, label: &str, body: &str) -> Result<Option<Value>, PilotError> {
        let script = Script::new(body);
        let ctx = self.ctx.clone();
        let label = label.to_string();
        self.run(move || async move {
            debug!(target: "pagepilot", "{label}");
            ctx.evaluate_now(&script).await
        })
        .await
    }

    async fn dom_mouse_event(&self, selector: &str, event_name: &str) -> Result<(), PilotError> {
        let script = Script::new(format!(
            "function (win, frames, sel) {{\n\
             const el = win.document.querySelector(sel);\n\
             if (!el) {{\n\
             throw new Error('unable to find element by selector: ' + sel);\n\
             }}\n\
             const event = win.document.createEvent('MouseEvent');\n\
             event.initEvent('{event_name}', true, true);\n\
             el.dispatchEvent(event);\n\
             }}"
        ))
        .arg(selector)?;
        let ctx = self.ctx.clone();
        let label = format!(".{event_name}() on {selector}");
        self.run(move || async move {
            debug!(target: "pagepilot", "{label}");
            ctx.evaluate_now(&script).await?;
            Ok(())
        })
        .await
    }

    async fn set_checked(
        &self,
        selector: &str,
        checked: bool,
        label: &str,
    ) -> Result<(), PilotError> {
        let script = Script::new(
            "function (win, frames, sel, checked) {\n\
             const el = win.document.querySelector(sel);\n\
             const event = win.document.createEvent('HTMLEvents');\n\
             el.checked = checked ? true : null;\n\
             event.initEvent('change', true, true);\n\
             el.dispatchEvent(event);\n\
             }",
        )
        .arg(selector)?
        .arg(checked)?;
        let ctx = self.ctx.clone();
        let label = format!("{label} {selector}");
        self.run(move || async move {
            debug!(target: "pagepilot", "{label}");
            ctx.evaluate_now(&script).await?;
            Ok(())
        })
        .await
    }
}

/// Resolve the selector's page position and click it. A failed resolution
/// yields the invalid-position sentinel; the click is dispatched anyway,
/// matching the documented lenient policy.
async fn click_selector(ctx: &EvalContext, selector: &str) -> Result<(), PilotError> {
    let (x, y) = position::find_position(ctx, selector).await;
    debug!(target: "pagepilot", %selector, x, y, "dispatching click");
    input::dispatch_click(ctx.session(), x, y).await
}

fn blur_script(selector: &str) -> Result<Script, PilotError> {
    // The element may have left the DOM between the action and the blur.
    Script::new(
        "function (win, frames, sel) {\n\
         const el = win.document.querySelector(sel);\n\
         if (el) {\n\
         el.blur();\n\
         }\n\
         }",
    )
    .arg(selector)
}

fn as_string(value: Option<Value>) -> Option<String> {
    value.and_then(|v| v.as_str().map(str::to_string))
}
