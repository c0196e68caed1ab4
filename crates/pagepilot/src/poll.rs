//! Bounded polling for asynchronous page conditions.

use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::bridge::EvalContext;
use crate::error::PilotError;
use crate::script::Script;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const POLL_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Evaluate a predicate at a fixed interval until it yields anything but
/// the literal `false`, or the budget runs out.
///
/// Timeout is deliberately soft: the poller returns `Ok(())` and the
/// caller proceeds as though the condition were met. Callers that depend
/// on the condition for correctness must check state afterwards. Only
/// evaluation failures (protocol or script errors) propagate.
pub async fn poll_until(
    ctx: &EvalContext,
    predicate: &Script,
    interval: Duration,
    timeout: Duration,
) -> Result<(), PilotError> {
    let started = Instant::now();
    while started.elapsed() < timeout {
        sleep(interval).await;
        let outcome = ctx.evaluate_now(predicate).await?;
        if !matches!(outcome, Some(Value::Bool(false))) {
            return Ok(());
        }
    }
    debug!(target: "pagepilot", ?timeout, "poll budget exhausted, proceeding");
    Ok(())
}

/// Poll for a selector resolving in the current context's document.
pub async fn wait_for_selector(
    ctx: &EvalContext,
    selector: &str,
    timeout: Duration,
) -> Result<(), PilotError> {
    let predicate = Script::new(
        "function (win, frames, sel) {\n\
         return !!win.document.querySelector(sel);\n\
         }",
    )
    .arg(selector)?;
    poll_until(ctx, &predicate, POLL_INTERVAL, timeout).await
}
