//! Element position resolution in top-level page coordinates.
//!
//! Synthetic input is dispatched against the top-level page's input
//! surface, so an element's center point must be composed with the
//! accumulated offsets of every ancestor frame before dispatch.

use serde_json::Value;
use tracing::debug;

use crate::bridge::EvalContext;
use crate::script::Script;

/// Returned when the target cannot be resolved. Callers proceed with the
/// invalid coordinate instead of aborting.
pub const INVALID_POSITION: (f64, f64) = (-1.0, -1.0);

const POSITION_BODY: &str = "function (win, frames, sel) {\n\
    const target = win.document.querySelector(sel);\n\
    if (!target) {\n\
    throw new Error('cannot find an element for selector ' + sel);\n\
    }\n\
    if (target.scrollIntoViewIfNeeded) {\n\
    target.scrollIntoViewIfNeeded();\n\
    } else {\n\
    target.scrollIntoView({ block: 'center' });\n\
    }\n\
    const rect = target.getBoundingClientRect();\n\
    let offsetLeft = 0;\n\
    let offsetTop = 0;\n\
    for (const frame of frames) {\n\
    const r = frame.getBoundingClientRect();\n\
    offsetLeft += r.left;\n\
    offsetTop += r.top;\n\
    }\n\
    return [rect.left + rect.width / 2 + offsetLeft, rect.top + rect.height / 2 + offsetTop];\n\
    }";

/// Resolve a selector to its center point in top-level page space.
///
/// Scrolls the element into view, takes the center of its bounding rect in
/// its own window's coordinates, then adds the `left`/`top` of each
/// ancestor frame element, outermost first. Any failure, including the
/// selector not resolving, yields [`INVALID_POSITION`].
pub async fn find_position(ctx: &EvalContext, selector: &str) -> (f64, f64) {
    let script = match Script::new(POSITION_BODY).arg(selector) {
        Ok(script) => script,
        Err(err) => {
            debug!(target: "pagepilot", %err, selector, "position script build failed");
            return INVALID_POSITION;
        }
    };

    match ctx.evaluate_now(&script).await {
        Ok(Some(Value::Array(point))) if point.len() == 2 => {
            let x = point[0].as_f64();
            let y = point[1].as_f64();
            match (x, y) {
                (Some(x), Some(y)) => (x, y),
                _ => INVALID_POSITION,
            }
        }
        Ok(other) => {
            debug!(target: "pagepilot", ?other, selector, "position result malformed");
            INVALID_POSITION
        }
        Err(err) => {
            debug!(target: "pagepilot", %err, selector, "position resolution failed");
            INVALID_POSITION
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSession;
    use serde_json::json;

    #[tokio::test]
    async fn returns_center_point_from_page() {
        let session = MockSession::new();
        session
            .push_eval_result(json!({ "result": { "value": [120.0, 80.5] } }))
            .await;
        let ctx = EvalContext::new(session.clone());

        assert_eq!(find_position(&ctx, "#button").await, (120.0, 80.5));
    }

    #[tokio::test]
    async fn missing_element_yields_sentinel_not_error() {
        let session = MockSession::new();
        session
            .push_eval_result(json!({
                "exceptionDetails": {
                    "text": "Uncaught",
                    "exception": { "description": "Error: cannot find an element for selector #nope" }
                }
            }))
            .await;
        let ctx = EvalContext::new(session.clone());

        assert_eq!(find_position(&ctx, "#nope").await, INVALID_POSITION);
    }

    #[tokio::test]
    async fn malformed_result_yields_sentinel() {
        let session = MockSession::new();
        session
            .push_eval_result(json!({ "result": { "value": "12,34" } }))
            .await;
        let ctx = EvalContext::new(session.clone());

        assert_eq!(find_position(&ctx, "#x").await, INVALID_POSITION);
    }

    #[tokio::test]
    async fn script_composes_ancestor_frame_offsets() {
        // The offset walk happens inside the page; assert the shipped
        // expression carries both the rect-center math and the
        // outermost-first accumulation over the frame chain.
        let session = MockSession::new();
        session
            .push_eval_result(json!({ "result": { "value": [1.0, 2.0] } }))
            .await;
        let ctx = EvalContext::new(session.clone());

        find_position(&ctx, "#deep").await;

        let expr = session.last_expression().await.unwrap();
        assert!(expr.contains("rect.left + rect.width / 2 + offsetLeft"));
        assert!(expr.contains("rect.top + rect.height / 2 + offsetTop"));
        assert!(expr.contains("for (const frame of frames)"));
        assert!(expr.contains("offsetLeft += r.left"));
    }
}
