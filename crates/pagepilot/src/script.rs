//! Expression serialization for remote evaluation.
//!
//! A [`Script`] pairs a fixed JavaScript function body with JSON-marshalled
//! arguments and renders the self-contained expression that is shipped over
//! `Runtime.evaluate`. The rendered expression derives `currentWindow` by
//! descending the host-owned frame-selector chain from the top window, so
//! no state is ever parked on the remote page's globals.
//!
//! Bodies follow one calling convention: `function (win, frames, ...args)`
//! where `win` is the active browsing context's window and `frames` the
//! ordered frame elements between the top window and `win`.

use serde::Serialize;
use serde_json::Value;

use crate::error::{PilotError, PilotErrorKind};

/// A unit of behavior plus data, ready to be evaluated remotely.
#[derive(Clone, Debug)]
pub struct Script {
    body: String,
    args: Vec<Value>,
}

impl Script {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument. Arguments must be representable as JSON; this is
    /// the boundary that keeps behaviors transmittable at all.
    pub fn arg(mut self, value: impl Serialize) -> Result<Self, PilotError> {
        let value = serde_json::to_value(value).map_err(|err| {
            PilotError::new(PilotErrorKind::Eval)
                .with_hint(format!("argument not representable as JSON: {err}"))
        })?;
        self.args.push(value);
        Ok(self)
    }

    /// Render the full expression for the given frame-selector chain.
    ///
    /// The preamble walks the chain with `querySelector`, stopping early if
    /// a frame no longer resolves; the body then runs against whatever
    /// context the walk reached. The result is promise-wrapped so
    /// synchronous and asynchronous bodies behave identically under
    /// `awaitPromise`.
    pub fn render(&self, frames: &[String]) -> String {
        let chain = Value::Array(frames.iter().cloned().map(Value::String).collect());

        let mut invocation_args = String::from("win, frames");
        for arg in &self.args {
            invocation_args.push_str(", ");
            // `Value` display emits valid JSON, which is also a valid JS
            // literal with all quoting and backslash escaping applied.
            invocation_args.push_str(&arg.to_string());
        }

        format!(
            "(() => {{\n\
             const chain = {chain};\n\
             let win = window.top;\n\
             const frames = [];\n\
             for (const sel of chain) {{\n\
             const el = win.document.querySelector(sel);\n\
             if (!el || !el.contentWindow) {{ break; }}\n\
             frames.push(el);\n\
             win = el.contentWindow;\n\
             }}\n\
             return Promise.resolve(({body})({invocation_args}));\n\
             }})()",
            chain = chain,
            body = self.body,
        )
    }
}
