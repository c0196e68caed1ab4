//! Scripted browser automation over the DevTools protocol.
//!
//! pagepilot drives one browser page through a debugging connection:
//! navigation, clicking, typing, form manipulation, waiting, and nested
//! frame handling, each operation serialized through an ordered
//! single-flight queue. The heavy lifting happens in a handful of small
//! pieces:
//!
//! - [`script::Script`] serializes a behavior plus JSON arguments into a
//!   self-contained expression evaluated inside the page;
//! - [`bridge::EvalContext`] ships expressions over the session, unwraps
//!   typed results, and owns the host-side context stack;
//! - [`context::ContextStack`] tracks which browsing context (top window
//!   or nested frame) selector lookups resolve against;
//! - [`position`] composes an element's center with ancestor frame
//!   offsets into top-level page coordinates;
//! - [`input`] emits synthetic mouse, touch and key events;
//! - [`poll`] waits for asynchronous page conditions with a soft timeout;
//! - [`pilot::Pilot`] is the public operation surface.
//!
//! ```no_run
//! use pagepilot::{Pilot, SessionConfig};
//!
//! # async fn demo() -> Result<(), pagepilot::PilotError> {
//! let pilot = Pilot::connect(SessionConfig::default()).await?;
//! pilot.goto("https://example.com").await?;
//! pilot.type_text("input[name=q]", "pagepilot").await?;
//! pilot.click("button[type=submit]").await?;
//! pilot.end().await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod context;
pub mod error;
pub mod input;
pub mod pilot;
pub mod poll;
pub mod position;
pub mod registry;
pub mod script;
pub mod testing;

pub use bridge::EvalContext;
pub use cdp_session::{SessionConfig, SessionError, SessionErrorKind};
pub use context::ContextStack;
pub use error::{PilotError, PilotErrorKind};
pub use pilot::Pilot;
pub use registry::{ActionHandler, ActionRegistry};
pub use script::Script;
