use std::fmt;

use action_queue::QueueError;
use cdp_session::{SessionError, SessionErrorKind};
use thiserror::Error;

/// Failure categories surfaced by pilot operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PilotErrorKind {
    #[error("remote evaluation failed")]
    Eval,
    #[error("browser session failure")]
    Session,
    #[error("element not found")]
    NotFound,
    #[error("aborted by earlier failure")]
    Aborted,
    #[error("pilot closed")]
    Closed,
    #[error("action name already registered")]
    DuplicateAction,
    #[error("unknown action")]
    UnknownAction,
}

#[derive(Clone, Debug)]
pub struct PilotError {
    pub kind: PilotErrorKind,
    pub hint: Option<String>,
}

impl fmt::Display for PilotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for PilotError {}

impl PilotError {
    pub fn new(kind: PilotErrorKind) -> Self {
        Self { kind, hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub(crate) fn from_queue(err: QueueError<PilotError>) -> Self {
        match err {
            QueueError::Failed(inner) => inner,
            QueueError::Aborted(inner) => {
                Self::new(PilotErrorKind::Aborted).with_hint(inner.to_string())
            }
            QueueError::Closed => Self::new(PilotErrorKind::Closed),
        }
    }
}

impl From<SessionError> for PilotError {
    fn from(err: SessionError) -> Self {
        let kind = match err.kind {
            SessionErrorKind::Script => PilotErrorKind::Eval,
            _ => PilotErrorKind::Session,
        };
        Self::new(kind).with_hint(err.to_string())
    }
}
