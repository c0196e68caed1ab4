use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// High-level failure categories surfaced by the session layer.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionErrorKind {
    #[error("browser launch failed")]
    Launch,
    #[error("cdp i/o failure")]
    Io,
    #[error("command timed out")]
    Timeout,
    #[error("remote script exception")]
    Script,
    #[error("malformed protocol response")]
    Protocol,
    #[error("session closed")]
    Closed,
}

/// Session error with optional human-readable hint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for SessionError {}

impl SessionError {
    pub fn new(kind: SessionErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_hint() {
        let err = SessionError::new(SessionErrorKind::Io).with_hint("socket reset");
        assert_eq!(err.to_string(), "cdp i/o failure: socket reset");
    }

    #[test]
    fn retriable_defaults_false() {
        assert!(!SessionError::new(SessionErrorKind::Timeout).retriable);
        assert!(SessionError::new(SessionErrorKind::Timeout)
            .retriable(true)
            .retriable);
    }
}
