//! Named operation registry.
//!
//! Replaces ad-hoc runtime method injection with an explicit mapping from
//! operation name to handler, duplicate-checked at registration. Handlers
//! run through the same queue as built-in operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;

use crate::bridge::EvalContext;
use crate::error::{PilotError, PilotErrorKind};

/// A registered operation: gets the evaluation context and caller-supplied
/// JSON arguments, returns an optional value like any remote evaluation.
pub type ActionHandler =
    Arc<dyn Fn(EvalContext, Value) -> BoxFuture<'static, Result<Option<Value>, PilotError>> + Send + Sync>;

#[derive(Default)]
pub struct ActionRegistry {
    actions: Mutex<HashMap<String, ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        handler: ActionHandler,
    ) -> Result<(), PilotError> {
        let name = name.into();
        let mut actions = self.actions.lock().expect("action registry lock");
        if actions.contains_key(&name) {
            return Err(PilotError::new(PilotErrorKind::DuplicateAction).with_hint(name));
        }
        actions.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ActionHandler> {
        self.actions
            .lock()
            .expect("action registry lock")
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .actions
            .lock()
            .expect("action registry lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> ActionHandler {
        Arc::new(|_ctx, _args| Box::pin(async { Ok(None) }))
    }

    #[test]
    fn rejects_duplicate_names() {
        let registry = ActionRegistry::new();
        registry.register("snapshot", noop_handler()).unwrap();

        let err = registry.register("snapshot", noop_handler()).unwrap_err();
        assert_eq!(err.kind, PilotErrorKind::DuplicateAction);
        assert_eq!(registry.names(), vec!["snapshot"]);
    }

    #[test]
    fn lookup_misses_are_none() {
        let registry = ActionRegistry::new();
        assert!(registry.get("unseen").is_none());
    }
}
