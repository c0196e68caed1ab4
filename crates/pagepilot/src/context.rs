//! Host-side browsing-context stack.
//!
//! The stack is kept as an ordered chain of frame selectors; the top window
//! is implicit, so an empty chain means "top window active" and the window
//! count always exceeds the frame count by exactly one. The chain is
//! re-resolved inside the page on every evaluation (see `script`), which is
//! what lets the host clear it safely on navigation.

/// Ordered frame-selector chain, outermost first.
#[derive(Clone, Debug, Default)]
pub struct ContextStack {
    frames: Vec<String>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector chain for the active context, outermost first.
    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// Number of active window contexts (top window included).
    pub fn depth(&self) -> usize {
        self.frames.len() + 1
    }

    pub fn at_top(&self) -> bool {
        self.frames.is_empty()
    }

    /// Enter a frame. Callers verify the selector resolves before pushing.
    pub fn push_frame(&mut self, selector: impl Into<String>) {
        self.frames.push(selector.into());
    }

    /// Leave the innermost frame; no-op when only the top window remains.
    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Drop back to the top window.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_top_window() {
        let stack = ContextStack::new();
        assert!(stack.at_top());
        assert_eq!(stack.depth(), 1);
        assert!(stack.frames().is_empty());
    }

    #[test]
    fn push_then_pop_restores_prior_state() {
        let mut stack = ContextStack::new();
        stack.push_frame("#outer");
        let before = stack.frames().to_vec();
        let depth = stack.depth();

        stack.push_frame("iframe.inner");
        stack.pop_frame();

        assert_eq!(stack.frames(), before.as_slice());
        assert_eq!(stack.depth(), depth);
    }

    #[test]
    fn pop_at_top_is_noop() {
        let mut stack = ContextStack::new();
        stack.pop_frame();
        assert!(stack.at_top());
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn window_count_exceeds_frame_count_by_one() {
        let mut stack = ContextStack::new();
        for (i, sel) in ["#a", "#b", "#c"].iter().enumerate() {
            stack.push_frame(*sel);
            assert_eq!(stack.depth(), stack.frames().len() + 1);
            assert_eq!(stack.frames().len(), i + 1);
        }
    }

    #[test]
    fn clear_drops_to_top() {
        let mut stack = ContextStack::new();
        stack.push_frame("#a");
        stack.push_frame("#b");
        stack.clear();
        assert!(stack.at_top());
    }
}
