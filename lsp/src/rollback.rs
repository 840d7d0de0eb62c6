//! Ordered cleanup for multi-step start-up.

/// Cleanup actions run in reverse order unless [`commit`](Self::commit) is called.
#[derive(Default)]
pub struct Rollback {
    actions: Vec<Box<dyn FnOnce() + Send>>,
}

impl Rollback {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register cleanup for a resource just acquired.
    pub fn push<F>(&mut self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.actions.push(Box::new(action));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Start-up succeeded: keep everything.
    pub fn commit(mut self) {
        self.actions.clear();
    }

    /// Run every action now, newest first.
    pub fn run(mut self) {
        self.unwind();
    }

    fn unwind(&mut self) {
        while let Some(action) = self.actions.pop() {
            action();
        }
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            tracing::debug!(actions = self.actions.len(), "Rolling back start-up");
        }
        self.unwind();
    }
}
