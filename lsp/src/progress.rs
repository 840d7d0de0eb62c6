//! Token-keyed `$/progress` routing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use uuid::Uuid;

use crate::lock;
use crate::protocol::{ProgressParams, ProgressToken, WorkDoneProgress};

type ProgressHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct ProgressState {
    handlers: HashMap<ProgressToken, (u64, ProgressHandler)>,
    next_key: u64,
}

impl ProgressState {
    fn insert(&mut self, token: ProgressToken, handler: ProgressHandler) -> u64 {
        self.next_key += 1;
        let key = self.next_key;
        if self.handlers.insert(token.clone(), (key, handler)).is_some() {
            tracing::debug!("Replacing progress handler for token {token}");
        }
        key
    }

    /// Remove the handler only if it is still the one registered under `key`.
    fn remove(&mut self, token: &ProgressToken, key: u64) {
        if self
            .handlers
            .get(token)
            .is_some_and(|(current, _)| *current == key)
        {
            self.handlers.remove(token);
        }
    }
}

/// Routes progress notifications to per-token handlers.
#[derive(Clone, Default)]
pub struct ProgressService {
    state: Arc<Mutex<ProgressState>>,
}

impl ProgressService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh client-generated token.
    #[must_use]
    pub fn create_token(&self) -> ProgressToken {
        ProgressToken::String(Uuid::new_v4().to_string())
    }

    /// Route progress for `token` to `handler` until the subscription drops.
    pub fn subscribe<F>(&self, token: ProgressToken, handler: F) -> ProgressSubscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let key = lock(&self.state).insert(token.clone(), Arc::new(handler));
        ProgressSubscription {
            state: Arc::downgrade(&self.state),
            token,
            key,
        }
    }

    /// Deliver a `$/progress` notification. Returns whether a handler took it.
    ///
    /// The handler runs outside the service lock. A work-done `end` removes
    /// the handler afterwards.
    pub fn handle_progress(&self, params: ProgressParams) -> bool {
        let Some((key, handler)) = lock(&self.state)
            .handlers
            .get(&params.token)
            .map(|(key, handler)| (*key, Arc::clone(handler)))
        else {
            tracing::trace!("No handler for progress token {}", params.token);
            return false;
        };

        handler(&params.value);

        if WorkDoneProgress::is_end(&params.value) {
            lock(&self.state).remove(&params.token, key);
        }
        true
    }

    /// Accept a server-created token (`window/workDoneProgress/create`) and
    /// log its progress until it ends.
    pub fn accept_server_token(&self, token: ProgressToken) {
        let label = token.to_string();
        let handler = move |value: &Value| match WorkDoneProgress::parse(value) {
            Some(WorkDoneProgress::Begin {
                title,
                message,
                percentage,
                ..
            }) => {
                let message = message.unwrap_or_default();
                tracing::info!(token = %label, percentage, "{title}: {message}");
            }
            Some(WorkDoneProgress::Report {
                message,
                percentage,
            }) => {
                tracing::debug!(token = %label, percentage, "{}", message.unwrap_or_default());
            }
            Some(WorkDoneProgress::End { message }) => {
                tracing::info!(token = %label, "done {}", message.unwrap_or_default());
            }
            None => {
                tracing::trace!(token = %label, "Ignoring non work-done progress value");
            }
        };
        lock(&self.state).insert(token, Arc::new(handler));
    }

    #[must_use]
    pub fn is_subscribed(&self, token: &ProgressToken) -> bool {
        lock(&self.state).handlers.contains_key(token)
    }
}

/// Keeps a progress handler registered. Dropping it unsubscribes.
pub struct ProgressSubscription {
    state: Weak<Mutex<ProgressState>>,
    token: ProgressToken,
    key: u64,
}

impl ProgressSubscription {
    #[must_use]
    pub fn token(&self) -> &ProgressToken {
        &self.token
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            lock(&state).remove(&self.token, self.key);
        }
    }
}
