//! Crash accounting for restarting a server.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Deserialize;

const DEFAULT_MAX_RESTARTS: u32 = 5;
const DEFAULT_WINDOW_MS: u64 = 180_000;

/// How many restarts are allowed inside a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_restarts: u32,
    pub window_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

impl ReconnectPolicy {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart,
    GiveUp,
}

/// Applies a [`ReconnectPolicy`] to a stream of crashes.
#[derive(Debug, Clone)]
pub struct RestartTracker {
    policy: ReconnectPolicy,
    crashes: VecDeque<Instant>,
}

impl RestartTracker {
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            crashes: VecDeque::new(),
        }
    }

    pub fn record_crash(&mut self) -> RestartDecision {
        self.record_crash_at(Instant::now())
    }

    /// Record a crash at `now`. Crashes older than the window are forgotten.
    pub fn record_crash_at(&mut self, now: Instant) -> RestartDecision {
        let window = self.policy.window();
        while let Some(oldest) = self.crashes.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.crashes.pop_front();
            } else {
                break;
            }
        }
        self.crashes.push_back(now);

        if self.crashes.len() > self.policy.max_restarts as usize {
            tracing::warn!(
                crashes = self.crashes.len(),
                "Server crashed too often within {:?}; giving up",
                window
            );
            RestartDecision::GiveUp
        } else {
            RestartDecision::Restart
        }
    }

    #[must_use]
    pub fn crash_count(&self) -> usize {
        self.crashes.len()
    }

    /// Whether the last recorded crash used up the restart budget.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.crashes.len() > self.policy.max_restarts as usize
    }
}
