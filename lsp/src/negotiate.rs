//! The `initialize` handshake.
//!
//! The wait is sliced so the deadline can be pushed out while the server
//! reports work-done progress, and so [`CapabilityNegotiator::interrupt`] is
//! observed promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::connection::Connection;
use crate::error::LspError;
use crate::lock;
use crate::progress::ProgressService;
use crate::protocol::{InitializeResult, RequestId, ResponseError, method};
use crate::transport::PendingResponse;

const DEFAULT_POLL_SLICE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    RequestSent,
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Cancel,
}

/// Asks the user whether to retry when the server requests it.
pub trait RetryPrompt: Send + Sync {
    fn confirm_retry(&self, error: &ResponseError) -> RetryDecision;
}

impl<F> RetryPrompt for F
where
    F: Fn(&ResponseError) -> RetryDecision + Send + Sync,
{
    fn confirm_retry(&self, error: &ResponseError) -> RetryDecision {
        self(error)
    }
}

enum WaitError {
    Failed(LspError),
    TimedOut,
    Interrupted,
}

/// Cancels the in-flight request unless disarmed, including when the
/// waiting future is dropped.
struct CancelOnDrop<'a> {
    connection: &'a Connection,
    id: Option<RequestId>,
}

impl CancelOnDrop<'_> {
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.connection.cancel(&id);
        }
    }
}

pub struct CapabilityNegotiator {
    connection: Connection,
    progress: Option<ProgressService>,
    prompt: Option<Arc<dyn RetryPrompt>>,
    timeout: Duration,
    poll_slice: Duration,
    state: Mutex<NegotiationState>,
    interrupted: AtomicBool,
    interrupt: Notify,
}

impl CapabilityNegotiator {
    #[must_use]
    pub fn new(connection: Connection, timeout: Duration) -> Self {
        Self {
            connection,
            progress: None,
            prompt: None,
            timeout,
            poll_slice: DEFAULT_POLL_SLICE,
            state: Mutex::new(NegotiationState::Idle),
            interrupted: AtomicBool::new(false),
            interrupt: Notify::new(),
        }
    }

    /// Attach a work-done token to every attempt; progress extends the deadline.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressService) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_retry_prompt(mut self, prompt: Arc<dyn RetryPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    #[must_use]
    pub fn with_poll_slice(mut self, poll_slice: Duration) -> Self {
        self.poll_slice = poll_slice;
        self
    }

    #[must_use]
    pub fn state(&self) -> NegotiationState {
        *lock(&self.state)
    }

    fn set_state(&self, state: NegotiationState) {
        *lock(&self.state) = state;
    }

    /// Cancel the in-flight handshake; [`Self::initialize`] returns
    /// [`LspError::Cancelled`]. Sticky: later calls fail the same way.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.interrupt.notify_one();
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Send `initialize` with `params` until it succeeds, fails, or the retry
    /// prompt declines.
    pub async fn initialize(&self, params: Value) -> Result<InitializeResult, LspError> {
        loop {
            if self.is_interrupted() {
                self.set_state(NegotiationState::Cancelled);
                return Err(LspError::Cancelled);
            }

            let last_progress: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
            let mut params = params.clone();
            let _subscription = self.progress.as_ref().map(|progress| {
                let token = progress.create_token();
                params["workDoneToken"] = serde_json::to_value(&token).unwrap_or(Value::Null);
                let last_progress = Arc::clone(&last_progress);
                progress.subscribe(token, move |_| {
                    *lock(&last_progress) = Some(Instant::now());
                })
            });

            self.set_state(NegotiationState::RequestSent);
            let pending = self.connection.request(method::INITIALIZE, Some(params));
            let mut guard = CancelOnDrop {
                connection: &self.connection,
                id: Some(pending.id().clone()),
            };

            match self.wait(pending, &last_progress).await {
                Ok(value) => {
                    guard.disarm();
                    let result = serde_json::from_value::<InitializeResult>(value).inspect_err(
                        |e| tracing::warn!("Malformed initialize result: {e}"),
                    );
                    let state = if result.is_ok() {
                        NegotiationState::Succeeded
                    } else {
                        NegotiationState::Failed
                    };
                    self.set_state(state);
                    return Ok(result?);
                }
                Err(WaitError::Failed(LspError::Response(error))) if error.requests_retry() => {
                    guard.disarm();
                    let decision = self
                        .prompt
                        .as_ref()
                        .map_or(RetryDecision::Cancel, |prompt| prompt.confirm_retry(&error));
                    if decision == RetryDecision::Retry && !self.is_interrupted() {
                        tracing::info!("Server asked to retry initialize: {error}");
                        self.set_state(NegotiationState::Retrying);
                        continue;
                    }
                    self.set_state(NegotiationState::Failed);
                    return Err(LspError::Response(error));
                }
                Err(WaitError::Failed(error)) => {
                    guard.disarm();
                    tracing::warn!("initialize failed: {error}");
                    self.set_state(NegotiationState::Failed);
                    return Err(error);
                }
                Err(WaitError::TimedOut) => {
                    drop(guard);
                    tracing::warn!("initialize timed out after {}ms", self.timeout.as_millis());
                    self.set_state(NegotiationState::Failed);
                    return Err(LspError::Timeout {
                        method: method::INITIALIZE,
                        timeout: self.timeout,
                    });
                }
                Err(WaitError::Interrupted) => {
                    drop(guard);
                    self.set_state(NegotiationState::Cancelled);
                    return Err(LspError::Cancelled);
                }
            }
        }
    }

    async fn wait(
        &self,
        mut pending: PendingResponse,
        last_progress: &Mutex<Option<Instant>>,
    ) -> Result<Value, WaitError> {
        let mut computed_at = Instant::now();
        let mut deadline = computed_at + self.timeout;

        loop {
            let slice = self
                .poll_slice
                .min(deadline.saturating_duration_since(Instant::now()));
            tokio::select! {
                result = &mut pending => return result.map_err(WaitError::Failed),
                () = self.interrupt.notified() => {}
                () = time::sleep(slice) => {}
            }

            if self.is_interrupted() {
                return Err(WaitError::Interrupted);
            }

            let now = Instant::now();
            if now < deadline {
                continue;
            }
            match *lock(last_progress) {
                Some(progressed) if progressed > computed_at => {
                    deadline = progressed + self.timeout;
                    computed_at = now;
                    tracing::debug!("initialize still in progress; extending deadline");
                }
                _ => return Err(WaitError::TimedOut),
            }
        }
    }
}
