//! The single outbound path to the server.
//!
//! Every request and notification goes through [`Connection`], which first
//! flushes any pending document change so the server never sees a message
//! ahead of the edits it depends on.

use std::future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::LspError;
use crate::lock;
use crate::protocol::{RequestId, ResponseError};
use crate::transport::{PendingResponse, Transport};

/// Something holding unsent document changes.
pub(crate) trait PendingFlush: Send + Sync {
    fn flush_pending(&self);
}

/// How a cancellable request ended.
#[derive(Debug)]
pub enum RequestOutcome {
    Response(Value),
    Error(ResponseError),
    /// Cancelled by this client.
    Cancelled,
    TimedOut,
    Closed,
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    /// Replaced when the client reconnects to a restarted server.
    transport: Mutex<Arc<dyn Transport>>,
    runtime: Handle,
    flush_hooks: Mutex<Vec<Weak<dyn PendingFlush>>>,
}

impl Connection {
    /// Wrap a transport. Continuations are spawned on the current Tokio
    /// runtime, so this panics outside one.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                transport: Mutex::new(transport),
                runtime: Handle::current(),
                flush_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&lock(&self.inner.transport))
    }

    /// Point every later send at `transport`. Requests already sent stay
    /// bound to the transport that sent them.
    pub(crate) fn replace_transport(&self, transport: Arc<dyn Transport>) {
        *lock(&self.inner.transport) = transport;
    }

    pub(crate) fn add_flush_hook(&self, hook: Weak<dyn PendingFlush>) {
        lock(&self.inner.flush_hooks).push(hook);
    }

    fn flush(&self) {
        let hooks: Vec<Arc<dyn PendingFlush>> = {
            let mut hooks = lock(&self.inner.flush_hooks);
            hooks.retain(|hook| hook.strong_count() > 0);
            hooks.iter().filter_map(Weak::upgrade).collect()
        };
        for hook in hooks {
            hook.flush_pending();
        }
    }

    /// Send a request after flushing pending document changes.
    pub fn request(&self, method: &str, params: Option<Value>) -> PendingResponse {
        self.flush();
        self.transport().send_request(method, params)
    }

    /// Send a notification after flushing pending document changes.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), LspError> {
        self.flush();
        self.transport().send_notification(method, params)
    }

    /// Send without flushing. Only the sync engine uses this, while it holds
    /// its own lock.
    pub(crate) fn notify_unflushed(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), LspError> {
        self.transport().send_notification(method, params)
    }

    /// Answer a server-initiated request.
    pub fn respond(
        &self,
        id: &RequestId,
        result: Result<Value, ResponseError>,
    ) -> Result<(), LspError> {
        self.flush();
        self.transport().send_response(id, result)
    }

    /// Cancellation does not flush: it only refers to a request already sent.
    pub fn cancel(&self, id: &RequestId) {
        self.transport().cancel_request(id);
    }

    pub(crate) fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.runtime.spawn(task)
    }

    /// Wait for `pending`, cancelling it when `cancel` fires (or its sender is
    /// dropped) or when `timeout` elapses. The cancellation goes to the
    /// transport current at this call, which is the one that sent `pending`.
    pub fn await_response(
        &self,
        pending: PendingResponse,
        cancel: oneshot::Receiver<()>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = RequestOutcome> + Send + 'static {
        let transport = self.transport();
        async move {
            let id = pending.id().clone();
            let deadline = async move {
                match timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => future::pending().await,
                }
            };

            tokio::select! {
                result = pending => match result {
                    Ok(value) => RequestOutcome::Response(value),
                    Err(LspError::Response(error)) => RequestOutcome::Error(error),
                    Err(_) => RequestOutcome::Closed,
                },
                _ = cancel => {
                    transport.cancel_request(&id);
                    RequestOutcome::Cancelled
                }
                () = deadline => {
                    transport.cancel_request(&id);
                    RequestOutcome::TimedOut
                }
            }
        }
    }
}
