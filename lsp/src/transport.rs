//! Request/response transport seam.
//!
//! Wire framing lives outside this crate. A [`Transport`] hands out a
//! [`PendingResponse`] per request and accepts notifications, responses and
//! cancellations. [`ChannelTransport`] is the stock implementation: outgoing
//! JSON-RPC frames go to an unbounded channel drained by the host's writer, and
//! the host feeds every incoming frame back through
//! [`ChannelTransport::handle_incoming`].

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::task::{Context, Poll};

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

use crate::error::LspError;
use crate::lock;
use crate::protocol::{
    Notification, Request, RequestId, ResponseError, error_code, method, response_frame,
};

type ResponseSender = oneshot::Sender<Result<Value, ResponseError>>;

/// Future resolving to the result of one outgoing request.
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value, ResponseError>>,
}

impl PendingResponse {
    #[must_use]
    pub fn new(id: RequestId, rx: oneshot::Receiver<Result<Value, ResponseError>>) -> Self {
        Self { id, rx }
    }

    /// A response that resolves to [`LspError::TransportClosed`].
    #[must_use]
    pub fn closed(id: RequestId) -> Self {
        let (_, rx) = oneshot::channel();
        Self { id, rx }
    }

    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value, LspError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(LspError::Response(error)),
            Err(_) => Err(LspError::TransportClosed),
        })
    }
}

/// Outgoing half of a connection to one language server.
pub trait Transport: Send + Sync {
    fn send_request(&self, method: &str, params: Option<Value>) -> PendingResponse;

    fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), LspError>;

    /// Answer a server-initiated request.
    fn send_response(
        &self,
        id: &RequestId,
        result: Result<Value, ResponseError>,
    ) -> Result<(), LspError>;

    /// Best-effort cancellation: tell the server and drop the local waiter.
    fn cancel_request(&self, id: &RequestId);
}

/// Server-initiated traffic surfaced by [`ChannelTransport::handle_incoming`].
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

/// [`Transport`] over an unbounded channel of JSON-RPC frames.
pub struct ChannelTransport {
    outgoing: mpsc::UnboundedSender<Value>,
    next_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, ResponseSender>>,
}

impl ChannelTransport {
    /// Build a transport and the receiver the host's writer drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (outgoing, rx) = mpsc::unbounded_channel();
        let transport = Self {
            outgoing,
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
        };
        (transport, rx)
    }

    /// Route one incoming frame. Responses complete their pending request and
    /// yield `None`; server requests and notifications are returned.
    pub fn handle_incoming(&self, frame: Value) -> Option<IncomingMessage> {
        let id = frame.get("id").filter(|id| !id.is_null());
        let method = frame
            .get("method")
            .and_then(Value::as_str)
            .map(String::from);
        let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

        match (id, method, has_result_or_error) {
            (Some(id), None, true) => {
                let Ok(id) = serde_json::from_value::<RequestId>(id.clone()) else {
                    tracing::trace!("Ignoring response with malformed id: {id}");
                    return None;
                };
                self.complete(&id, &frame);
                None
            }
            (Some(id), Some(method), _) => {
                let Ok(id) = serde_json::from_value::<RequestId>(id.clone()) else {
                    tracing::warn!("Ignoring server request {method} with malformed id: {id}");
                    return None;
                };
                Some(IncomingMessage::Request {
                    id,
                    method,
                    params: frame.get("params").cloned(),
                })
            }
            (None, Some(method), _) => Some(IncomingMessage::Notification {
                method,
                params: frame.get("params").cloned(),
            }),
            _ => {
                tracing::trace!("Ignoring malformed JSON-RPC frame");
                None
            }
        }
    }

    fn complete(&self, id: &RequestId, frame: &Value) {
        let Some(sender) = lock(&self.pending).remove(id) else {
            tracing::trace!("Ignoring response for unknown request {id}");
            return;
        };
        let result = match frame.get("error") {
            Some(error) => Err(serde_json::from_value::<ResponseError>(error.clone())
                .unwrap_or_else(|e| {
                    ResponseError::new(
                        error_code::INTERNAL_ERROR,
                        format!("malformed error response: {e}"),
                    )
                })),
            None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = sender.send(result);
    }

    /// Drop every waiter; their futures resolve to [`LspError::TransportClosed`].
    pub fn close(&self) {
        lock(&self.pending).clear();
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    fn send_frame(&self, frame: Value) -> Result<(), LspError> {
        self.outgoing
            .send(frame)
            .map_err(|_| LspError::TransportClosed)
    }
}

impl Transport for ChannelTransport {
    fn send_request(&self, method: &str, params: Option<Value>) -> PendingResponse {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);

        let request = Request::new(id.clone(), method, params);
        let sent = serde_json::to_value(&request)
            .map_err(LspError::from)
            .and_then(|frame| self.send_frame(frame));
        if let Err(e) = sent {
            // Don't leak the pending entry when the writer is gone.
            tracing::warn!("Failed to send {method}: {e}");
            lock(&self.pending).remove(&id);
        }
        PendingResponse::new(id, rx)
    }

    fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), LspError> {
        let notification = Notification::new(method, params);
        self.send_frame(serde_json::to_value(&notification)?)
    }

    fn send_response(
        &self,
        id: &RequestId,
        result: Result<Value, ResponseError>,
    ) -> Result<(), LspError> {
        self.send_frame(response_frame(id, result))
    }

    fn cancel_request(&self, id: &RequestId) {
        if lock(&self.pending).remove(id).is_none() {
            return;
        }
        let params = json!({ "id": id });
        if let Err(e) = self.send_notification(method::CANCEL_REQUEST, Some(params)) {
            tracing::debug!("Failed to cancel request {id}: {e}");
        }
    }
}
