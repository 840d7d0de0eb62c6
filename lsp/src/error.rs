//! Error types for the client runtime.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::ResponseError;

/// Failure of an outgoing request or notification.
#[derive(Debug, Error)]
pub enum LspError {
    /// The request was cancelled by this client.
    #[error("request cancelled")]
    Cancelled,
    #[error("{method} timed out after {}ms", timeout.as_millis())]
    Timeout {
        method: &'static str,
        timeout: Duration,
    },
    /// The transport dropped the request or refused to send.
    #[error("transport closed")]
    TransportClosed,
    /// The server answered with an error.
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// The reconnect policy allows no further restart.
    #[error("server crashed too often; not restarting")]
    RestartsExhausted,
}

/// A server-initiated (un)registration that breaks the registration contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("registration {id} targets {method}, which this feature does not own")]
    UnownedMethod { id: String, method: String },
    #[error("duplicate registration id {id} for {method}")]
    DuplicateId { id: String, method: String },
    #[error("no feature handles {method}")]
    UnknownMethod { method: String },
    #[error("invalid options for registration {id} ({method}): {reason}")]
    InvalidOptions {
        id: String,
        method: String,
        reason: String,
    },
}
