//! Pull diagnostics.
//!
//! [`DocumentPullCoordinator`] runs one pull sequence per tracked document,
//! [`WorkspacePullCoordinator`] runs the single workspace-wide sequence, and
//! [`DiagnosticFeature`] wires both to registrations, UI visibility and sync
//! events. Every sequence has at most one request in flight.

mod document;
mod feature;
mod store;
mod workspace;

use parley_types::{Diagnostic, Url};

pub use document::DocumentPullCoordinator;
pub use feature::{DiagnosticFeature, DiagnosticProvider};
pub use store::DiagnosticsStore;
pub use workspace::WorkspacePullCoordinator;

use crate::error::LspError;
use crate::protocol::ResponseError;

/// Why a document pull was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullReason {
    Opened,
    ContentChange,
    Saved,
    /// Another document this one may depend on changed or closed.
    InterFileChange,
    BecameActive,
    BecameVisible,
    Refresh,
}

impl PullReason {
    /// Passive reasons never disturb a request already in flight.
    #[must_use]
    pub fn is_passive(self) -> bool {
        matches!(self, Self::BecameActive | Self::BecameVisible)
    }
}

/// Who produced a set of diagnostics. Each source owns its own slice of a
/// document's diagnostics, so two pull registrations never overwrite each
/// other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticSource {
    /// `textDocument/publishDiagnostics`.
    Pushed,
    /// A pull registration, by registration id.
    Pulled(String),
}

impl DiagnosticSource {
    #[must_use]
    pub fn pulled(id: impl Into<String>) -> Self {
        Self::Pulled(id.into())
    }
}

/// Receives diagnostics per source and document.
pub trait DiagnosticSink: Send + Sync {
    /// Replace what `source` had for `uri`.
    fn publish(&self, source: &DiagnosticSource, uri: &Url, diagnostics: Vec<Diagnostic>);

    /// Drop everything `source` published.
    fn retract(&self, _source: &DiagnosticSource) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    /// Dispose the coordinator; no further requests are sent.
    Stop,
}

/// Consulted on every workspace pull failure that is not a cancellation.
pub trait ErrorPolicy: Send + Sync {
    fn on_error(&self, error: &LspError) -> ErrorAction;
}

impl<F> ErrorPolicy for F
where
    F: Fn(&LspError) -> ErrorAction + Send + Sync,
{
    fn on_error(&self, error: &LspError) -> ErrorAction {
        self(error)
    }
}

/// How a pull's response error is handled.
enum SoftError {
    /// Cancelled on our side or content moved on; nothing to do.
    Ignore,
    /// The server asked for the request to be sent again.
    Retrigger,
    Failed,
}

fn classify(error: &ResponseError) -> SoftError {
    if error.is_request_cancelled() || error.is_content_modified() {
        SoftError::Ignore
    } else if error.is_server_cancelled() {
        if error.retrigger_requested() {
            SoftError::Retrigger
        } else {
            SoftError::Ignore
        }
    } else {
        SoftError::Failed
    }
}
