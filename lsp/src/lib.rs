//! Client runtime for the Language Server Protocol.
//!
//! The runtime negotiates capabilities, tracks dynamic registrations, keeps
//! open documents in sync with debounced change batching, and sequences pull
//! diagnostics per document and workspace-wide. Message framing is left to
//! the host behind the [`Transport`] seam.

pub mod client;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod negotiate;
pub mod progress;
pub mod protocol;
pub mod reconnect;
pub mod registry;
pub mod request;
pub mod rollback;
pub mod sync;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use client::{ClientOptions, LanguageClient};
pub use config::{ClientConfig, DiagnosticSettings};
pub use connection::{Connection, RequestOutcome};
pub use diagnostics::{
    DiagnosticFeature, DiagnosticProvider, DiagnosticSink, DiagnosticSource, DiagnosticsStore,
    DocumentPullCoordinator, ErrorAction, ErrorPolicy, PullReason, WorkspacePullCoordinator,
};
pub use error::{LspError, RegistrationError};
pub use negotiate::{CapabilityNegotiator, NegotiationState, RetryDecision, RetryPrompt};
pub use progress::{ProgressService, ProgressSubscription};
pub use reconnect::{ReconnectPolicy, RestartDecision, RestartTracker};
pub use registry::{DynamicFeature, FeatureRegistry, Registrations};
pub use request::DocumentRequestFeature;
pub use rollback::Rollback;
pub use sync::{
    ChangeMerger, CoalescingMerge, MergeStrategy, MergedChanges, SyncEvent, SyncListener,
    TextDocumentSync,
};
pub use transport::{ChannelTransport, IncomingMessage, PendingResponse, Transport};
pub use types::{ClientState, DiagnosticsSnapshot};

/// Lock a coordinator's state, recovering from poisoning.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
