//! Per-document pull sequences.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_types::{Diagnostic, DocumentSelector, Url};
use tokio::sync::oneshot;

use super::{DiagnosticSink, DiagnosticSource, PullReason, SoftError, classify};
use crate::connection::{Connection, RequestOutcome};
use crate::lock;
use crate::protocol::{
    DiagnosticOptions, DocumentDiagnosticParams, DocumentDiagnosticReport, TextDocumentIdentifier,
    method, to_diagnostics,
};

struct InFlight {
    generation: u64,
    /// Taken when the request is cancelled; dropping it also cancels.
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct DocumentSequence {
    result_id: Option<String>,
    in_flight: Option<InFlight>,
    retrigger: bool,
}

impl DocumentSequence {
    fn cancel_in_flight(&mut self) {
        if let Some(cancel) = self.in_flight.as_mut().and_then(|f| f.cancel.take()) {
            let _ = cancel.send(());
        }
    }
}

#[derive(Default)]
struct DocumentState {
    sequences: HashMap<Url, DocumentSequence>,
    next_generation: u64,
    disposed: bool,
}

impl DocumentState {
    /// Mark a new request in flight for `uri`.
    fn begin(&mut self, uri: &Url) -> Option<PullStart> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let sequence = self.sequences.get_mut(uri)?;
        let (cancel, cancelled) = oneshot::channel();
        sequence.in_flight = Some(InFlight {
            generation,
            cancel: Some(cancel),
        });
        Some(PullStart {
            generation,
            previous_result_id: sequence.result_id.clone(),
            cancelled,
        })
    }

    /// Apply a report to `uri` and queue what the sink should see.
    fn apply_report(
        &mut self,
        uri: &Url,
        report: DocumentDiagnosticReport,
        publish: &mut Vec<(Url, Vec<Diagnostic>)>,
    ) {
        let related = match report {
            DocumentDiagnosticReport::Full {
                result_id,
                items,
                related_documents,
            } => {
                if let Some(sequence) = self.sequences.get_mut(uri) {
                    sequence.result_id = result_id;
                }
                publish.push((uri.clone(), to_diagnostics(&items)));
                related_documents
            }
            DocumentDiagnosticReport::Unchanged {
                result_id,
                related_documents,
            } => {
                if let Some(sequence) = self.sequences.get_mut(uri) {
                    sequence.result_id = Some(result_id);
                }
                related_documents
            }
        };
        for (related_uri, report) in related {
            if related_uri != *uri {
                self.apply_report(&related_uri, report, publish);
            }
        }
    }
}

struct PullStart {
    generation: u64,
    previous_result_id: Option<String>,
    cancelled: oneshot::Receiver<()>,
}

/// Pull sequences for the documents one registration covers.
#[derive(Clone)]
pub struct DocumentPullCoordinator {
    inner: Arc<DocumentInner>,
}

struct DocumentInner {
    connection: Connection,
    selector: DocumentSelector,
    options: DiagnosticOptions,
    sink: Arc<dyn DiagnosticSink>,
    source: DiagnosticSource,
    timeout: Option<Duration>,
    state: Mutex<DocumentState>,
}

impl DocumentPullCoordinator {
    #[must_use]
    pub fn new(
        connection: Connection,
        selector: DocumentSelector,
        options: DiagnosticOptions,
        sink: Arc<dyn DiagnosticSink>,
    source: DiagnosticSource,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(DocumentInner {
                connection,
                selector,
                options,
                sink,
                source,
                timeout,
                state: Mutex::new(DocumentState::default()),
            }),
        }
    }

    #[must_use]
    pub fn selector(&self) -> &DocumentSelector {
        &self.inner.selector
    }

    #[must_use]
    pub fn options(&self) -> &DiagnosticOptions {
        &self.inner.options
    }

    /// Request diagnostics for a document.
    ///
    /// Starts tracking a matching document on first trigger. With a request
    /// in flight, passive reasons are dropped and any other reason cancels
    /// it and schedules exactly one follow-up request.
    pub fn trigger(&self, uri: &Url, language_id: &str, reason: PullReason) {
        if reason == PullReason::InterFileChange && !self.inner.options.inter_file_dependencies {
            return;
        }

        let start = {
            let mut state = lock(&self.inner.state);
            if state.disposed {
                return;
            }
            if !state.sequences.contains_key(uri) {
                if !self.inner.selector.matches(uri, language_id) {
                    return;
                }
                state
                    .sequences
                    .insert(uri.clone(), DocumentSequence::default());
            }

            let Some(sequence) = state.sequences.get_mut(uri) else {
                return;
            };
            if sequence.in_flight.is_some() {
                if !reason.is_passive() {
                    tracing::debug!(%uri, ?reason, "Superseding in-flight diagnostic pull");
                    sequence.retrigger = true;
                    sequence.cancel_in_flight();
                }
                return;
            }
            state.begin(uri)
        };

        if let Some(start) = start {
            tracing::debug!(%uri, ?reason, "Pulling document diagnostics");
            self.spawn_pull(uri.clone(), start);
        }
    }

    /// Cancel the in-flight request but keep tracking the document.
    pub fn cancel(&self, uri: &Url) {
        let mut state = lock(&self.inner.state);
        if let Some(sequence) = state.sequences.get_mut(uri) {
            sequence.retrigger = false;
            sequence.cancel_in_flight();
        }
    }

    /// Cancel and forget the document's sequence.
    pub fn end(&self, uri: &Url) {
        let removed = lock(&self.inner.state).sequences.remove(uri);
        if let Some(mut sequence) = removed {
            sequence.cancel_in_flight();
        }
    }

    pub fn dispose(&self) {
        let sequences = {
            let mut state = lock(&self.inner.state);
            state.disposed = true;
            std::mem::take(&mut state.sequences)
        };
        for (_, mut sequence) in sequences {
            sequence.cancel_in_flight();
        }
    }

    #[must_use]
    pub fn is_tracked(&self, uri: &Url) -> bool {
        lock(&self.inner.state).sequences.contains_key(uri)
    }

    #[must_use]
    pub fn is_in_flight(&self, uri: &Url) -> bool {
        lock(&self.inner.state)
            .sequences
            .get(uri)
            .is_some_and(|sequence| sequence.in_flight.is_some())
    }

    #[must_use]
    pub fn result_id(&self, uri: &Url) -> Option<String> {
        lock(&self.inner.state)
            .sequences
            .get(uri)
            .and_then(|sequence| sequence.result_id.clone())
    }

    fn spawn_pull(&self, uri: Url, start: PullStart) {
        let coordinator = self.clone();
        self.inner.connection.spawn(async move {
            coordinator.run_pull(uri, start).await;
        });
    }

    async fn run_pull(&self, uri: Url, start: PullStart) {
        let params = DocumentDiagnosticParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            identifier: self.inner.options.identifier.clone(),
            previous_result_id: start.previous_result_id,
        };
        let outcome = match serde_json::to_value(params) {
            Ok(params) => {
                let connection = &self.inner.connection;
                let pending = connection.request(method::DOCUMENT_DIAGNOSTIC, Some(params));
                connection
                    .await_response(pending, start.cancelled, self.inner.timeout)
                    .await
            }
            Err(e) => {
                tracing::warn!(%uri, "Failed to encode diagnostic params: {e}");
                RequestOutcome::Closed
            }
        };
        self.complete(&uri, start.generation, outcome);
    }

    fn complete(&self, uri: &Url, generation: u64, outcome: RequestOutcome) {
        let mut publish = Vec::new();
        let next = {
            let mut state = lock(&self.inner.state);
            let Some(sequence) = state.sequences.get_mut(uri) else {
                return;
            };
            if sequence
                .in_flight
                .as_ref()
                .is_none_or(|in_flight| in_flight.generation != generation)
            {
                return;
            }
            sequence.in_flight = None;

            match outcome {
                RequestOutcome::Response(value) => {
                    match serde_json::from_value::<DocumentDiagnosticReport>(value) {
                        Ok(report) => state.apply_report(uri, report, &mut publish),
                        Err(e) => tracing::warn!(%uri, "Malformed diagnostic report: {e}"),
                    }
                }
                RequestOutcome::Error(error) => match classify(&error) {
                    SoftError::Ignore => {
                        tracing::debug!(%uri, "Diagnostic pull cancelled: {error}");
                    }
                    SoftError::Retrigger => sequence.retrigger = true,
                    SoftError::Failed => tracing::warn!(%uri, "Diagnostic pull failed: {error}"),
                },
                RequestOutcome::Cancelled => {}
                RequestOutcome::TimedOut => {
                    let timeout = self.inner.timeout;
                    tracing::warn!(%uri, "Diagnostic pull timed out after {timeout:?}");
                }
                RequestOutcome::Closed => {
                    tracing::warn!(%uri, "Connection closed during diagnostic pull");
                    sequence.retrigger = false;
                }
            }

            let retrigger = state
                .sequences
                .get_mut(uri)
                .is_some_and(|sequence| std::mem::take(&mut sequence.retrigger));
            if retrigger && !state.disposed {
                state.begin(uri)
            } else {
                None
            }
        };

        for (uri, diagnostics) in publish {
            self.inner
                .sink
                .publish(&self.inner.source, &uri, diagnostics);
        }
        if let Some(start) = next {
            tracing::debug!(%uri, "Retriggering document diagnostics");
            self.spawn_pull(uri.clone(), start);
        }
    }
}
