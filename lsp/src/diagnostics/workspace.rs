//! The workspace-wide pull sequence.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use parley_types::{Diagnostic, Url};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{DiagnosticSink, DiagnosticSource, ErrorAction, ErrorPolicy, SoftError, classify};
use crate::connection::{Connection, RequestOutcome};
use crate::error::LspError;
use crate::lock;
use crate::progress::{ProgressService, ProgressSubscription};
use crate::protocol::{
    DiagnosticOptions, PreviousResultId, ProgressToken, WorkspaceDiagnosticParams,
    WorkspaceDiagnosticReport, WorkspaceDocumentDiagnosticReport, method, to_diagnostics,
};

struct InFlight {
    generation: u64,
    cancel: Option<oneshot::Sender<()>>,
}

struct RetriggerTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct WorkspaceState {
    result_ids: BTreeMap<Url, String>,
    in_flight: Option<InFlight>,
    retrigger: bool,
    next_generation: u64,
    timer: Option<RetriggerTimer>,
    disposed: bool,
}

impl WorkspaceState {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn begin(&mut self) -> PullStart {
        let generation = self.next_generation();
        let (cancel, cancelled) = oneshot::channel();
        self.in_flight = Some(InFlight {
            generation,
            cancel: Some(cancel),
        });
        PullStart {
            generation,
            previous_result_ids: self
                .result_ids
                .iter()
                .map(|(uri, value)| PreviousResultId {
                    uri: uri.clone(),
                    value: value.clone(),
                })
                .collect(),
            cancelled,
        }
    }

    fn cancel_in_flight(&mut self) {
        if let Some(cancel) = self.in_flight.as_mut().and_then(|f| f.cancel.take()) {
            let _ = cancel.send(());
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation)
    }

    /// Record result ids; returns the diagnostics to publish.
    fn apply_items(
        &mut self,
        items: Vec<WorkspaceDocumentDiagnosticReport>,
    ) -> Vec<(Url, Vec<Diagnostic>)> {
        let mut publish = Vec::new();
        for item in items {
            match item {
                WorkspaceDocumentDiagnosticReport::Full {
                    uri,
                    result_id,
                    items,
                    ..
                } => {
                    match result_id {
                        Some(result_id) => self.result_ids.insert(uri.clone(), result_id),
                        None => self.result_ids.remove(&uri),
                    };
                    publish.push((uri, to_diagnostics(&items)));
                }
                WorkspaceDocumentDiagnosticReport::Unchanged { uri, result_id, .. } => {
                    self.result_ids.insert(uri, result_id);
                }
            }
        }
        publish
    }
}

struct PullStart {
    generation: u64,
    previous_result_ids: Vec<PreviousResultId>,
    cancelled: oneshot::Receiver<()>,
}

/// The single `workspace/diagnostic` sequence of one registration.
///
/// Partial results stream in through `$/progress` and are applied like the
/// final response. After a clean completion an optional timer pulls again.
#[derive(Clone)]
pub struct WorkspacePullCoordinator {
    inner: Arc<WorkspaceInner>,
}

struct WorkspaceInner {
    connection: Connection,
    progress: ProgressService,
    options: DiagnosticOptions,
    sink: Arc<dyn DiagnosticSink>,
    source: DiagnosticSource,
    retrigger_after: Option<Duration>,
    error_policy: Option<Arc<dyn ErrorPolicy>>,
    state: Mutex<WorkspaceState>,
}

impl WorkspacePullCoordinator {
    #[must_use]
    pub fn new(
        connection: Connection,
        progress: ProgressService,
        options: DiagnosticOptions,
        sink: Arc<dyn DiagnosticSink>,
    source: DiagnosticSource,
        retrigger_after: Option<Duration>,
        error_policy: Option<Arc<dyn ErrorPolicy>>,
    ) -> Self {
        Self {
            inner: Arc::new(WorkspaceInner {
                connection,
                progress,
                options,
                sink,
                source,
                retrigger_after,
                error_policy,
                state: Mutex::new(WorkspaceState::default()),
            }),
        }
    }

    /// Pull now. A pending auto-retrigger is cancelled first; a request in
    /// flight is cancelled and followed by exactly one new request.
    pub fn trigger(&self) {
        let start = {
            let mut state = lock(&self.inner.state);
            if state.disposed {
                return;
            }
            if let Some(timer) = state.timer.take() {
                timer.handle.abort();
            }
            if state.in_flight.is_some() {
                tracing::debug!("Superseding in-flight workspace diagnostic pull");
                state.retrigger = true;
                state.cancel_in_flight();
                return;
            }
            state.begin()
        };
        self.spawn_pull(start);
    }

    /// Stop for good: cancel the request in flight and any pending timer.
    pub fn dispose(&self) {
        let mut state = lock(&self.inner.state);
        state.disposed = true;
        state.retrigger = false;
        if let Some(timer) = state.timer.take() {
            timer.handle.abort();
        }
        state.cancel_in_flight();
    }

    /// Set once disposed, either explicitly or by the error policy.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        lock(&self.inner.state).disposed
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        lock(&self.inner.state).in_flight.is_some()
    }

    #[must_use]
    pub fn result_ids(&self) -> BTreeMap<Url, String> {
        lock(&self.inner.state).result_ids.clone()
    }

    fn spawn_pull(&self, start: PullStart) {
        tracing::debug!(
            known = start.previous_result_ids.len(),
            "Pulling workspace diagnostics"
        );
        let coordinator = self.clone();
        self.inner.connection.spawn(async move {
            coordinator.run_pull(start).await;
        });
    }

    async fn run_pull(&self, start: PullStart) {
        let token = self.inner.progress.create_token();
        let subscription = self.subscribe_partials(token.clone(), start.generation);
        let params = WorkspaceDiagnosticParams {
            identifier: self.inner.options.identifier.clone(),
            previous_result_ids: start.previous_result_ids,
            partial_result_token: Some(token),
        };
        let outcome = match serde_json::to_value(params) {
            Ok(params) => {
                let connection = &self.inner.connection;
                let pending = connection.request(method::WORKSPACE_DIAGNOSTIC, Some(params));
                connection.await_response(pending, start.cancelled, None).await
            }
            Err(e) => {
                tracing::warn!("Failed to encode workspace diagnostic params: {e}");
                RequestOutcome::Closed
            }
        };
        drop(subscription);
        self.complete(start.generation, outcome);
    }

    fn subscribe_partials(
        &self,
        token: ProgressToken,
        generation: u64,
    ) -> ProgressSubscription {
        let inner = Arc::downgrade(&self.inner);
        self.inner.progress.subscribe(token, move |value| {
            if let Some(inner) = inner.upgrade() {
                Self { inner }.apply_partial(generation, value);
            }
        })
    }

    fn apply_partial(&self, generation: u64, value: &Value) {
        let report = match serde_json::from_value::<WorkspaceDiagnosticReport>(value.clone()) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Malformed partial workspace diagnostics: {e}");
                return;
            }
        };
        let publish = {
            let mut state = lock(&self.inner.state);
            if state.disposed || !state.is_current(generation) {
                return;
            }
            state.apply_items(report.items)
        };
        self.publish(publish);
    }

    fn complete(&self, generation: u64, outcome: RequestOutcome) {
        let mut publish = Vec::new();
        let mut failure = None;
        let next = {
            let mut state = lock(&self.inner.state);
            if !state.is_current(generation) {
                return;
            }
            state.in_flight = None;

            let mut clean = false;
            match outcome {
                RequestOutcome::Response(value) => {
                    match serde_json::from_value::<WorkspaceDiagnosticReport>(value) {
                        Ok(report) => {
                            publish = state.apply_items(report.items);
                            clean = true;
                        }
                        Err(e) => failure = Some(LspError::Json(e)),
                    }
                }
                RequestOutcome::Error(error) => match classify(&error) {
                    SoftError::Ignore => {
                        tracing::debug!("Workspace diagnostic pull cancelled: {error}");
                    }
                    SoftError::Retrigger => state.retrigger = true,
                    SoftError::Failed => failure = Some(LspError::Response(error)),
                },
                RequestOutcome::Cancelled | RequestOutcome::TimedOut => {}
                RequestOutcome::Closed => {
                    state.retrigger = false;
                    failure = Some(LspError::TransportClosed);
                }
            }

            if state.disposed {
                // A disposed provider has already withdrawn its diagnostics.
                publish.clear();
                None
            } else if std::mem::take(&mut state.retrigger) {
                Some(state.begin())
            } else {
                if clean && let Some(delay) = self.inner.retrigger_after {
                    let generation = state.next_generation();
                    let handle = self.spawn_timer(delay, generation);
                    state.timer = Some(RetriggerTimer { generation, handle });
                }
                None
            }
        };

        self.publish(publish);

        if let Some(error) = failure {
            tracing::warn!("Workspace diagnostic pull failed: {error}");
            if let Some(policy) = &self.inner.error_policy
                && policy.on_error(&error) == ErrorAction::Stop
            {
                tracing::warn!("Disabling workspace diagnostics after error");
                self.dispose();
                return;
            }
        }

        if let Some(start) = next {
            self.spawn_pull(start);
        }
    }

    fn spawn_timer(&self, delay: Duration, generation: u64) -> JoinHandle<()> {
        let inner: Weak<WorkspaceInner> = Arc::downgrade(&self.inner);
        self.inner.connection.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            {
                let mut state = lock(&inner.state);
                if state
                    .timer
                    .as_ref()
                    .is_none_or(|timer| timer.generation != generation)
                {
                    return;
                }
                state.timer = None;
            }
            tracing::debug!("Auto-retriggering workspace diagnostics");
            Self { inner }.trigger();
        })
    }

    fn publish(&self, publish: Vec<(Url, Vec<Diagnostic>)>) {
        for (uri, diagnostics) in publish {
            self.inner
                .sink
                .publish(&self.inner.source, &uri, diagnostics);
        }
    }
}
