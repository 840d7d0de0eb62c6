//! `textDocument/diagnostic` registrations and the events that drive them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use parley_types::{DocumentSelector, TextDocument, Url};
use serde_json::{Value, json};

use super::{
    DiagnosticSink, DiagnosticSource, DocumentPullCoordinator, ErrorPolicy, PullReason,
    WorkspacePullCoordinator,
};
use crate::config::DiagnosticSettings;
use crate::connection::Connection;
use crate::error::RegistrationError;
use crate::lock;
use crate::progress::ProgressService;
use crate::protocol::{DiagnosticOptions, Registration, ServerCapabilities, method};
use crate::registry::{
    DynamicFeature, Registrations, capability_slot, ensure_owned, resolve_selector,
    static_registration,
};
use crate::sync::{SyncEvent, SyncListener};

const METHODS: [&str; 1] = [method::DOCUMENT_DIAGNOSTIC];

/// The coordinators built for one registration. Both publish under the
/// registration's own [`DiagnosticSource`].
pub struct DiagnosticProvider {
    source: DiagnosticSource,
    documents: DocumentPullCoordinator,
    workspace: Option<WorkspacePullCoordinator>,
}

impl DiagnosticProvider {
    #[must_use]
    pub fn source(&self) -> &DiagnosticSource {
        &self.source
    }

    #[must_use]
    pub fn documents(&self) -> &DocumentPullCoordinator {
        &self.documents
    }

    /// Present when the registration asked for workspace diagnostics.
    #[must_use]
    pub fn workspace(&self) -> Option<&WorkspacePullCoordinator> {
        self.workspace.as_ref()
    }

    /// Stop both coordinators and withdraw what they published.
    fn dispose(&self, sink: &dyn DiagnosticSink) {
        self.documents.dispose();
        if let Some(workspace) = &self.workspace {
            workspace.dispose();
        }
        sink.retract(&self.source);
    }
}

#[derive(Default)]
struct FeatureState {
    registrations: Registrations<Arc<DiagnosticProvider>>,
    active: Option<TextDocument>,
    visible: HashMap<Url, TextDocument>,
}

impl FeatureState {
    fn providers(&self) -> Vec<Arc<DiagnosticProvider>> {
        self.registrations
            .iter()
            .map(|entry| Arc::clone(entry.provider()))
            .collect()
    }

    /// Active and visible documents, each once, in URI order.
    fn shown_documents(&self) -> Vec<TextDocument> {
        let mut documents: Vec<TextDocument> = self.visible.values().cloned().collect();
        if let Some(active) = &self.active
            && !self.visible.contains_key(active.uri())
        {
            documents.push(active.clone());
        }
        documents.sort_by(|a, b| a.uri().cmp(b.uri()));
        documents
    }
}

/// Pull diagnostics: one provider per registration, fed by UI visibility,
/// sync events and server refresh requests.
///
/// Provider lists are copied out under the lock and triggered after it is
/// released, so coordinators never run while this feature's lock is held.
pub struct DiagnosticFeature {
    connection: Connection,
    progress: ProgressService,
    sink: Arc<dyn DiagnosticSink>,
    settings: DiagnosticSettings,
    error_policy: Option<Arc<dyn ErrorPolicy>>,
    state: Mutex<FeatureState>,
}

impl DiagnosticFeature {
    #[must_use]
    pub fn new(
        connection: Connection,
        progress: ProgressService,
        sink: Arc<dyn DiagnosticSink>,
        settings: DiagnosticSettings,
        error_policy: Option<Arc<dyn ErrorPolicy>>,
    ) -> Self {
        Self {
            connection,
            progress,
            sink,
            settings,
            error_policy,
            state: Mutex::new(FeatureState::default()),
        }
    }

    /// The editor's focused document changed.
    pub fn set_active(&self, document: Option<&TextDocument>) {
        let providers = {
            let mut state = lock(&self.state);
            state.active = document.cloned();
            state.providers()
        };
        if let Some(document) = document {
            trigger(&providers, &[document.clone()], PullReason::BecameActive);
        }
    }

    /// The set of visible documents changed. Newly shown documents pull;
    /// hidden ones that are not active have their requests cancelled.
    pub fn set_visible(&self, documents: &[TextDocument]) {
        let (shown, hidden, providers) = {
            let mut state = lock(&self.state);
            let shown: Vec<TextDocument> = documents
                .iter()
                .filter(|document| !state.visible.contains_key(document.uri()))
                .cloned()
                .collect();
            let next: HashMap<Url, TextDocument> = documents
                .iter()
                .map(|document| (document.uri().clone(), document.clone()))
                .collect();
            let active = state.active.as_ref().map(TextDocument::uri);
            let hidden: Vec<Url> = state
                .visible
                .keys()
                .filter(|uri| !next.contains_key(*uri) && active != Some(*uri))
                .cloned()
                .collect();
            state.visible = next;
            (shown, hidden, state.providers())
        };

        trigger(&providers, &shown, PullReason::BecameVisible);
        for provider in &providers {
            for uri in &hidden {
                provider.documents.cancel(uri);
            }
        }
    }

    /// Forget `uri` and let every other visible document re-check its
    /// dependencies.
    pub fn document_closed(&self, uri: &Url) {
        let (others, providers) = {
            let mut state = lock(&self.state);
            state.visible.remove(uri);
            if state.active.as_ref().is_some_and(|active| active.uri() == uri) {
                state.active = None;
            }
            let mut others: Vec<TextDocument> = state.visible.values().cloned().collect();
            others.sort_by(|a, b| a.uri().cmp(b.uri()));
            (others, state.providers())
        };

        for provider in &providers {
            provider.documents.end(uri);
        }
        trigger(&providers, &others, PullReason::InterFileChange);
    }

    /// Server-requested refresh: re-pull shown documents (those matching
    /// `filter`, when given) and every workspace sequence.
    pub fn refresh(&self, filter: Option<&DocumentSelector>) {
        let (documents, providers) = {
            let state = lock(&self.state);
            let documents: Vec<TextDocument> = state
                .shown_documents()
                .into_iter()
                .filter(|document| {
                    filter.is_none_or(|filter| {
                        filter.matches(document.uri(), document.language_id())
                    })
                })
                .collect();
            (documents, state.providers())
        };

        tracing::debug!(documents = documents.len(), "Refreshing pull diagnostics");
        trigger(&providers, &documents, PullReason::Refresh);
        for workspace in providers.iter().filter_map(|provider| provider.workspace()) {
            workspace.trigger();
        }
    }

    /// Best-matching provider for a document.
    #[must_use]
    pub fn provider_for(&self, document: &TextDocument) -> Option<Arc<DiagnosticProvider>> {
        lock(&self.state)
            .registrations
            .best_for(document.uri(), document.language_id())
            .map(|entry| Arc::clone(entry.provider()))
    }

    #[must_use]
    pub fn workspace_coordinators(&self) -> Vec<WorkspacePullCoordinator> {
        lock(&self.state)
            .providers()
            .iter()
            .filter_map(|provider| provider.workspace().cloned())
            .collect()
    }

    fn pull(&self, document: &TextDocument, reason: PullReason) {
        let providers = lock(&self.state).providers();
        trigger(&providers, &[document.clone()], reason);
    }

    fn pull_workspace(&self) {
        for workspace in self.workspace_coordinators() {
            workspace.trigger();
        }
    }

    fn pull_visible_except(&self, uri: &Url, reason: PullReason) {
        let (others, providers) = {
            let state = lock(&self.state);
            let mut others: Vec<TextDocument> = state
                .visible
                .values()
                .filter(|document| document.uri() != uri)
                .cloned()
                .collect();
            others.sort_by(|a, b| a.uri().cmp(b.uri()));
            (others, state.providers())
        };
        trigger(&providers, &others, reason);
    }

    fn build_provider(
        &self,
        id: &str,
        selector: &DocumentSelector,
        options: DiagnosticOptions,
    ) -> DiagnosticProvider {
        let source = DiagnosticSource::pulled(id);
        let workspace = options.workspace_diagnostics.then(|| {
            WorkspacePullCoordinator::new(
                self.connection.clone(),
                self.progress.clone(),
                options.clone(),
                Arc::clone(&self.sink),
                source.clone(),
                self.settings.workspace_retrigger(),
                self.error_policy.clone(),
            )
        });
        let documents = DocumentPullCoordinator::new(
            self.connection.clone(),
            selector.clone(),
            options,
            Arc::clone(&self.sink),
            source.clone(),
            self.settings.document_timeout(),
        );
        DiagnosticProvider {
            source,
            documents,
            workspace,
        }
    }
}

fn trigger(providers: &[Arc<DiagnosticProvider>], documents: &[TextDocument], reason: PullReason) {
    for provider in providers {
        for document in documents {
            provider
                .documents
                .trigger(document.uri(), document.language_id(), reason);
        }
    }
}

impl SyncListener for DiagnosticFeature {
    fn on_sync_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::Opened(document) => self.pull(document, PullReason::Opened),
            SyncEvent::Changed(document) => {
                if self.settings.on_change {
                    self.pull(document, PullReason::ContentChange);
                }
                self.pull_workspace();
            }
            SyncEvent::Saved(document) => {
                if self.settings.on_save {
                    self.pull(document, PullReason::Saved);
                }
                self.pull_visible_except(document.uri(), PullReason::InterFileChange);
            }
            SyncEvent::Closed(document) => self.document_closed(document.uri()),
        }
    }
}

impl DynamicFeature for DiagnosticFeature {
    fn methods(&self) -> &[&'static str] {
        &METHODS
    }

    fn fill_client_capabilities(&self, capabilities: &mut Value) {
        *capability_slot(capabilities, &["textDocument", "diagnostic"]) = json!({
            "dynamicRegistration": true,
            "relatedDocumentSupport": true
        });
        capability_slot(capabilities, &["workspace", "diagnostics"])["refreshSupport"] =
            json!(true);
    }

    fn initialize(
        &self,
        capabilities: &ServerCapabilities,
        default_selector: Option<&DocumentSelector>,
    ) -> Result<(), RegistrationError> {
        let Some(registration) = capabilities
            .get("diagnosticProvider")
            .and_then(|capability| static_registration(method::DOCUMENT_DIAGNOSTIC, capability))
        else {
            return Ok(());
        };
        self.register(&registration, default_selector)
    }

    fn register(
        &self,
        registration: &Registration,
        default_selector: Option<&DocumentSelector>,
    ) -> Result<(), RegistrationError> {
        ensure_owned(&METHODS, registration)?;
        let raw = registration
            .register_options
            .clone()
            .unwrap_or_else(|| json!({}));
        let options: DiagnosticOptions =
            serde_json::from_value(raw).map_err(|e| RegistrationError::InvalidOptions {
                id: registration.id.clone(),
                method: registration.method.clone(),
                reason: e.to_string(),
            })?;
        let Some(selector) =
            resolve_selector(registration.register_options.as_ref(), default_selector)
        else {
            tracing::debug!(
                id = %registration.id,
                "Diagnostic registration without selector ignored"
            );
            return Ok(());
        };

        let provider = Arc::new(self.build_provider(&registration.id, &selector, options));
        let (documents, active) = {
            let mut state = lock(&self.state);
            state
                .registrations
                .insert(registration, selector, Arc::clone(&provider))?;
            let active = state.active.as_ref().map(|active| active.uri().clone());
            (state.shown_documents(), active)
        };

        tracing::debug!(
            id = %registration.id,
            workspace = provider.workspace.is_some(),
            "Diagnostic provider registered"
        );
        for document in &documents {
            let reason = if active.as_ref() == Some(document.uri()) {
                PullReason::BecameActive
            } else {
                PullReason::BecameVisible
            };
            provider
                .documents
                .trigger(document.uri(), document.language_id(), reason);
        }
        if let Some(workspace) = &provider.workspace {
            workspace.trigger();
        }
        Ok(())
    }

    fn unregister(&self, id: &str) -> bool {
        let removed = lock(&self.state).registrations.remove(id);
        match removed {
            Some(entry) => {
                entry.provider().dispose(self.sink.as_ref());
                true
            }
            None => false,
        }
    }

    fn contains(&self, id: &str) -> bool {
        lock(&self.state).registrations.contains(id)
    }

    fn dispose(&self) {
        let entries = lock(&self.state).registrations.drain();
        for entry in entries {
            entry.provider().dispose(self.sink.as_ref());
        }
    }
}
