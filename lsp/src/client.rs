//! `LanguageClient` facade: the API a host editor drives.
//!
//! The host owns the wire. It feeds every inbound frame through
//! [`ChannelTransport::handle_incoming`](crate::ChannelTransport::handle_incoming)
//! and hands the surfaced server traffic to [`LanguageClient::handle_message`].
//! Document and UI events go through the passthroughs below.

use std::sync::{Arc, Mutex};

use parley_types::{ChangeEvent, Diagnostic, TextDocument, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::time;

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::diagnostics::{
    DiagnosticFeature, DiagnosticSink, DiagnosticSource, DiagnosticsStore, ErrorPolicy,
};
use crate::error::{LspError, RegistrationError};
use crate::lock;
use crate::negotiate::{CapabilityNegotiator, RetryPrompt};
use crate::progress::ProgressService;
use crate::protocol::{
    ClientInfo, InitializeResult, ProgressParams, PublishDiagnosticsParams, RegistrationParams,
    ResponseError, ServerCapabilities, ServerInfo, UnregistrationParams,
    WorkDoneProgressCreateParams, initialize_params, method, to_diagnostics,
};
use crate::reconnect::{RestartDecision, RestartTracker};
use crate::registry::{DynamicFeature, FeatureRegistry};
use crate::request::DocumentRequestFeature;
use crate::rollback::Rollback;
use crate::sync::{MergeStrategy, TextDocumentSync};
use crate::transport::{IncomingMessage, Transport};
use crate::types::{ClientState, DiagnosticsSnapshot};

/// Code-level options that do not belong in a config file.
#[derive(Default)]
pub struct ClientOptions {
    pub root_uri: Option<Url>,
    pub client_info: ClientInfo,
    pub initialization_options: Option<Value>,
    pub merge_strategy: Option<Arc<dyn MergeStrategy>>,
    pub retry_prompt: Option<Arc<dyn RetryPrompt>>,
    pub error_policy: Option<Arc<dyn ErrorPolicy>>,
    /// Routed after the built-in features; a method already claimed stays
    /// with the built-in one.
    pub extra_features: Vec<Arc<dyn DynamicFeature>>,
}

impl ClientOptions {
    #[must_use]
    pub fn with_root_uri(mut self, root_uri: Url) -> Self {
        self.root_uri = Some(root_uri);
        self
    }

    #[must_use]
    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = client_info;
        self
    }

    #[must_use]
    pub fn with_initialization_options(mut self, options: Value) -> Self {
        self.initialization_options = Some(options);
        self
    }

    #[must_use]
    pub fn with_merge_strategy(mut self, merge: Arc<dyn MergeStrategy>) -> Self {
        self.merge_strategy = Some(merge);
        self
    }

    #[must_use]
    pub fn with_retry_prompt(mut self, prompt: Arc<dyn RetryPrompt>) -> Self {
        self.retry_prompt = Some(prompt);
        self
    }

    #[must_use]
    pub fn with_error_policy(mut self, policy: Arc<dyn ErrorPolicy>) -> Self {
        self.error_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn with_feature(mut self, feature: Arc<dyn DynamicFeature>) -> Self {
        self.extra_features.push(feature);
        self
    }
}

/// One connection to one language server.
pub struct LanguageClient {
    config: ClientConfig,
    root_uri: Option<Url>,
    client_info: ClientInfo,
    initialization_options: Option<Value>,
    retry_prompt: Option<Arc<dyn RetryPrompt>>,
    connection: Connection,
    progress: ProgressService,
    diagnostics: Arc<DiagnosticsStore>,
    sync: Arc<TextDocumentSync>,
    diagnostic_feature: Arc<DiagnosticFeature>,
    requests: Vec<Arc<DocumentRequestFeature>>,
    registry: Arc<FeatureRegistry>,
    state: Arc<Mutex<ClientState>>,
    server: Mutex<Option<InitializeResult>>,
    restarts: Mutex<RestartTracker>,
}

impl LanguageClient {
    /// Build every feature over `transport`. Must be called inside a Tokio
    /// runtime: the sync engine starts its debounce worker here.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        options: ClientOptions,
    ) -> Self {
        let connection = Connection::new(transport);
        let progress = ProgressService::new();
        let diagnostics = Arc::new(DiagnosticsStore::new());

        let sync = TextDocumentSync::new(
            connection.clone(),
            config.change_debounce(),
            options.merge_strategy,
        );
        let sink: Arc<dyn DiagnosticSink> = diagnostics.clone();
        let diagnostic_feature = Arc::new(DiagnosticFeature::new(
            connection.clone(),
            progress.clone(),
            sink,
            config.diagnostics.clone(),
            options.error_policy,
        ));
        sync.add_listener(diagnostic_feature.clone());

        let requests = vec![
            Arc::new(DocumentRequestFeature::hover(connection.clone())),
            Arc::new(DocumentRequestFeature::definition(connection.clone())),
            Arc::new(DocumentRequestFeature::document_symbol(connection.clone())),
            Arc::new(DocumentRequestFeature::references(connection.clone())),
        ];

        let mut registry = FeatureRegistry::new(config.document_selector.clone());
        registry.add(sync.clone());
        registry.add(diagnostic_feature.clone());
        for feature in &requests {
            registry.add(feature.clone());
        }
        for feature in options.extra_features {
            registry.add(feature);
        }

        Self {
            root_uri: options.root_uri,
            client_info: options.client_info,
            initialization_options: options.initialization_options,
            retry_prompt: options.retry_prompt,
            connection,
            progress,
            diagnostics,
            sync,
            diagnostic_feature,
            requests,
            registry: Arc::new(registry),
            state: Arc::new(Mutex::new(ClientState::Starting)),
            server: Mutex::new(None),
            restarts: Mutex::new(RestartTracker::new(config.reconnect)),
            config,
        }
    }

    /// Run the `initialize` handshake, register static capabilities and send
    /// `initialized`. On failure every feature is disposed again.
    pub async fn initialize(&self) -> Result<InitializeResult, LspError> {
        *lock(&self.state) = ClientState::Starting;

        let mut rollback = Rollback::new();
        let state = Arc::clone(&self.state);
        rollback.push(move || *lock(&state) = ClientState::Stopped);

        let mut negotiator =
            CapabilityNegotiator::new(self.connection.clone(), self.config.initialize_timeout())
                .with_progress(self.progress.clone());
        if let Some(prompt) = &self.retry_prompt {
            negotiator = negotiator.with_retry_prompt(Arc::clone(prompt));
        }
        let params = initialize_params(
            self.root_uri.as_ref(),
            &self.client_info,
            self.registry.client_capabilities(),
            self.initialization_options.clone(),
        );
        let result = negotiator.initialize(params).await?;

        self.connection
            .notify(method::INITIALIZED, Some(json!({})))?;
        // Static registrations may reopen documents the host still holds,
        // which must follow `initialized`.
        let registry = Arc::clone(&self.registry);
        rollback.push(move || registry.dispose_all());
        self.registry.initialize_all(&result.capabilities)?;
        rollback.commit();

        tracing::info!(
            server = result.server_info.as_ref().map_or("unknown", |info| info.name.as_str()),
            "Language server initialized"
        );
        *lock(&self.server) = Some(result.clone());
        *lock(&self.state) = ClientState::Running;
        Ok(result)
    }

    /// Dispatch one server request or notification surfaced by the transport.
    /// Requests are always answered.
    pub fn handle_message(&self, message: IncomingMessage) {
        match message {
            IncomingMessage::Request { id, method, params } => {
                let result = self.handle_request(&method, params);
                if let Err(e) = self.connection.respond(&id, result) {
                    tracing::warn!("Failed to answer {method}: {e}");
                }
            }
            IncomingMessage::Notification { method, params } => {
                self.handle_notification(&method, params);
            }
        }
    }

    fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Value, ResponseError> {
        match method {
            method::REGISTER_CAPABILITY => {
                let params: RegistrationParams = decode(params)?;
                self.registry
                    .register_all(&params)
                    .map_err(registration_rejected)?;
                Ok(Value::Null)
            }
            method::UNREGISTER_CAPABILITY => {
                let params: UnregistrationParams = decode(params)?;
                self.registry
                    .unregister_all(&params)
                    .map_err(registration_rejected)?;
                Ok(Value::Null)
            }
            method::WORK_DONE_PROGRESS_CREATE => {
                let params: WorkDoneProgressCreateParams = decode(params)?;
                self.progress.accept_server_token(params.token);
                Ok(Value::Null)
            }
            method::WORKSPACE_DIAGNOSTIC_REFRESH => {
                self.diagnostic_feature.refresh(None);
                Ok(Value::Null)
            }
            _ => {
                tracing::debug!("Unhandled server request {method}");
                Err(ResponseError::method_not_found(method))
            }
        }
    }

    fn handle_notification(&self, method: &str, params: Option<Value>) {
        match method {
            method::PROGRESS => match decode::<ProgressParams>(params) {
                Ok(params) => {
                    self.progress.handle_progress(params);
                }
                Err(e) => tracing::warn!("Malformed $/progress: {}", e.message),
            },
            method::PUBLISH_DIAGNOSTICS => match decode::<PublishDiagnosticsParams>(params) {
                Ok(params) => {
                    tracing::debug!(
                        uri = %params.uri,
                        count = params.diagnostics.len(),
                        "Diagnostics pushed"
                    );
                    self.diagnostics.update(
                        &DiagnosticSource::Pushed,
                        &params.uri,
                        to_diagnostics(&params.diagnostics),
                    );
                }
                Err(e) => tracing::warn!("Malformed publishDiagnostics: {}", e.message),
            },
            _ => tracing::trace!("Ignoring notification {method}"),
        }
    }

    // ── Document passthroughs ──────────────────────────────────────────

    pub fn did_open(&self, document: &TextDocument) {
        self.sync.did_open(document);
    }

    /// Call before applying an edit, with the pre-edit snapshot.
    pub fn will_change(&self, before: &TextDocument) {
        self.sync.will_change(before);
    }

    pub fn did_change(&self, event: &ChangeEvent) {
        self.sync.did_change(event);
    }

    pub fn did_save(&self, document: &TextDocument) {
        self.sync.did_save(document);
    }

    pub fn did_close(&self, document: &TextDocument) {
        self.sync.did_close(document);
    }

    // ── UI passthroughs ────────────────────────────────────────────────

    pub fn set_active(&self, document: Option<&TextDocument>) {
        self.diagnostic_feature.set_active(document);
    }

    pub fn set_visible(&self, documents: &[TextDocument]) {
        self.diagnostic_feature.set_visible(documents);
    }

    // ── Requests ───────────────────────────────────────────────────────

    /// Send a document-scoped request (`textDocument/hover`, ...). Returns
    /// `None` when no registration covers the document.
    pub async fn request(
        &self,
        method: &str,
        document: &TextDocument,
        extra: Value,
    ) -> Result<Option<Value>, LspError> {
        let Some(feature) = self.requests.iter().find(|feature| feature.method() == method) else {
            return Ok(None);
        };
        feature.request(document, extra).await
    }

    /// Flush, send `shutdown` (bounded by the shutdown timeout), then `exit`,
    /// and dispose every feature.
    pub async fn shutdown(&self) {
        *lock(&self.state) = ClientState::Stopping;
        self.sync.flush();

        let pending = self.connection.request(method::SHUTDOWN, None);
        let id = pending.id().clone();
        match time::timeout(self.config.shutdown_timeout(), pending).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("shutdown request failed: {e}"),
            Err(_) => {
                tracing::warn!(
                    "shutdown timed out after {}ms",
                    self.config.shutdown_timeout().as_millis()
                );
                self.connection.cancel(&id);
            }
        }
        if let Err(e) = self.connection.notify(method::EXIT, None) {
            tracing::debug!("Failed to send exit: {e}");
        }

        self.registry.dispose_all();
        *lock(&self.state) = ClientState::Stopped;
    }

    // ── Reconnect ──────────────────────────────────────────────────────

    /// The server went away without a shutdown. Tears the session down and
    /// records the crash against the reconnect policy. On
    /// [`RestartDecision::Restart`] the host starts a new server process and
    /// hands its transport to [`restart`](Self::restart).
    pub fn connection_lost(&self) -> RestartDecision {
        let decision = lock(&self.restarts).record_crash();
        tracing::warn!(?decision, "Language server connection lost");
        self.registry.dispose_all();
        self.diagnostics.clear();
        *lock(&self.server) = None;
        *lock(&self.state) = ClientState::Stopped;
        decision
    }

    /// Re-run the handshake over a new transport. Documents the host still
    /// has open are sent again once the server registers `didOpen`.
    pub async fn restart(
        &self,
        transport: Arc<dyn Transport>,
    ) -> Result<InitializeResult, LspError> {
        if lock(&self.restarts).exhausted() {
            return Err(LspError::RestartsExhausted);
        }
        self.connection.replace_transport(transport);
        self.initialize().await
    }

    // ── Accessors ──────────────────────────────────────────────────────

    #[must_use]
    pub fn state(&self) -> ClientState {
        *lock(&self.state)
    }

    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        lock(&self.server)
            .as_ref()
            .and_then(|result| result.server_info.clone())
    }

    #[must_use]
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        lock(&self.server)
            .as_ref()
            .map(|result| result.capabilities.clone())
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Error diagnostics for the given documents.
    #[must_use]
    pub fn errors_for(&self, uris: &[Url]) -> Vec<(Url, Vec<Diagnostic>)> {
        self.diagnostics.errors_for(uris)
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Arc<DiagnosticsStore> {
        &self.diagnostics
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressService {
        &self.progress
    }

    #[must_use]
    pub fn sync(&self) -> &Arc<TextDocumentSync> {
        &self.sync
    }

    #[must_use]
    pub fn diagnostic_feature(&self) -> &Arc<DiagnosticFeature> {
        &self.diagnostic_feature
    }

    #[must_use]
    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }
}

fn decode<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ResponseError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| ResponseError::invalid_params(e.to_string()))
}

/// Registration contract violations are answered, never dropped.
fn registration_rejected(error: RegistrationError) -> ResponseError {
    tracing::error!("Rejected server registration: {error}");
    ResponseError::invalid_params(error.to_string())
}
