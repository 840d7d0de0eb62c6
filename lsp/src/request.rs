//! Document-scoped request features (hover, definition, ...).

use std::sync::Mutex;

use parley_types::{DocumentSelector, TextDocument};
use serde_json::{Value, json};

use crate::connection::Connection;
use crate::error::{LspError, RegistrationError};
use crate::lock;
use crate::protocol::{Registration, ServerCapabilities, method};
use crate::registry::{
    DynamicFeature, Registrations, capability_slot, ensure_owned, resolve_selector,
    static_registration,
};

/// A feature that sends one request method for a document.
///
/// Registration options are kept as the provider so callers can inspect
/// server-declared extras.
pub struct DocumentRequestFeature {
    methods: [&'static str; 1],
    server_capability: &'static str,
    client_capability: &'static str,
    connection: Connection,
    registrations: Mutex<Registrations<Value>>,
}

impl DocumentRequestFeature {
    #[must_use]
    pub fn new(
        connection: Connection,
        method: &'static str,
        server_capability: &'static str,
        client_capability: &'static str,
    ) -> Self {
        Self {
            methods: [method],
            server_capability,
            client_capability,
            connection,
            registrations: Mutex::new(Registrations::new()),
        }
    }

    #[must_use]
    pub fn hover(connection: Connection) -> Self {
        Self::new(connection, method::HOVER, "hoverProvider", "hover")
    }

    #[must_use]
    pub fn definition(connection: Connection) -> Self {
        Self::new(connection, method::DEFINITION, "definitionProvider", "definition")
    }

    #[must_use]
    pub fn document_symbol(connection: Connection) -> Self {
        Self::new(
            connection,
            method::DOCUMENT_SYMBOL,
            "documentSymbolProvider",
            "documentSymbol",
        )
    }

    #[must_use]
    pub fn references(connection: Connection) -> Self {
        Self::new(connection, method::REFERENCES, "referencesProvider", "references")
    }

    #[must_use]
    pub fn method(&self) -> &'static str {
        self.methods[0]
    }

    /// Options of the registration serving `document`, if any.
    #[must_use]
    pub fn provider_for(&self, document: &TextDocument) -> Option<Value> {
        lock(&self.registrations)
            .best_for(document.uri(), document.language_id())
            .map(|entry| entry.provider().clone())
    }

    /// Send the request for `document`. `extra` fields (e.g. `position`) are
    /// merged next to `textDocument`. Returns `None` when no registration
    /// covers the document.
    pub async fn request(
        &self,
        document: &TextDocument,
        extra: Value,
    ) -> Result<Option<Value>, LspError> {
        if self.provider_for(document).is_none() {
            return Ok(None);
        }

        let mut params = json!({ "textDocument": { "uri": document.uri() } });
        if let (Some(params), Value::Object(extra)) = (params.as_object_mut(), extra) {
            for (key, value) in extra {
                params.entry(key).or_insert(value);
            }
        }

        let result = self.connection.request(self.method(), Some(params)).await?;
        Ok(Some(result))
    }
}

impl DynamicFeature for DocumentRequestFeature {
    fn methods(&self) -> &[&'static str] {
        &self.methods
    }

    fn fill_client_capabilities(&self, capabilities: &mut Value) {
        capability_slot(capabilities, &["textDocument", self.client_capability])
            ["dynamicRegistration"] = json!(true);
    }

    fn initialize(
        &self,
        capabilities: &ServerCapabilities,
        default_selector: Option<&DocumentSelector>,
    ) -> Result<(), RegistrationError> {
        let Some(registration) = capabilities
            .get(self.server_capability)
            .and_then(|capability| static_registration(self.method(), capability))
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
        ensure_owned(&self.methods, registration)?;
        let options = registration.register_options.as_ref();
        let Some(selector) = resolve_selector(options, default_selector) else {
            tracing::debug!(
                id = %registration.id,
                method = %registration.method,
                "Registration without selector ignored"
            );
            return Ok(());
        };
        lock(&self.registrations).insert(
            registration,
            selector,
            options.cloned().unwrap_or(Value::Null),
        )
    }

    fn unregister(&self, id: &str) -> bool {
        lock(&self.registrations).remove(id).is_some()
    }

    fn contains(&self, id: &str) -> bool {
        lock(&self.registrations).contains(id)
    }

    fn dispose(&self) {
        lock(&self.registrations).drain();
    }
}
