//! Dynamic (un)registration bookkeeping.
//!
//! Each protocol feature implements [`DynamicFeature`] and keeps its live
//! providers in a [`Registrations`] table. [`FeatureRegistry`] routes
//! `client/registerCapability` and `client/unregisterCapability` batches to
//! the feature owning each method.

use std::collections::HashMap;
use std::sync::Arc;

use parley_types::{DocumentSelector, Url, matcher};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::RegistrationError;
use crate::protocol::{Registration, RegistrationParams, ServerCapabilities, UnregistrationParams};

/// One live registration: its selector and the provider built from its options.
#[derive(Debug)]
pub struct RegisteredProvider<P> {
    id: String,
    method: String,
    selector: DocumentSelector,
    provider: P,
}

impl<P> RegisteredProvider<P> {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn selector(&self) -> &DocumentSelector {
        &self.selector
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    #[must_use]
    pub fn into_provider(self) -> P {
        self.provider
    }
}

/// Registrations of one feature, in registration order.
#[derive(Debug)]
pub struct Registrations<P> {
    entries: Vec<RegisteredProvider<P>>,
}

impl<P> Default for Registrations<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<P> Registrations<P> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Store a provider under the registration's id. Ids are unique for as
    /// long as the registration is live.
    pub fn insert(
        &mut self,
        registration: &Registration,
        selector: DocumentSelector,
        provider: P,
    ) -> Result<(), RegistrationError> {
        if self.contains(&registration.id) {
            return Err(RegistrationError::DuplicateId {
                id: registration.id.clone(),
                method: registration.method.clone(),
            });
        }
        self.entries.push(RegisteredProvider {
            id: registration.id.clone(),
            method: registration.method.clone(),
            selector,
            provider,
        });
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<RegisteredProvider<P>> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index))
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RegisteredProvider<P>> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Most specific registration for a document; ties go to the earliest.
    #[must_use]
    pub fn best_for(&self, uri: &Url, language_id: &str) -> Option<&RegisteredProvider<P>> {
        matcher::best_match(&self.entries, |entry| &entry.selector, uri, language_id)
    }

    /// Every registration matching a document, most specific first.
    #[must_use]
    pub fn all_for(&self, uri: &Url, language_id: &str) -> Vec<&RegisteredProvider<P>> {
        matcher::all_matches(&self.entries, |entry| &entry.selector, uri, language_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredProvider<P>> {
        self.entries.iter()
    }

    pub fn drain(&mut self) -> Vec<RegisteredProvider<P>> {
        std::mem::take(&mut self.entries)
    }
}

/// Reject registrations for methods the feature does not own.
pub(crate) fn ensure_owned(
    methods: &[&str],
    registration: &Registration,
) -> Result<(), RegistrationError> {
    if methods.contains(&registration.method.as_str()) {
        Ok(())
    } else {
        Err(RegistrationError::UnownedMethod {
            id: registration.id.clone(),
            method: registration.method.clone(),
        })
    }
}

/// Selector for a registration's options.
///
/// An absent or `null` `documentSelector` falls back to `default_selector`.
/// `None` means the registration is unusable and should be ignored: there is
/// no default, or the selector does not parse.
#[must_use]
pub fn resolve_selector(
    options: Option<&Value>,
    default_selector: Option<&DocumentSelector>,
) -> Option<DocumentSelector> {
    match options.and_then(|options| options.get("documentSelector")) {
        None | Some(Value::Null) => default_selector.cloned(),
        Some(selector) => match serde_json::from_value::<DocumentSelector>(selector.clone()) {
            Ok(selector) => Some(selector),
            Err(e) => {
                tracing::warn!("Ignoring registration with malformed documentSelector: {e}");
                None
            }
        },
    }
}

/// Registration synthesized from a static capability. `true` becomes empty
/// options; an options object keeps its server-supplied `id` when present.
#[must_use]
pub(crate) fn static_registration(method: &str, capability: &Value) -> Option<Registration> {
    let options = match capability {
        Value::Bool(true) => Value::Object(Map::new()),
        Value::Object(_) => capability.clone(),
        _ => return None,
    };
    let id = options
        .get("id")
        .and_then(Value::as_str)
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);
    Some(Registration::new(id, method, Some(options)))
}

/// Object at `path` inside a client-capabilities value, created as needed.
pub(crate) fn capability_slot<'a>(capabilities: &'a mut Value, path: &[&str]) -> &'a mut Value {
    let mut slot = capabilities;
    for key in path {
        if !slot.is_object() {
            *slot = json!({});
        }
        slot = &mut slot[*key];
    }
    if !slot.is_object() {
        *slot = json!({});
    }
    slot
}

/// A protocol feature that can be registered statically or dynamically.
pub trait DynamicFeature: Send + Sync {
    /// Methods this feature owns.
    fn methods(&self) -> &[&'static str];

    /// Advertise client support in the `initialize` request.
    fn fill_client_capabilities(&self, capabilities: &mut Value);

    /// Synthesize registrations from static server capabilities.
    fn initialize(
        &self,
        capabilities: &ServerCapabilities,
        default_selector: Option<&DocumentSelector>,
    ) -> Result<(), RegistrationError>;

    fn register(
        &self,
        registration: &Registration,
        default_selector: Option<&DocumentSelector>,
    ) -> Result<(), RegistrationError>;

    /// Drop the registration with `id`. Returns whether it existed.
    fn unregister(&self, id: &str) -> bool;

    /// Whether a live registration uses `id`.
    fn contains(&self, id: &str) -> bool;

    /// Tear down every live provider.
    fn dispose(&self);
}

/// Method → feature routing table, populated at start-up.
pub struct FeatureRegistry {
    features: Vec<Arc<dyn DynamicFeature>>,
    routes: HashMap<&'static str, Arc<dyn DynamicFeature>>,
    default_selector: Option<DocumentSelector>,
}

impl FeatureRegistry {
    #[must_use]
    pub fn new(default_selector: Option<DocumentSelector>) -> Self {
        Self {
            features: Vec::new(),
            routes: HashMap::new(),
            default_selector,
        }
    }

    /// Route every method of `feature` to it. The first feature to claim a
    /// method keeps it.
    pub fn add(&mut self, feature: Arc<dyn DynamicFeature>) {
        for method in feature.methods() {
            if self.routes.contains_key(method) {
                tracing::warn!("Method {method} already has a feature; ignoring the new one");
                continue;
            }
            self.routes.insert(method, Arc::clone(&feature));
        }
        self.features.push(feature);
    }

    #[must_use]
    pub fn feature_for(&self, method: &str) -> Option<&Arc<dyn DynamicFeature>> {
        self.routes.get(method)
    }

    #[must_use]
    pub fn default_selector(&self) -> Option<&DocumentSelector> {
        self.default_selector.as_ref()
    }

    /// Route a `client/registerCapability` batch. Every registration is
    /// attempted; the first error is returned. An id stays unique across all
    /// features while its registration is live.
    pub fn register_all(&self, params: &RegistrationParams) -> Result<(), RegistrationError> {
        let mut first_error = None;
        for registration in &params.registrations {
            let result = match self.routes.get(registration.method.as_str()) {
                Some(_) if self.contains(&registration.id) => Err(RegistrationError::DuplicateId {
                    id: registration.id.clone(),
                    method: registration.method.clone(),
                }),
                Some(feature) => feature.register(registration, self.default_selector.as_ref()),
                None => Err(RegistrationError::UnknownMethod {
                    method: registration.method.clone(),
                }),
            };
            match result {
                Ok(()) => tracing::debug!(
                    id = %registration.id,
                    method = %registration.method,
                    "Registration added"
                ),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Whether any feature holds a live registration with `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.features.iter().any(|feature| feature.contains(id))
    }

    /// Route a `client/unregisterCapability` batch by method.
    pub fn unregister_all(&self, params: &UnregistrationParams) -> Result<(), RegistrationError> {
        let mut first_error = None;
        for unregistration in &params.unregistrations {
            match self.routes.get(unregistration.method.as_str()) {
                Some(feature) => {
                    if !feature.unregister(&unregistration.id) {
                        tracing::debug!(
                            id = %unregistration.id,
                            method = %unregistration.method,
                            "Unregistration for unknown id"
                        );
                    }
                }
                None => {
                    first_error.get_or_insert(RegistrationError::UnknownMethod {
                        method: unregistration.method.clone(),
                    });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn initialize_all(
        &self,
        capabilities: &ServerCapabilities,
    ) -> Result<(), RegistrationError> {
        for feature in &self.features {
            feature.initialize(capabilities, self.default_selector.as_ref())?;
        }
        Ok(())
    }

    /// Client capabilities advertised by every feature.
    #[must_use]
    pub fn client_capabilities(&self) -> Value {
        let mut capabilities = json!({});
        for feature in &self.features {
            feature.fill_client_capabilities(&mut capabilities);
        }
        capabilities
    }

    pub fn dispose_all(&self) {
        for feature in &self.features {
            feature.dispose();
        }
    }
}
