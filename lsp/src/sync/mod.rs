//! Text document synchronization.
//!
//! [`TextDocumentSync`] owns the four sync methods. It tracks the last
//! version sent per document and batches edits in a single pending slot that
//! is flushed by a debounce timer, by [`TextDocumentSync::flush`], or by any
//! other message the [`Connection`] sends.

mod merge;
mod pending;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use parley_types::{ChangeEvent, DocumentSelector, DocumentVersion, TextDocument, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use uuid::Uuid;

pub use merge::{ChangeMerger, CoalescingMerge, MergeStrategy, MergedChanges};
use pending::{PendingChange, PendingChangeManager};

use crate::connection::{Connection, PendingFlush};
use crate::error::RegistrationError;
use crate::lock;
use crate::protocol::{
    Registration, SaveOptions, ServerCapabilities, TextDocumentChangeRegistrationOptions,
    TextDocumentSyncKind, TextDocumentSyncOptions, did_change_params, did_close_params,
    did_open_params, did_save_params, method,
};
use crate::registry::{
    DynamicFeature, Registrations, capability_slot, ensure_owned, resolve_selector,
};

const SYNC_METHODS: [&str; 4] = [
    method::DID_OPEN,
    method::DID_CHANGE,
    method::DID_CLOSE,
    method::DID_SAVE,
];

/// Emitted after a sync notification went out (or, for `Closed`, after the
/// host closed the document).
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Opened(TextDocument),
    Changed(TextDocument),
    Saved(TextDocument),
    Closed(TextDocument),
}

/// Observer of [`SyncEvent`]s. Called without any sync lock held.
pub trait SyncListener: Send + Sync {
    fn on_sync_event(&self, event: &SyncEvent);
}

enum FlushSchedule {
    At(Instant),
    Cancel,
}

#[derive(Default)]
struct SyncState {
    open: Registrations<()>,
    change: Registrations<TextDocumentSyncKind>,
    save: Registrations<SaveOptions>,
    close: Registrations<()>,
    /// Last version sent per open document.
    synced: HashMap<Url, DocumentVersion>,
    /// Latest snapshot the host reported per document.
    documents: HashMap<Url, TextDocument>,
    pending: PendingChangeManager,
}

impl SyncState {
    /// Ids are shared by the four tables.
    fn contains(&self, id: &str) -> bool {
        self.open.contains(id)
            || self.change.contains(id)
            || self.save.contains(id)
            || self.close.contains(id)
    }

    fn change_kind(&self, document: &TextDocument) -> TextDocumentSyncKind {
        self.change
            .best_for(document.uri(), document.language_id())
            .map_or(TextDocumentSyncKind::None, |entry| *entry.provider())
    }
}

pub struct TextDocumentSync {
    connection: Connection,
    debounce: Duration,
    state: Mutex<SyncState>,
    schedule: mpsc::UnboundedSender<FlushSchedule>,
    listeners: Mutex<Vec<Arc<dyn SyncListener>>>,
}

impl TextDocumentSync {
    /// Create the engine, start its debounce worker and hook it into the
    /// connection's flush-before-send path. Must run inside a Tokio runtime.
    #[must_use]
    pub fn new(
        connection: Connection,
        debounce: Duration,
        merge: Option<Arc<dyn MergeStrategy>>,
    ) -> Arc<Self> {
        let (schedule, schedule_rx) = mpsc::unbounded_channel();
        let sync = Arc::new(Self {
            connection: connection.clone(),
            debounce,
            state: Mutex::new(SyncState {
                pending: PendingChangeManager::new(merge),
                ..SyncState::default()
            }),
            schedule,
            listeners: Mutex::new(Vec::new()),
        });

        let hook: Weak<dyn PendingFlush> = Arc::downgrade(&sync) as Weak<dyn PendingFlush>;
        connection.add_flush_hook(hook);
        connection.spawn(debounce_worker(Arc::downgrade(&sync), schedule_rx));
        sync
    }

    pub fn add_listener(&self, listener: Arc<dyn SyncListener>) {
        lock(&self.listeners).push(listener);
    }

    /// A document was opened (or first reported) by the host.
    pub fn did_open(&self, document: &TextDocument) {
        let mut events = Vec::new();
        {
            let mut state = lock(&self.state);
            state
                .documents
                .insert(document.uri().clone(), document.clone());
            self.open_locked(&mut state, document, &mut events);
        }
        self.dispatch(&events);
    }

    /// Before an edit is applied to `before`.
    pub fn will_change(&self, before: &TextDocument) {
        let mut events = Vec::new();
        {
            let mut state = lock(&self.state);
            let Some(synced) = state.synced.get(before.uri()).copied() else {
                return;
            };
            if before.version() < synced {
                return;
            }
            let kind = state.change_kind(before);
            if kind == TextDocumentSyncKind::None {
                return;
            }
            if let Some(displaced) = state.pending.will_add_change(before, kind) {
                self.send_pending(&mut state, displaced, &mut events);
            }
        }
        self.dispatch(&events);
    }

    /// After an edit was applied. Queues the deltas and restarts the debounce
    /// timer.
    pub fn did_change(&self, event: &ChangeEvent) {
        let uri = event.document.uri();
        let version = event.document.version();
        let mut events = Vec::new();
        {
            let mut state = lock(&self.state);
            if state
                .documents
                .get(uri)
                .is_none_or(|known| known.version() < version)
            {
                state.documents.insert(uri.clone(), event.document.clone());
            }

            if event.is_empty() {
                return;
            }
            let Some(synced) = state.synced.get(uri).copied() else {
                return;
            };
            if version <= synced
                || state
                    .pending
                    .pending_version(uri)
                    .is_some_and(|pending| version <= pending)
            {
                tracing::debug!(%uri, %version, "Ignoring stale change");
                return;
            }
            let kind = state.change_kind(&event.document);
            if kind == TextDocumentSyncKind::None {
                return;
            }
            if let Some(displaced) = state.pending.add_change(event, kind) {
                self.send_pending(&mut state, displaced, &mut events);
            }
            // Closed receiver means the runtime is gone; flush() still works.
            let _ = self
                .schedule
                .send(FlushSchedule::At(Instant::now() + self.debounce));
        }
        self.dispatch(&events);
    }

    pub fn did_save(&self, document: &TextDocument) {
        let mut events = Vec::new();
        {
            let mut state = lock(&self.state);
            self.flush_locked(&mut state, &mut events);
            if state.synced.contains_key(document.uri()) {
                let save = state
                    .save
                    .best_for(document.uri(), document.language_id())
                    .map(|entry| *entry.provider());
                if let Some(options) = save {
                    let text = options.include_text.then(|| document.text());
                    self.send(method::DID_SAVE, did_save_params(document.uri(), text));
                }
                events.push(SyncEvent::Saved(document.clone()));
            }
        }
        self.dispatch(&events);
    }

    pub fn did_close(&self, document: &TextDocument) {
        let mut events = Vec::new();
        {
            let mut state = lock(&self.state);
            self.flush_locked(&mut state, &mut events);
            let uri = document.uri();
            state.documents.remove(uri);
            let was_synced = state.synced.remove(uri).is_some();
            if was_synced
                && state
                    .close
                    .best_for(uri, document.language_id())
                    .is_some()
            {
                self.send(method::DID_CLOSE, did_close_params(uri));
            }
            events.push(SyncEvent::Closed(document.clone()));
        }
        self.dispatch(&events);
    }

    /// Send the pending change now, if any.
    pub fn flush(&self) {
        let mut events = Vec::new();
        {
            let mut state = lock(&self.state);
            self.flush_locked(&mut state, &mut events);
        }
        self.dispatch(&events);
    }

    #[must_use]
    pub fn synced_version(&self, uri: &Url) -> Option<DocumentVersion> {
        lock(&self.state).synced.get(uri).copied()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        lock(&self.state).pending.has_pending()
    }

    #[must_use]
    pub fn is_synced(&self, uri: &Url) -> bool {
        lock(&self.state).synced.contains_key(uri)
    }

    fn open_locked(
        &self,
        state: &mut SyncState,
        document: &TextDocument,
        events: &mut Vec<SyncEvent>,
    ) {
        if state.synced.contains_key(document.uri())
            || state
                .open
                .best_for(document.uri(), document.language_id())
                .is_none()
        {
            return;
        }
        self.flush_locked(state, events);
        self.send(method::DID_OPEN, did_open_params(document));
        state
            .synced
            .insert(document.uri().clone(), document.version());
        events.push(SyncEvent::Opened(document.clone()));
    }

    fn flush_locked(&self, state: &mut SyncState, events: &mut Vec<SyncEvent>) {
        let _ = self.schedule.send(FlushSchedule::Cancel);
        if let Some(pending) = state.pending.take() {
            self.send_pending(state, pending, events);
        }
    }

    /// Emit one `didChange` for `pending` if it is ahead of the synced version.
    fn send_pending(
        &self,
        state: &mut SyncState,
        pending: PendingChange,
        events: &mut Vec<SyncEvent>,
    ) {
        let Some(document) = pending.document().cloned() else {
            return;
        };
        let uri = document.uri();
        let Some(synced) = state.synced.get(uri).copied() else {
            return;
        };
        if document.version() <= synced {
            return;
        }
        let kind = state.change_kind(&document);
        if kind == TextDocumentSyncKind::None {
            return;
        }
        let Some(changes) = pending.into_content_changes(kind == TextDocumentSyncKind::Full)
        else {
            return;
        };

        self.send(
            method::DID_CHANGE,
            did_change_params(uri, document.version(), &changes),
        );
        state.synced.insert(uri.clone(), document.version());
        events.push(SyncEvent::Changed(document));
    }

    /// Sends from inside the state lock skip the flush hook, which would
    /// re-enter this engine.
    fn send(&self, method: &str, params: Value) {
        if let Err(e) = self.connection.notify_unflushed(method, Some(params)) {
            tracing::warn!("Failed to send {method}: {e}");
        }
    }

    fn dispatch(&self, events: &[SyncEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Arc<dyn SyncListener>> = lock(&self.listeners).clone();
        for event in events {
            for listener in &listeners {
                listener.on_sync_event(event);
            }
        }
    }
}

impl PendingFlush for TextDocumentSync {
    fn flush_pending(&self) {
        self.flush();
    }
}

impl DynamicFeature for TextDocumentSync {
    fn methods(&self) -> &[&'static str] {
        &SYNC_METHODS
    }

    fn fill_client_capabilities(&self, capabilities: &mut Value) {
        *capability_slot(capabilities, &["textDocument", "synchronization"]) = json!({
            "dynamicRegistration": true,
            "willSave": false,
            "willSaveWaitUntil": false,
            "didSave": true
        });
    }

    fn initialize(
        &self,
        capabilities: &ServerCapabilities,
        default_selector: Option<&DocumentSelector>,
    ) -> Result<(), RegistrationError> {
        let Some(options) = capabilities
            .get("textDocumentSync")
            .and_then(TextDocumentSyncOptions::from_capability)
        else {
            return Ok(());
        };

        let mut registrations = Vec::new();
        if options.open_close {
            registrations.push((method::DID_OPEN, json!({})));
            registrations.push((method::DID_CLOSE, json!({})));
        }
        if options.change != TextDocumentSyncKind::None {
            registrations.push((
                method::DID_CHANGE,
                json!({ "syncKind": u8::from(options.change) }),
            ));
        }
        if let Some(save) = options.save {
            registrations.push((method::DID_SAVE, json!({ "includeText": save.include_text })));
        }

        for (method, options) in registrations {
            let registration = Registration::new(Uuid::new_v4().to_string(), method, Some(options));
            self.register(&registration, default_selector)?;
        }
        Ok(())
    }

    fn register(
        &self,
        registration: &Registration,
        default_selector: Option<&DocumentSelector>,
    ) -> Result<(), RegistrationError> {
        ensure_owned(&SYNC_METHODS, registration)?;
        let Some(selector) =
            resolve_selector(registration.register_options.as_ref(), default_selector)
        else {
            tracing::debug!(
                id = %registration.id,
                method = %registration.method,
                "Registration without selector ignored"
            );
            return Ok(());
        };

        let mut events = Vec::new();
        {
            let mut state = lock(&self.state);
            if state.contains(&registration.id) {
                return Err(RegistrationError::DuplicateId {
                    id: registration.id.clone(),
                    method: registration.method.clone(),
                });
            }
            match registration.method.as_str() {
                method::DID_OPEN => {
                    state.open.insert(registration, selector, ())?;
                    let mut known: Vec<TextDocument> = state.documents.values().cloned().collect();
                    known.sort_by(|a, b| a.uri().cmp(b.uri()));
                    for document in &known {
                        self.open_locked(&mut state, document, &mut events);
                    }
                }
                method::DID_CHANGE => {
                    let options: TextDocumentChangeRegistrationOptions =
                        decode_options(registration)?;
                    state.change.insert(registration, selector, options.sync_kind)?;
                }
                method::DID_SAVE => {
                    let options: Option<SaveOptions> = decode_options(registration)?;
                    state
                        .save
                        .insert(registration, selector, options.unwrap_or_default())?;
                }
                _ => state.close.insert(registration, selector, ())?,
            }
        }
        self.dispatch(&events);
        Ok(())
    }

    fn unregister(&self, id: &str) -> bool {
        let mut state = lock(&self.state);
        state.open.remove(id).is_some()
            || state.change.remove(id).is_some()
            || state.save.remove(id).is_some()
            || state.close.remove(id).is_some()
    }

    fn contains(&self, id: &str) -> bool {
        lock(&self.state).contains(id)
    }

    fn dispose(&self) {
        let _ = self.schedule.send(FlushSchedule::Cancel);
        let mut state = lock(&self.state);
        state.open.drain();
        state.change.drain();
        state.save.drain();
        state.close.drain();
        state.synced.clear();
        state.pending.take();
    }
}

fn decode_options<T: DeserializeOwned>(
    registration: &Registration,
) -> Result<T, RegistrationError> {
    let options = registration.register_options.clone().unwrap_or(Value::Null);
    serde_json::from_value(options).map_err(|e| RegistrationError::InvalidOptions {
        id: registration.id.clone(),
        method: registration.method.clone(),
        reason: e.to_string(),
    })
}

/// Fires [`TextDocumentSync::flush`] when the latest scheduled deadline passes.
/// Ends when the engine is dropped.
async fn debounce_worker(
    sync: Weak<TextDocumentSync>,
    mut schedule: mpsc::UnboundedReceiver<FlushSchedule>,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        let message = match deadline {
            Some(at) => tokio::select! {
                message = schedule.recv() => message,
                () = time::sleep_until(at) => {
                    deadline = None;
                    let Some(sync) = sync.upgrade() else {
                        return;
                    };
                    sync.flush();
                    continue;
                }
            },
            None => schedule.recv().await,
        };
        match message {
            Some(FlushSchedule::At(at)) => deadline = Some(at),
            Some(FlushSchedule::Cancel) => deadline = None,
            None => return,
        }
    }
}
