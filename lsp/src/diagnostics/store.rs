//! Diagnostics store: the latest diagnostics per document and source.
//!
//! Every pull registration and the push channel publish into their own slot,
//! so a document's diagnostics are the union over its sources. Reads merge
//! the slots in source order (pushed first, then pull registrations by id).

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use parley_types::{Diagnostic, Url};

use super::{DiagnosticSink, DiagnosticSource};
use crate::lock;
use crate::types::DiagnosticsSnapshot;

type Slots = BTreeMap<DiagnosticSource, Vec<Diagnostic>>;

#[derive(Default)]
pub struct DiagnosticsStore {
    documents: Mutex<HashMap<Url, Slots>>,
}

impl DiagnosticsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace what `source` reported for `uri`. An empty list clears the
    /// slot; a document with no slots left is forgotten.
    pub fn update(&self, source: &DiagnosticSource, uri: &Url, items: Vec<Diagnostic>) {
        let mut documents = lock(&self.documents);
        if items.is_empty() {
            if let Some(slots) = documents.get_mut(uri) {
                slots.remove(source);
                if slots.is_empty() {
                    documents.remove(uri);
                }
            }
        } else {
            documents
                .entry(uri.clone())
                .or_default()
                .insert(source.clone(), items);
        }
    }

    /// Forget every document slot owned by `source`.
    pub fn remove_source(&self, source: &DiagnosticSource) {
        lock(&self.documents).retain(|_, slots| {
            slots.remove(source);
            !slots.is_empty()
        });
    }

    /// Every diagnostic for `uri`, across sources.
    #[must_use]
    pub fn get(&self, uri: &Url) -> Vec<Diagnostic> {
        lock(&self.documents)
            .get(uri)
            .map(merged)
            .unwrap_or_default()
    }

    /// What one source reported for `uri`.
    #[must_use]
    pub fn get_from(&self, source: &DiagnosticSource, uri: &Url) -> Vec<Diagnostic> {
        lock(&self.documents)
            .get(uri)
            .and_then(|slots| slots.get(source))
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<(Url, Vec<Diagnostic>)> = lock(&self.documents)
            .iter()
            .map(|(uri, slots)| (uri.clone(), merged(slots)))
            .collect();

        // Documents with errors first, then by URI
        files.sort_by(|a, b| {
            let a_has_errors = a.1.iter().any(|d| d.severity().is_error());
            let b_has_errors = b.1.iter().any(|d| d.severity().is_error());
            b_has_errors.cmp(&a_has_errors).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(files)
    }

    /// Error-level diagnostics for `uris`, skipping documents without errors.
    #[must_use]
    pub fn errors_for(&self, uris: &[Url]) -> Vec<(Url, Vec<Diagnostic>)> {
        let documents = lock(&self.documents);
        uris.iter()
            .filter_map(|uri| {
                let errors: Vec<Diagnostic> = documents
                    .get(uri)?
                    .values()
                    .flatten()
                    .filter(|d| d.severity().is_error())
                    .cloned()
                    .collect();
                (!errors.is_empty()).then(|| (uri.clone(), errors))
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.documents).clear();
    }
}

fn merged(slots: &Slots) -> Vec<Diagnostic> {
    slots.values().flatten().cloned().collect()
}

impl DiagnosticSink for DiagnosticsStore {
    fn publish(&self, source: &DiagnosticSource, uri: &Url, diagnostics: Vec<Diagnostic>) {
        self.update(source, uri, diagnostics);
    }

    fn retract(&self, source: &DiagnosticSource) {
        self.remove_source(source);
    }
}
