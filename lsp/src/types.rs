//! Public types read by hosts: client lifecycle and diagnostics snapshots.

use parley_types::{Diagnostic, DiagnosticSeverity, Url};

/// Lifecycle of a [`LanguageClient`](crate::LanguageClient).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Immutable snapshot of the store, merged across diagnostic sources.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    /// Per-document diagnostics, error-containing documents first.
    files: Vec<(Url, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(Url, Vec<Diagnostic>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(Url, Vec<Diagnostic>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Diagnostics for one document; empty when it has none.
    #[must_use]
    pub fn for_uri(&self, uri: &Url) -> &[Diagnostic] {
        self.files
            .iter()
            .find(|(file, _)| file == uri)
            .map(|(_, items)| items.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn count(&self, severity: DiagnosticSeverity) -> usize {
        self.files
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity() == severity)
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count(DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count(DiagnosticSeverity::Warning)
    }
}
