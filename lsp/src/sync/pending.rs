//! The single pending-change slot behind the debounce timer.

use std::sync::Arc;

use parley_types::{ChangeEvent, ContentChange, DocumentVersion, TextDocument, Url};

use super::merge::{ChangeMerger, MergeStrategy, MergedChanges};
use crate::protocol::TextDocumentSyncKind;

/// Edits to one document that have not been sent yet.
pub(crate) enum PendingChange {
    /// Send the full text of `document`.
    Full { document: TextDocument },
    Accumulating {
        document: TextDocument,
        changes: Vec<ContentChange>,
    },
    /// A merger seeded from the pre-edit snapshot. `latest` is unset until the
    /// first edit lands.
    Merging {
        uri: Url,
        latest: Option<TextDocument>,
        merger: Box<dyn ChangeMerger>,
    },
}

impl PendingChange {
    pub fn uri(&self) -> &Url {
        match self {
            Self::Full { document } | Self::Accumulating { document, .. } => document.uri(),
            Self::Merging { uri, .. } => uri,
        }
    }

    /// Snapshot after the last edit, if any edit landed.
    pub fn document(&self) -> Option<&TextDocument> {
        match self {
            Self::Full { document } | Self::Accumulating { document, .. } => Some(document),
            Self::Merging { latest, .. } => latest.as_ref(),
        }
    }

    pub fn version(&self) -> Option<DocumentVersion> {
        self.document().map(TextDocument::version)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Full { .. } => false,
            Self::Accumulating { changes, .. } => changes.is_empty(),
            Self::Merging { latest, .. } => latest.is_none(),
        }
    }

    /// Deltas for `didChange`. `None` when there is nothing to send.
    pub fn into_content_changes(self, full_sync: bool) -> Option<Vec<ContentChange>> {
        let (document, changes) = match self {
            Self::Full { document } => return Some(vec![ContentChange::full(document.text())]),
            Self::Accumulating { document, changes } => {
                if changes.is_empty() {
                    return None;
                }
                (document, changes)
            }
            Self::Merging { latest, merger, .. } => {
                let document = latest?;
                match merger.finish() {
                    MergedChanges::Full => {
                        return Some(vec![ContentChange::full(document.text())]);
                    }
                    MergedChanges::Incremental(changes) => {
                        if changes.is_empty() {
                            return None;
                        }
                        (document, changes)
                    }
                }
            }
        };
        if full_sync {
            Some(vec![ContentChange::full(document.text())])
        } else {
            Some(changes)
        }
    }
}

/// Holds at most one pending change. A change for a different document
/// displaces the current one, which the caller must send first.
#[derive(Default)]
pub(crate) struct PendingChangeManager {
    slot: Option<PendingChange>,
    merge: Option<Arc<dyn MergeStrategy>>,
}

impl PendingChangeManager {
    pub fn new(merge: Option<Arc<dyn MergeStrategy>>) -> Self {
        Self { slot: None, merge }
    }

    fn take_if_other(&mut self, uri: &Url) -> Option<PendingChange> {
        if self.pending_uri().is_some_and(|pending| pending != uri) {
            self.slot.take()
        } else {
            None
        }
    }

    /// Before an edit to `before` is applied. Starts merging when a strategy
    /// is configured, the sync kind is incremental and nothing is pending.
    pub fn will_add_change(
        &mut self,
        before: &TextDocument,
        kind: TextDocumentSyncKind,
    ) -> Option<PendingChange> {
        let displaced = self.take_if_other(before.uri());
        if self.slot.is_none()
            && kind == TextDocumentSyncKind::Incremental
            && let Some(merge) = &self.merge
        {
            self.slot = Some(PendingChange::Merging {
                uri: before.uri().clone(),
                latest: None,
                merger: merge.begin(before),
            });
        }
        displaced
    }

    /// After an edit is applied. A full-text delta, or full sync, degrades
    /// the pending change to `Full`.
    pub fn add_change(
        &mut self,
        event: &ChangeEvent,
        kind: TextDocumentSyncKind,
    ) -> Option<PendingChange> {
        let displaced = self.take_if_other(event.document.uri());
        let document = event.document.clone();
        let full = kind == TextDocumentSyncKind::Full
            || event.changes.iter().any(ContentChange::is_full);

        let next = match self.slot.take() {
            _ if full => PendingChange::Full { document },
            None => PendingChange::Accumulating {
                document,
                changes: event.changes.clone(),
            },
            Some(PendingChange::Full { .. }) => PendingChange::Full { document },
            Some(PendingChange::Accumulating { mut changes, .. }) => {
                changes.extend(event.changes.iter().cloned());
                PendingChange::Accumulating { document, changes }
            }
            Some(PendingChange::Merging {
                uri, mut merger, ..
            }) => {
                merger.push(&document, &event.changes);
                PendingChange::Merging {
                    uri,
                    latest: Some(document),
                    merger,
                }
            }
        };
        self.slot = Some(next);
        displaced
    }

    pub fn take(&mut self) -> Option<PendingChange> {
        self.slot.take()
    }

    pub fn pending_uri(&self) -> Option<&Url> {
        self.slot.as_ref().map(PendingChange::uri)
    }

    pub fn pending_version(&self, uri: &Url) -> Option<DocumentVersion> {
        self.slot
            .as_ref()
            .filter(|pending| pending.uri() == uri)
            .and_then(PendingChange::version)
    }

    pub fn has_pending(&self) -> bool {
        self.slot.as_ref().is_some_and(|pending| !pending.is_empty())
    }
}
