//! Immutable document snapshots and change events.

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::text::{ContentChange, TextError, apply_changes};

/// Document identity. The URI never changes for the life of a document.
pub type DocumentUri = Url;

/// Monotonic per-document version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct DocumentVersion(i32);

impl DocumentVersion {
    #[must_use]
    pub const fn new(version: i32) -> Self {
        Self(version)
    }

    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for DocumentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable (document, version, text) snapshot.
///
/// Cloning is cheap: the text is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    uri: DocumentUri,
    language_id: String,
    version: DocumentVersion,
    text: Arc<str>,
}

impl TextDocument {
    #[must_use]
    pub fn new(
        uri: DocumentUri,
        language_id: impl Into<String>,
        version: DocumentVersion,
        text: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            uri,
            language_id: language_id.into(),
            version,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn uri(&self) -> &DocumentUri {
        &self.uri
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn version(&self) -> DocumentVersion {
        self.version
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Shared handle to the text, for holders that outlive this snapshot.
    #[must_use]
    pub fn shared_text(&self) -> Arc<str> {
        Arc::clone(&self.text)
    }

    /// The snapshot after applying `changes` at `version`.
    pub fn apply(
        &self,
        version: DocumentVersion,
        changes: &[ContentChange],
    ) -> Result<Self, TextError> {
        let text = apply_changes(&self.text, changes)?;
        Ok(Self {
            uri: self.uri.clone(),
            language_id: self.language_id.clone(),
            version,
            text: text.into(),
        })
    }
}

/// An edit as reported by the host: the snapshot after the edit and the
/// ordered deltas that produced it.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub document: TextDocument,
    pub changes: Vec<ContentChange>,
}

impl ChangeEvent {
    /// Build the event by applying `changes` to `before`.
    pub fn from_edit(
        before: &TextDocument,
        version: DocumentVersion,
        changes: Vec<ContentChange>,
    ) -> Result<Self, TextError> {
        let document = before.apply(version, &changes)?;
        Ok(Self { document, changes })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
