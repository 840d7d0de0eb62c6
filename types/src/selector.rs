//! Document filters and selectors.
//!
//! A filter scores a document by scheme, language, and path pattern; a
//! selector is an ordered set of filters scoring as its best filter. A score
//! of zero means "does not apply".

use std::path::PathBuf;

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use url::Url;

/// Score for an exact scheme or language match, or a matching pattern.
pub const EXACT_SCORE: u8 = 10;

/// Score for a `*` scheme or language.
pub const WILDCARD_SCORE: u8 = 5;

const WILDCARD: &str = "*";

/// A compiled glob. `*` does not cross path separators; matching is
/// case-sensitive.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    matcher: Option<GlobMatcher>,
}

impl GlobPattern {
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let matcher = GlobBuilder::new(&source)
            .literal_separator(true)
            .build()
            .ok()
            .map(|glob| glob.compile_matcher());
        Self { source, matcher }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern compiled. An invalid pattern matches nothing.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.matcher.is_some()
    }

    fn matches(&self, uri: &Url) -> bool {
        let Some(matcher) = &self.matcher else {
            return false;
        };
        let path = if uri.scheme() == "file" {
            uri.to_file_path().ok()
        } else {
            None
        };
        let path = path.unwrap_or_else(|| PathBuf::from(uri.path()));
        matcher.is_match(path)
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for GlobPattern {}

impl From<String> for GlobPattern {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<GlobPattern> for String {
    fn from(value: GlobPattern) -> Self {
        value.source
    }
}

impl Serialize for GlobPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for GlobPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// One filter of a selector. Absent fields do not constrain the match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<GlobPattern>,
}

impl DocumentFilter {
    /// Filter on language id (`*` for any).
    #[must_use]
    pub fn language(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            ..Self::default()
        }
    }

    /// Filter on URI scheme (`*` for any).
    #[must_use]
    pub fn scheme(scheme: impl Into<String>) -> Self {
        Self {
            scheme: Some(scheme.into()),
            ..Self::default()
        }
    }

    /// Filter on a path glob.
    #[must_use]
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(GlobPattern::new(pattern)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(GlobPattern::new(pattern));
        self
    }

    /// Score this filter against a document. Zero means no match.
    ///
    /// Scheme and language each contribute 10 for an exact match and 5 for a
    /// wildcard, keeping the higher of the two. A pattern, when present,
    /// decides on its own: 10 on a path match, 0 otherwise.
    #[must_use]
    pub fn score(&self, uri: &Url, language_id: &str) -> u8 {
        let mut score = 0;

        if let Some(scheme) = &self.scheme {
            if scheme == uri.scheme() {
                score = EXACT_SCORE;
            } else if scheme == WILDCARD {
                score = WILDCARD_SCORE;
            } else {
                return 0;
            }
        }

        if let Some(language) = &self.language {
            if language == language_id {
                score = EXACT_SCORE;
            } else if language == WILDCARD {
                score = score.max(WILDCARD_SCORE);
            } else {
                return 0;
            }
        }

        if let Some(pattern) = &self.pattern {
            if pattern.matches(uri) {
                score = EXACT_SCORE;
            } else {
                return 0;
            }
        }

        score
    }
}

/// Ordered set of filters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentSelector(Vec<DocumentFilter>);

impl DocumentSelector {
    #[must_use]
    pub fn new(filters: Vec<DocumentFilter>) -> Self {
        Self(filters)
    }

    #[must_use]
    pub fn filters(&self) -> &[DocumentFilter] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Best filter score; zero when nothing matches.
    #[must_use]
    pub fn score(&self, uri: &Url, language_id: &str) -> u8 {
        self.0
            .iter()
            .map(|filter| filter.score(uri, language_id))
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn matches(&self, uri: &Url, language_id: &str) -> bool {
        self.score(uri, language_id) > 0
    }
}

impl From<Vec<DocumentFilter>> for DocumentSelector {
    fn from(filters: Vec<DocumentFilter>) -> Self {
        Self(filters)
    }
}

impl FromIterator<DocumentFilter> for DocumentSelector {
    fn from_iter<I: IntoIterator<Item = DocumentFilter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
