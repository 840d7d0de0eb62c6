//! Core document and protocol domain types for Parley.
//!
//! This crate contains pure domain types with no IO and no async: document
//! snapshots, text positions and deltas, document selectors and the matcher
//! that scores documents against them, and diagnostics.

pub mod matcher;

mod diagnostic;
mod document;
mod selector;
mod text;

pub use diagnostic::{Diagnostic, DiagnosticSeverity};
pub use document::{ChangeEvent, DocumentUri, DocumentVersion, TextDocument};
pub use selector::{DocumentFilter, DocumentSelector, EXACT_SCORE, GlobPattern, WILDCARD_SCORE};
pub use text::{
    ContentChange, Position, Range, TextError, apply_change, apply_changes, offset_at, position_at,
};
pub use url::Url;
