//! Positions, ranges, and content deltas over document text.
//!
//! Positions follow the protocol's default encoding: zero-based lines split on
//! `\n`, and characters counted in UTF-16 code units. A `\r` before the line
//! break is not part of the line.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Zero-based line/character position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// An empty range at `position` (an insertion point).
    #[must_use]
    pub const fn at(position: Position) -> Self {
        Self {
            start: position,
            end: position,
        }
    }
}

/// One content delta. A delta without a range replaces the whole text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    pub text: String,
}

impl ContentChange {
    /// Whole-text replacement.
    #[must_use]
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }

    /// Replace `range` with `text`.
    #[must_use]
    pub fn replace(range: Range, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            text: text.into(),
        }
    }

    /// Insert `text` at `position`.
    #[must_use]
    pub fn insert(position: Position, text: impl Into<String>) -> Self {
        Self::replace(Range::at(position), text)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.range.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TextError {
    #[error("position {}:{} is past the end of the document", .0.line, .0.character)]
    OutOfBounds(Position),
    #[error("range start {}:{} is after its end {}:{}", .0.start.line, .0.start.character, .0.end.line, .0.end.character)]
    InvertedRange(Range),
}

/// Byte offset of `position` in `text`.
///
/// A character past the end of its line clamps to the line end; a line past
/// the last line is an error.
pub fn offset_at(text: &str, position: Position) -> Result<usize, TextError> {
    let mut line_start = 0usize;
    for _ in 0..position.line {
        match text[line_start..].find('\n') {
            Some(newline) => line_start += newline + 1,
            None => return Err(TextError::OutOfBounds(position)),
        }
    }

    let (line, terminated) = match text[line_start..].find('\n') {
        Some(newline) => (&text[line_start..line_start + newline], true),
        None => (&text[line_start..], false),
    };
    let line = if terminated {
        line.strip_suffix('\r').unwrap_or(line)
    } else {
        line
    };

    let mut units = 0u32;
    for (index, ch) in line.char_indices() {
        if units >= position.character {
            return Ok(line_start + index);
        }
        units += ch.len_utf16() as u32;
    }
    Ok(line_start + line.len())
}

/// Position of byte `offset` in `text`. Offsets inside a character round down.
#[must_use]
pub fn position_at(text: &str, offset: usize) -> Position {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }

    let prefix = &text[..offset];
    let line = prefix.matches('\n').count() as u32;
    let line_start = prefix.rfind('\n').map_or(0, |newline| newline + 1);
    let character = prefix[line_start..].encode_utf16().count() as u32;
    Position { line, character }
}

/// Apply one delta in place.
pub fn apply_change(text: &mut String, change: &ContentChange) -> Result<(), TextError> {
    let Some(range) = change.range else {
        text.clone_from(&change.text);
        return Ok(());
    };
    if range.start > range.end {
        return Err(TextError::InvertedRange(range));
    }
    let start = offset_at(text, range.start)?;
    let end = offset_at(text, range.end)?;
    text.replace_range(start..end, &change.text);
    Ok(())
}

/// Apply `changes` in order to a copy of `text`.
pub fn apply_changes(text: &str, changes: &[ContentChange]) -> Result<String, TextError> {
    let mut out = text.to_string();
    for change in changes {
        apply_change(&mut out, change)?;
    }
    Ok(out)
}
