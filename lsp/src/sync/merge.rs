//! Merge strategies: collapse a run of edits before it is sent.

use std::sync::Arc;

use parley_types::{ContentChange, Range, TextDocument, position_at};

/// What a merger produced for one pending change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergedChanges {
    Incremental(Vec<ContentChange>),
    /// Give up on deltas and send the full text.
    Full,
}

pub trait MergeStrategy: Send + Sync {
    /// Start merging edits made on top of `base`.
    fn begin(&self, base: &TextDocument) -> Box<dyn ChangeMerger>;
}

pub trait ChangeMerger: Send {
    /// One batch of deltas, and the snapshot they produced.
    fn push(&mut self, after: &TextDocument, changes: &[ContentChange]);

    fn finish(self: Box<Self>) -> MergedChanges;
}

/// Replaces a run of edits with a single range replacement, computed from the
/// common prefix and suffix of the base and final texts.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoalescingMerge;

impl MergeStrategy for CoalescingMerge {
    fn begin(&self, base: &TextDocument) -> Box<dyn ChangeMerger> {
        Box::new(CoalescingMerger {
            base: base.shared_text(),
            latest: None,
        })
    }
}

struct CoalescingMerger {
    base: Arc<str>,
    latest: Option<Arc<str>>,
}

impl ChangeMerger for CoalescingMerger {
    fn push(&mut self, after: &TextDocument, _changes: &[ContentChange]) {
        self.latest = Some(after.shared_text());
    }

    fn finish(self: Box<Self>) -> MergedChanges {
        let Some(latest) = self.latest else {
            return MergedChanges::Incremental(Vec::new());
        };
        MergedChanges::Incremental(coalesce(&self.base, &latest).into_iter().collect())
    }
}

/// The single delta turning `base` into `latest`, or `None` when they are equal.
///
/// Boundaries never split a character or a `\r\n` pair: positions inside a
/// line ending would not map back to the same offset.
fn coalesce(base: &str, latest: &str) -> Option<ContentChange> {
    if base == latest {
        return None;
    }
    let base_bytes = base.as_bytes();
    let latest_bytes = latest.as_bytes();

    let mut prefix = base_bytes
        .iter()
        .zip(latest_bytes)
        .take_while(|(a, b)| a == b)
        .count();
    while !base.is_char_boundary(prefix) || !latest.is_char_boundary(prefix) {
        prefix -= 1;
    }
    if splits_crlf(base_bytes, prefix) {
        prefix -= 1;
    }

    let max_suffix = base.len().min(latest.len()) - prefix;
    let mut suffix = base_bytes
        .iter()
        .rev()
        .zip(latest_bytes.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    while !base.is_char_boundary(base.len() - suffix)
        || !latest.is_char_boundary(latest.len() - suffix)
    {
        suffix -= 1;
    }
    if splits_crlf(base_bytes, base.len() - suffix) {
        suffix -= 1;
    }

    let base_end = base.len() - suffix;
    let range = Range::new(position_at(base, prefix), position_at(base, base_end));
    Some(ContentChange::replace(
        range,
        &latest[prefix..latest.len() - suffix],
    ))
}

fn splits_crlf(bytes: &[u8], offset: usize) -> bool {
    offset > 0 && bytes.get(offset - 1) == Some(&b'\r') && bytes.get(offset) == Some(&b'\n')
}
