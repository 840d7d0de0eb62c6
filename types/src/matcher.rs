//! Selecting among candidates that each carry a document selector.

use url::Url;

use crate::selector::DocumentSelector;

/// First candidate whose selector matches, in input order.
pub fn first_match<'a, T, F>(
    candidates: impl IntoIterator<Item = &'a T>,
    selector_of: F,
    uri: &Url,
    language_id: &str,
) -> Option<&'a T>
where
    T: 'a,
    F: Fn(&T) -> &DocumentSelector,
{
    candidates
        .into_iter()
        .find(|candidate| selector_of(*candidate).matches(uri, language_id))
}

/// Highest-scoring candidate; ties go to the earliest.
pub fn best_match<'a, T, F>(
    candidates: impl IntoIterator<Item = &'a T>,
    selector_of: F,
    uri: &Url,
    language_id: &str,
) -> Option<&'a T>
where
    T: 'a,
    F: Fn(&T) -> &DocumentSelector,
{
    let mut best: Option<(u8, &'a T)> = None;
    for candidate in candidates {
        let score = selector_of(candidate).score(uri, language_id);
        if score == 0 {
            continue;
        }
        if best.is_none_or(|(best_score, _)| score > best_score) {
            best = Some((score, candidate));
        }
    }
    best.map(|(_, candidate)| candidate)
}

/// Every matching candidate, highest score first, input order within a score.
pub fn all_matches<'a, T, F>(
    candidates: impl IntoIterator<Item = &'a T>,
    selector_of: F,
    uri: &Url,
    language_id: &str,
) -> Vec<&'a T>
where
    T: 'a,
    F: Fn(&T) -> &DocumentSelector,
{
    let mut scored: Vec<(u8, &'a T)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let score = selector_of(candidate).score(uri, language_id);
            (score > 0).then_some((score, candidate))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, candidate)| candidate).collect()
}
