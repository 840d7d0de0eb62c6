//! Selector scoring as servers send it.

use parley_types::{DocumentSelector, EXACT_SCORE, Url, WILDCARD_SCORE};
use serde_json::json;

fn selector(value: serde_json::Value) -> DocumentSelector {
    serde_json::from_value(value).unwrap()
}

fn uri(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[test]
fn test_exact_language_beats_wildcard_scheme() {
    let selector = selector(json!([{ "scheme": "*" }, { "language": "x" }]));
    assert_eq!(selector.score(&uri("file:///a.x"), "x"), EXACT_SCORE);
    assert_eq!(selector.score(&uri("file:///a.y"), "y"), WILDCARD_SCORE);
}

#[test]
fn test_combined_filter_requires_every_field() {
    let selector = selector(json!([{ "language": "rust", "scheme": "untitled" }]));
    assert!(selector.matches(&uri("untitled:Untitled-1"), "rust"));
    assert!(!selector.matches(&uri("file:///main.rs"), "rust"));
}

#[test]
fn test_pattern_filter_matches_path() {
    let selector = selector(json!([{ "pattern": "**/src/**/*.rs" }]));
    assert_eq!(
        selector.score(&uri("file:///work/src/net/mod.rs"), "rust"),
        EXACT_SCORE
    );
    assert_eq!(selector.score(&uri("file:///work/build.rs"), "rust"), 0);
}

#[test]
fn test_empty_selector_matches_nothing() {
    let selector = selector(json!([]));
    assert!(selector.is_empty());
    assert!(!selector.matches(&uri("file:///a.rs"), "rust"));
}
