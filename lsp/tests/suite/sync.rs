//! Document synchronization through the client facade.

use std::sync::Arc;
use std::time::Duration;

use parley_lsp::{ClientOptions, CoalescingMerge};
use parley_types::{
    ChangeEvent, ContentChange, DocumentVersion, Position, Range, TextDocument, Url, apply_changes,
};
use serde_json::{Value, json};
use tokio::time;

use crate::common::{Harness, doc, insert, methods, rust_config};

async fn running(capabilities: Value, options: ClientOptions) -> Harness {
    let mut harness = Harness::new(rust_config(), options);
    harness.initialize(capabilities).await;
    harness
}

fn edit(harness: &Harness, event: &ChangeEvent, before: &TextDocument) {
    harness.client.will_change(before);
    harness.client.did_change(event);
}

fn changes(frame: &Value) -> Vec<ContentChange> {
    serde_json::from_value(frame["params"]["contentChanges"].clone()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_debounced_edits_arrive_as_one_change() {
    let mut harness = running(json!({ "textDocumentSync": 2 }), ClientOptions::default()).await;
    let v1 = doc("main.rs", 1, "fn main() {}");
    harness.client.did_open(&v1);
    let open = harness.recv().await;
    assert_eq!(open["method"], "textDocument/didOpen");
    assert_eq!(open["params"]["textDocument"]["text"], "fn main() {}");

    let v2 = insert(&v1, 0, 11, " ");
    edit(&harness, &v2, &v1);
    time::sleep(Duration::from_millis(100)).await;
    let v3 = insert(&v2.document, 0, 12, "run(); ");
    edit(&harness, &v3, &v2.document);
    assert!(harness.settle().await.is_empty());

    let change = harness.recv().await;
    assert_eq!(change["method"], "textDocument/didChange");
    assert_eq!(change["params"]["textDocument"]["version"], 3);
    assert_eq!(
        apply_changes("fn main() {}", &changes(&change)).unwrap(),
        v3.document.text()
    );
    assert!(harness.settle().await.is_empty());
    assert_eq!(
        harness.client.sync().synced_version(v1.uri()),
        Some(DocumentVersion::new(3))
    );
}

#[tokio::test]
async fn test_full_sync_sends_whole_text() {
    let mut harness = running(json!({ "textDocumentSync": 1 }), ClientOptions::default()).await;
    let v1 = doc("lib.rs", 1, "mod a;");
    harness.client.did_open(&v1);
    let v2 = insert(&v1, 0, 6, "\nmod b;");
    edit(&harness, &v2, &v1);
    harness.client.sync().flush();

    let frames = harness.settle().await;
    assert_eq!(
        methods(&frames),
        vec!["textDocument/didOpen", "textDocument/didChange"]
    );
    assert_eq!(changes(&frames[1]), vec![ContentChange::full("mod a;\nmod b;")]);
}

#[tokio::test]
async fn test_replace_edits_reconstruct_text() {
    let mut harness = running(json!({ "textDocumentSync": 2 }), ClientOptions::default()).await;
    let v1 = doc("lib.rs", 1, "let x = 1;\nlet y = 2;\n");
    harness.client.did_open(&v1);

    let range = Range::new(Position::new(1, 8), Position::new(1, 9));
    let v2 = ChangeEvent::from_edit(
        &v1,
        v1.version().next(),
        vec![ContentChange::replace(range, "x + 1")],
    )
    .unwrap();
    edit(&harness, &v2, &v1);
    let v3 = insert(&v2.document, 0, 0, "// header\n");
    edit(&harness, &v3, &v2.document);
    harness.client.sync().flush();

    let frames = harness.settle().await;
    assert_eq!(frames[1]["params"]["textDocument"]["version"], 3);
    assert_eq!(
        apply_changes(v1.text(), &changes(&frames[1])).unwrap(),
        "// header\nlet x = 1;\nlet y = x + 1;\n"
    );
}

#[tokio::test]
async fn test_editing_another_document_flushes_first() {
    let mut harness = running(json!({ "textDocumentSync": 2 }), ClientOptions::default()).await;
    let a1 = doc("a.rs", 1, "a");
    let b1 = doc("b.rs", 1, "b");
    harness.client.did_open(&a1);
    harness.client.did_open(&b1);
    let _ = harness.settle().await;

    let a2 = insert(&a1, 0, 1, "1");
    edit(&harness, &a2, &a1);
    let b2 = insert(&b1, 0, 1, "2");
    edit(&harness, &b2, &b1);
    harness.client.sync().flush();

    let frames = harness.settle().await;
    let uris: Vec<&Value> = frames
        .iter()
        .map(|frame| &frame["params"]["textDocument"]["uri"])
        .collect();
    assert_eq!(uris, vec!["file:///a.rs", "file:///b.rs"]);
    assert_eq!(
        methods(&frames),
        vec!["textDocument/didChange", "textDocument/didChange"]
    );
}

#[tokio::test]
async fn test_request_flushes_pending_edit() {
    let mut harness = running(
        json!({ "textDocumentSync": 2, "hoverProvider": true }),
        ClientOptions::default(),
    )
    .await;
    let v1 = doc("a.rs", 1, "fn f() {}");
    harness.client.did_open(&v1);
    let _ = harness.recv().await;
    let v2 = insert(&v1, 0, 9, "\n");
    edit(&harness, &v2, &v1);

    let (client, mut server) = harness.split();
    let hover = client.request(
        "textDocument/hover",
        &v2.document,
        json!({ "position": { "line": 0, "character": 3 } }),
    );
    let serve = async {
        let change = server.recv().await;
        let request = server.recv().await;
        server.respond(&request, json!({ "contents": "fn f()" }));
        (change, request)
    };
    let (result, (change, request)) = tokio::join!(hover, serve);

    assert_eq!(change["method"], "textDocument/didChange");
    assert_eq!(change["params"]["textDocument"]["version"], 2);
    assert_eq!(request["method"], "textDocument/hover");
    assert_eq!(request["params"]["textDocument"]["uri"], "file:///a.rs");
    assert_eq!(request["params"]["position"]["character"], 3);
    assert_eq!(result.unwrap(), Some(json!({ "contents": "fn f()" })));
}

#[tokio::test]
async fn test_stale_change_is_dropped() {
    let mut harness = running(json!({ "textDocumentSync": 2 }), ClientOptions::default()).await;
    let v2 = doc("a.rs", 2, "x");
    harness.client.did_open(&v2);
    let _ = harness.settle().await;

    let stale = ChangeEvent {
        document: doc("a.rs", 2, "xy"),
        changes: vec![ContentChange::insert(Position::new(0, 1), "y")],
    };
    harness.client.did_change(&stale);
    harness.client.sync().flush();
    assert!(harness.settle().await.is_empty());
}

#[tokio::test]
async fn test_coalescing_merge_sends_single_delta() {
    let options = ClientOptions::default().with_merge_strategy(Arc::new(CoalescingMerge));
    let mut harness = running(json!({ "textDocumentSync": 2 }), options).await;
    let v1 = doc("a.rs", 1, "fn x() {}");
    harness.client.did_open(&v1);
    let v2 = insert(&v1, 0, 8, " ");
    edit(&harness, &v2, &v1);
    let v3 = insert(&v2.document, 0, 9, "1 ");
    edit(&harness, &v3, &v2.document);
    harness.client.sync().flush();

    let frames = harness.settle().await;
    let merged = changes(&frames[1]);
    assert_eq!(merged.len(), 1);
    assert_eq!(apply_changes("fn x() {}", &merged).unwrap(), "fn x() { 1 }");
}

#[tokio::test]
async fn test_save_and_close() {
    let mut harness = running(
        json!({
            "textDocumentSync": {
                "openClose": true,
                "change": 2,
                "save": { "includeText": true }
            }
        }),
        ClientOptions::default(),
    )
    .await;
    let v1 = doc("a.rs", 1, "saved");
    harness.client.did_open(&v1);
    harness.client.did_save(&v1);
    harness.client.did_close(&v1);

    let frames = harness.settle().await;
    assert_eq!(
        methods(&frames),
        vec![
            "textDocument/didOpen",
            "textDocument/didSave",
            "textDocument/didClose"
        ]
    );
    assert_eq!(frames[1]["params"]["text"], "saved");
    assert!(!harness.client.sync().is_synced(v1.uri()));
}

#[tokio::test]
async fn test_unmatched_language_is_not_synced() {
    let mut harness = running(json!({ "textDocumentSync": 2 }), ClientOptions::default()).await;
    let python = TextDocument::new(
        Url::parse("file:///a.py").unwrap(),
        "python",
        DocumentVersion::new(1),
        "",
    );
    harness.client.did_open(&python);
    assert!(harness.settle().await.is_empty());
}
