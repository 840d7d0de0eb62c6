//! Pull diagnostics driven by document events and server requests.

use std::slice;

use parley_lsp::ClientOptions;
use parley_lsp::protocol::error_code;
use serde_json::{Value, json};

use crate::common::{Harness, diagnostic, doc, insert, methods, rust_config};

fn document_pulls() -> Value {
    json!({
        "textDocumentSync": 2,
        "diagnosticProvider": {
            "interFileDependencies": true,
            "workspaceDiagnostics": false
        }
    })
}

async fn running(capabilities: Value) -> Harness {
    let mut harness = Harness::new(rust_config(), ClientOptions::default());
    harness.initialize(capabilities).await;
    harness
}

fn full_report(result_id: &str, items: Vec<Value>) -> Value {
    json!({ "kind": "full", "resultId": result_id, "items": items })
}

fn pulls(frames: &[Value]) -> Vec<&Value> {
    frames
        .iter()
        .filter(|frame| frame["method"] == "textDocument/diagnostic")
        .collect()
}

// ── Document pulls ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_open_pulls_and_publishes() {
    let mut harness = running(document_pulls()).await;
    let a = doc("a.rs", 1, "fn main() {}");
    harness.client.did_open(&a);

    let frames = harness.settle().await;
    assert_eq!(
        methods(&frames),
        vec!["textDocument/didOpen", "textDocument/diagnostic"]
    );
    let request = &frames[1];
    assert_eq!(request["params"]["textDocument"]["uri"], "file:///a.rs");
    assert!(request["params"].get("previousResultId").is_none());

    harness.respond(
        request,
        full_report("r1", vec![diagnostic(0, 1, "boom"), diagnostic(0, 2, "hmm")]),
    );
    let _ = harness.settle().await;

    let snapshot = harness.client.snapshot();
    assert_eq!(snapshot.error_count(), 1);
    assert_eq!(snapshot.warning_count(), 1);
    assert_eq!(harness.client.diagnostics().get(a.uri()).len(), 2);
}

#[tokio::test]
async fn test_passive_triggers_do_not_supersede() {
    let mut harness = running(document_pulls()).await;
    let a = doc("a.rs", 1, "");
    harness.client.did_open(&a);
    let frames = harness.settle().await;
    assert_eq!(pulls(&frames).len(), 1);

    harness.client.set_active(Some(&a));
    harness.client.set_visible(slice::from_ref(&a));
    assert!(harness.settle().await.is_empty());
}

#[tokio::test]
async fn test_content_change_retriggers_exactly_once() {
    let mut harness = running(document_pulls()).await;
    let a1 = doc("a.rs", 1, "x");
    harness.client.did_open(&a1);
    let _ = harness.settle().await;

    let a2 = insert(&a1, 0, 1, "y");
    harness.client.will_change(&a1);
    harness.client.did_change(&a2);
    harness.client.sync().flush();

    let frames = harness.settle().await;
    assert_eq!(
        methods(&frames),
        vec![
            "textDocument/didChange",
            "$/cancelRequest",
            "textDocument/diagnostic"
        ]
    );
    assert!(frames[2]["params"].get("previousResultId").is_none());
}

#[tokio::test]
async fn test_result_id_carried_into_next_pull() {
    let mut harness = running(document_pulls()).await;
    let a1 = doc("a.rs", 1, "x");
    harness.client.did_open(&a1);
    let frames = harness.settle().await;
    harness.respond(&frames[1], full_report("r1", vec![diagnostic(0, 1, "boom")]));
    let _ = harness.settle().await;

    let a2 = insert(&a1, 0, 1, "y");
    harness.client.will_change(&a1);
    harness.client.did_change(&a2);
    harness.client.sync().flush();

    let frames = harness.settle().await;
    let requests = pulls(&frames);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["params"]["previousResultId"], "r1");

    harness.respond(requests[0], json!({ "kind": "unchanged", "resultId": "r2" }));
    let _ = harness.settle().await;
    assert_eq!(harness.client.snapshot().error_count(), 1);
}

#[tokio::test]
async fn test_server_cancellation_retriggers_on_request() {
    let mut harness = running(document_pulls()).await;
    harness.client.did_open(&doc("a.rs", 1, ""));
    let frames = harness.settle().await;

    harness.respond_error(
        &frames[1],
        error_code::SERVER_CANCELLED,
        "busy",
        Some(json!({ "retriggerRequest": true })),
    );
    let frames = harness.settle().await;
    assert_eq!(methods(&frames), vec!["textDocument/diagnostic"]);

    harness.respond_error(
        &frames[0],
        error_code::SERVER_CANCELLED,
        "busy",
        Some(json!({ "retriggerRequest": false })),
    );
    assert!(harness.settle().await.is_empty());
}

#[tokio::test]
async fn test_closing_document_repulls_visible_dependents() {
    let mut harness = running(document_pulls()).await;
    let a = doc("a.rs", 1, "");
    let b = doc("b.rs", 1, "");
    harness.client.set_visible(&[a.clone(), b.clone()]);
    let frames = harness.settle().await;
    let requests = pulls(&frames);
    assert_eq!(requests.len(), 2);
    for request in requests {
        harness.respond(request, full_report("r1", Vec::new()));
    }
    let _ = harness.settle().await;

    harness.client.did_close(&a);
    let frames = harness.settle().await;
    let requests = pulls(&frames);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["params"]["textDocument"]["uri"], "file:///b.rs");
    assert_eq!(requests[0]["params"]["previousResultId"], "r1");
}

// ── Workspace pulls ────────────────────────────────────────────────────

#[tokio::test]
async fn test_workspace_refresh_carries_result_ids() {
    let mut harness = running(json!({
        "diagnosticProvider": {
            "interFileDependencies": false,
            "workspaceDiagnostics": true
        }
    }))
    .await;

    let first = harness.recv().await;
    assert_eq!(first["method"], "workspace/diagnostic");
    assert_eq!(first["params"]["previousResultIds"], json!([]));
    assert!(first["params"]["partialResultToken"].is_string());
    harness.respond(
        &first,
        json!({
            "items": [{
                "kind": "full",
                "uri": "file:///a.rs",
                "version": null,
                "resultId": "w1",
                "items": [diagnostic(3, 1, "unused")]
            }]
        }),
    );
    let _ = harness.settle().await;
    assert_eq!(harness.client.snapshot().error_count(), 1);

    let answer = harness
        .server_request(7, "workspace/diagnostic/refresh", Value::Null)
        .await;
    assert_eq!(answer["result"], Value::Null);

    let second = harness.recv().await;
    assert_eq!(second["method"], "workspace/diagnostic");
    assert_eq!(
        second["params"]["previousResultIds"],
        json!([{ "uri": "file:///a.rs", "value": "w1" }])
    );
}

#[tokio::test]
async fn test_pushed_diagnostics_reach_store() {
    let harness = running(json!({})).await;
    harness.server_notify(
        "textDocument/publishDiagnostics",
        json!({
            "uri": "file:///a.rs",
            "diagnostics": [diagnostic(0, 1, "e"), diagnostic(1, 1, "e2")]
        }),
    );
    assert_eq!(harness.client.snapshot().error_count(), 2);
}
