//! Dynamic capability registration over the wire.

use std::slice;

use parley_lsp::protocol::error_code;
use parley_lsp::{ClientConfig, ClientOptions};
use serde_json::{Value, json};

use crate::common::{Harness, doc, rust_config};

fn register(id: &str, method: &str, options: Option<Value>) -> Value {
    let mut registration = json!({ "id": id, "method": method });
    if let Some(options) = options {
        registration["registerOptions"] = options;
    }
    json!({ "registrations": [registration] })
}

fn rust_only() -> Value {
    json!({ "documentSelector": [{ "language": "rust" }] })
}

async fn running(config: ClientConfig) -> Harness {
    let mut harness = Harness::new(config, ClientOptions::default());
    harness.initialize(json!({ "textDocumentSync": 2 })).await;
    harness
}

#[tokio::test]
async fn test_hover_register_then_unregister() {
    let mut harness = running(rust_config()).await;
    let a = doc("a.rs", 1, "fn f() {}");
    let position = json!({ "position": { "line": 0, "character": 3 } });

    let before = harness
        .client
        .request("textDocument/hover", &a, position.clone())
        .await
        .unwrap();
    assert_eq!(before, None);

    let answer = harness
        .server_request(
            1,
            "client/registerCapability",
            register("hover-1", "textDocument/hover", Some(rust_only())),
        )
        .await;
    assert_eq!(answer["result"], Value::Null);

    let (client, mut server) = harness.split();
    let serve = async {
        let request = server.recv().await;
        server.respond(&request, json!({ "contents": "f" }));
        request
    };
    let (result, request) = tokio::join!(
        client.request("textDocument/hover", &a, position.clone()),
        serve
    );
    assert_eq!(request["method"], "textDocument/hover");
    assert_eq!(result.unwrap(), Some(json!({ "contents": "f" })));

    let answer = harness
        .server_request(
            2,
            "client/unregisterCapability",
            json!({ "unregisterations": [{ "id": "hover-1", "method": "textDocument/hover" }] }),
        )
        .await;
    assert_eq!(answer["result"], Value::Null);
    let after = harness
        .client
        .request("textDocument/hover", &a, position)
        .await
        .unwrap();
    assert_eq!(after, None);
}

#[tokio::test]
async fn test_duplicate_id_is_invalid_params() {
    let mut harness = running(rust_config()).await;
    let params = register("dup", "textDocument/hover", Some(rust_only()));
    let first = harness
        .server_request(1, "client/registerCapability", params.clone())
        .await;
    assert_eq!(first["result"], Value::Null);

    let second = harness
        .server_request(2, "client/registerCapability", params)
        .await;
    assert_eq!(second["error"]["code"], error_code::INVALID_PARAMS);
}

#[tokio::test]
async fn test_unknown_method_is_invalid_params() {
    let mut harness = running(rust_config()).await;
    let answer = harness
        .server_request(
            1,
            "client/registerCapability",
            register("x", "textDocument/inlayHint", None),
        )
        .await;
    assert_eq!(answer["error"]["code"], error_code::INVALID_PARAMS);
    let message = answer["error"]["message"].as_str().unwrap();
    assert!(message.contains("textDocument/inlayHint"), "{message}");
}

#[tokio::test]
async fn test_missing_selector_without_default_is_ignored() {
    let mut harness = running(ClientConfig::default()).await;
    let answer = harness
        .server_request(
            1,
            "client/registerCapability",
            register("hover-1", "textDocument/hover", None),
        )
        .await;
    assert_eq!(answer["result"], Value::Null);

    let result = harness
        .client
        .request("textDocument/hover", &doc("a.rs", 1, ""), json!({}))
        .await
        .unwrap();
    assert_eq!(result, None);
}

#[tokio::test]
async fn test_late_sync_registration_opens_known_documents() {
    let mut harness = Harness::new(rust_config(), ClientOptions::default());
    harness.initialize(json!({})).await;
    let a = doc("a.rs", 1, "known");
    harness.client.did_open(&a);
    assert!(harness.settle().await.is_empty());

    let answer = harness
        .server_request(
            1,
            "client/registerCapability",
            register("open", "textDocument/didOpen", Some(rust_only())),
        )
        .await;
    assert_eq!(answer["result"], Value::Null);

    let open = harness.recv().await;
    assert_eq!(open["method"], "textDocument/didOpen");
    assert_eq!(open["params"]["textDocument"]["text"], "known");
}

#[tokio::test]
async fn test_diagnostic_registration_pulls_shown_documents() {
    let mut harness = running(rust_config()).await;
    let a = doc("a.rs", 1, "");
    harness.client.set_active(Some(&a));
    harness.client.set_visible(slice::from_ref(&a));
    assert!(harness.settle().await.is_empty());

    let mut options = rust_only();
    options["interFileDependencies"] = json!(false);
    options["workspaceDiagnostics"] = json!(false);
    let answer = harness
        .server_request(
            1,
            "client/registerCapability",
            register("diag", "textDocument/diagnostic", Some(options)),
        )
        .await;
    assert_eq!(answer["result"], Value::Null);

    let pull = harness.recv().await;
    assert_eq!(pull["method"], "textDocument/diagnostic");
    assert_eq!(pull["params"]["textDocument"]["uri"], "file:///a.rs");
    assert!(harness.settle().await.is_empty());
}

#[tokio::test]
async fn test_malformed_diagnostic_options_rejected() {
    let mut harness = running(rust_config()).await;
    let mut options = rust_only();
    options["interFileDependencies"] = json!("yes");
    let answer = harness
        .server_request(
            1,
            "client/registerCapability",
            register("diag", "textDocument/diagnostic", Some(options)),
        )
        .await;
    assert_eq!(answer["error"]["code"], error_code::INVALID_PARAMS);
}
