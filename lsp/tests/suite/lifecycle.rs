//! Handshake, shutdown and configuration.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parley_lsp::protocol::error_code;
use parley_lsp::{
    ChannelTransport, ClientConfig, ClientOptions, ClientState, LspError, ReconnectPolicy,
    RestartDecision, Transport,
};
use serde_json::{Value, json};
use tempfile::NamedTempFile;

use crate::common::{Harness, doc, insert, methods, rust_config};

// ── Initialize ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_initialize_advertises_features_and_runs() {
    let mut harness = Harness::new(rust_config(), ClientOptions::default());
    assert_eq!(harness.client.state(), ClientState::Starting);

    let request = harness.initialize(json!({ "hoverProvider": true })).await;
    let capabilities = &request["params"]["capabilities"]["textDocument"];
    assert_eq!(capabilities["hover"]["dynamicRegistration"], true);
    assert_eq!(capabilities["synchronization"]["dynamicRegistration"], true);
    assert_eq!(capabilities["diagnostic"]["dynamicRegistration"], true);
    assert!(request["params"]["workDoneToken"].is_string());

    assert_eq!(harness.client.state(), ClientState::Running);
    let info = harness.client.server_info().unwrap();
    assert_eq!(info.name, "scripted");
    assert!(harness.client.server_capabilities().is_some());
}

#[tokio::test]
async fn test_failed_initialize_stops_client() {
    let mut harness = Harness::new(rust_config(), ClientOptions::default());
    let (result, _) = harness
        .handshake(json!({
            "error": { "code": error_code::INTERNAL_ERROR, "message": "no workspace" }
        }))
        .await;

    match result {
        Err(LspError::Response(error)) => assert_eq!(error.code, error_code::INTERNAL_ERROR),
        other => panic!("expected a response error, got {other:?}"),
    }
    assert_eq!(harness.client.state(), ClientState::Stopped);
    assert!(harness.client.server_info().is_none());
    assert!(harness.settle().await.is_empty());
}

#[tokio::test]
async fn test_unknown_server_request_gets_method_not_found() {
    let mut harness = Harness::new(rust_config(), ClientOptions::default());
    harness.initialize(json!({})).await;
    let answer = harness
        .server_request(3, "workspace/configuration", json!({ "items": [] }))
        .await;
    assert_eq!(answer["error"]["code"], error_code::METHOD_NOT_FOUND);
}

// ── Shutdown ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_flushes_then_exits() {
    let mut harness = Harness::new(rust_config(), ClientOptions::default());
    harness.initialize(json!({ "textDocumentSync": 2 })).await;
    let v1 = doc("a.rs", 1, "a");
    harness.client.did_open(&v1);
    let _ = harness.settle().await;
    let v2 = insert(&v1, 0, 1, "b");
    harness.client.will_change(&v1);
    harness.client.did_change(&v2);

    let (client, mut server) = harness.split();
    let serve = async {
        let mut frames = vec![server.recv().await, server.recv().await];
        server.respond(&frames[1], Value::Null);
        frames.push(server.recv().await);
        frames
    };
    let ((), frames) = tokio::join!(client.shutdown(), serve);

    assert_eq!(
        methods(&frames),
        vec!["textDocument/didChange", "shutdown", "exit"]
    );
    assert_eq!(harness.client.state(), ClientState::Stopped);
    assert!(!harness.client.sync().is_synced(v1.uri()));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_shutdown_times_out_and_exits() {
    let config = ClientConfig {
        shutdown_timeout_ms: 200,
        ..rust_config()
    };
    let mut harness = Harness::new(config, ClientOptions::default());
    harness.initialize(json!({})).await;

    let (client, mut server) = harness.split();
    let serve = async {
        vec![
            server.recv().await,
            server.recv().await,
            server.recv().await,
        ]
    };
    let ((), frames) = tokio::join!(client.shutdown(), serve);

    assert_eq!(methods(&frames), vec!["shutdown", "$/cancelRequest", "exit"]);
    assert_eq!(frames[1]["params"]["id"], frames[0]["id"]);
    assert_eq!(harness.client.state(), ClientState::Stopped);
}

// ── Reconnect ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_restart_reopens_documents_on_new_server() {
    let mut harness = Harness::new(rust_config(), ClientOptions::default());
    harness.initialize(json!({ "textDocumentSync": 2 })).await;
    let v1 = doc("a.rs", 1, "a");
    harness.client.did_open(&v1);
    let v2 = insert(&v1, 0, 1, "b");
    harness.client.will_change(&v1);
    harness.client.did_change(&v2);
    let _ = harness.settle().await;

    assert_eq!(harness.client.connection_lost(), RestartDecision::Restart);
    assert_eq!(harness.client.state(), ClientState::Stopped);
    assert!(!harness.client.sync().is_synced(v1.uri()));

    harness
        .restart(json!({ "textDocumentSync": 2 }))
        .await
        .unwrap();
    assert_eq!(harness.client.state(), ClientState::Running);
    let frames = harness.settle().await;
    assert_eq!(
        methods(&frames),
        vec!["initialized", "textDocument/didOpen"]
    );
    let opened = &frames[1]["params"]["textDocument"];
    assert_eq!(opened["version"], 2);
    assert_eq!(opened["text"], "ab");
}

#[tokio::test]
async fn test_restart_refused_once_policy_exhausted() {
    let config = ClientConfig {
        reconnect: ReconnectPolicy {
            max_restarts: 0,
            ..ReconnectPolicy::default()
        },
        ..rust_config()
    };
    let mut harness = Harness::new(config, ClientOptions::default());
    harness.initialize(json!({})).await;

    assert_eq!(harness.client.connection_lost(), RestartDecision::GiveUp);
    let (transport, mut outgoing) = ChannelTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let result = harness.client.restart(transport).await;
    assert!(matches!(result, Err(LspError::RestartsExhausted)));
    assert!(outgoing.try_recv().is_err());
    assert_eq!(harness.client.state(), ClientState::Stopped);
}

// ── Configuration ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_config_file_drives_client() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
change_debounce_ms = 50
document_selector = [{{ language = "rust" }}]

[diagnostics]
on_save = true
document_timeout_ms = 2000
"#
    )
    .unwrap();

    let config = ClientConfig::load(file.path()).unwrap();
    assert_eq!(config.change_debounce(), Duration::from_millis(50));
    assert!(config.diagnostics.on_save);
    assert_eq!(
        config.diagnostics.document_timeout(),
        Some(Duration::from_secs(2))
    );

    let mut harness = Harness::new(config, ClientOptions::default());
    harness.initialize(json!({ "textDocumentSync": 1 })).await;
    harness.client.did_open(&doc("main.rs", 1, ""));
    assert_eq!(harness.recv().await["method"], "textDocument/didOpen");
}

#[test]
fn test_config_load_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ClientConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config"), "{err}");
}
