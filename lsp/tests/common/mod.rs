//! Shared test utilities and fixtures
//!
//! A scripted server on the far side of a `ChannelTransport`.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parley_lsp::protocol::InitializeResult;
use parley_lsp::{
    ChannelTransport, ClientConfig, ClientOptions, IncomingMessage, LanguageClient, LspError,
    Transport,
};
use parley_types::{
    ChangeEvent, ContentChange, DocumentFilter, DocumentSelector, DocumentVersion, Position,
    TextDocument, Url,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::{task, time};

const RECV_TIMEOUT: Duration = Duration::from_secs(60);

/// Config whose default selector covers Rust documents.
pub fn rust_config() -> ClientConfig {
    ClientConfig {
        document_selector: Some(DocumentSelector::new(vec![DocumentFilter::language("rust")])),
        ..ClientConfig::default()
    }
}

pub fn doc(name: &str, version: i32, text: &str) -> TextDocument {
    TextDocument::new(
        Url::parse(&format!("file:///{name}")).unwrap(),
        "rust",
        DocumentVersion::new(version),
        text,
    )
}

pub fn insert(before: &TextDocument, line: u32, character: u32, text: &str) -> ChangeEvent {
    ChangeEvent::from_edit(
        before,
        before.version().next(),
        vec![ContentChange::insert(Position::new(line, character), text)],
    )
    .unwrap()
}

pub fn methods(frames: &[Value]) -> Vec<&str> {
    frames
        .iter()
        .filter_map(|frame| frame["method"].as_str())
        .collect()
}

pub fn diagnostic(line: u32, severity: u8, message: &str) -> Value {
    json!({
        "range": {
            "start": { "line": line, "character": 0 },
            "end": { "line": line, "character": 1 }
        },
        "severity": severity,
        "message": message
    })
}

/// The server side of the channel, borrowed while the client is busy.
pub struct Server<'a> {
    transport: &'a ChannelTransport,
    outgoing: &'a mut mpsc::UnboundedReceiver<Value>,
    backlog: &'a mut VecDeque<Value>,
}

impl Server<'_> {
    pub async fn recv(&mut self) -> Value {
        if let Some(frame) = self.backlog.pop_front() {
            return frame;
        }
        match time::timeout(RECV_TIMEOUT, self.outgoing.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => panic!("client transport dropped"),
            Err(_) => panic!("no frame within {RECV_TIMEOUT:?}"),
        }
    }

    /// Let spawned tasks run, then drain everything queued.
    pub async fn settle(&mut self) -> Vec<Value> {
        for _ in 0..16 {
            task::yield_now().await;
        }
        let mut frames: Vec<Value> = self.backlog.drain(..).collect();
        while let Ok(frame) = self.outgoing.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub fn respond(&self, request: &Value, result: Value) {
        self.reply(request, json!({ "result": result }));
    }

    pub fn respond_error(&self, request: &Value, code: i64, message: &str, data: Option<Value>) {
        let mut error = json!({ "code": code, "message": message });
        if let Some(data) = data {
            error["data"] = data;
        }
        self.reply(request, json!({ "error": error }));
    }

    /// Answer `request` with `body` (a `result` or `error` member).
    pub fn reply(&self, request: &Value, body: Value) {
        let mut response = json!({ "jsonrpc": "2.0", "id": request["id"] });
        if let (Some(fields), Value::Object(body)) = (response.as_object_mut(), body) {
            fields.extend(body);
        }
        assert!(self.transport.handle_incoming(response).is_none());
    }
}

pub struct Harness {
    pub client: LanguageClient,
    pub transport: Arc<ChannelTransport>,
    outgoing: mpsc::UnboundedReceiver<Value>,
    backlog: VecDeque<Value>,
}

impl Harness {
    pub fn new(config: ClientConfig, options: ClientOptions) -> Self {
        let (transport, outgoing) = ChannelTransport::new();
        let transport = Arc::new(transport);
        let shared: Arc<dyn Transport> = transport.clone();
        Self {
            client: LanguageClient::new(shared, config, options),
            transport,
            outgoing,
            backlog: VecDeque::new(),
        }
    }

    /// Borrow the client and the server side at once, to drive both from
    /// one `tokio::join!`.
    pub fn split(&mut self) -> (&LanguageClient, Server<'_>) {
        let server = Server {
            transport: &self.transport,
            outgoing: &mut self.outgoing,
            backlog: &mut self.backlog,
        };
        (&self.client, server)
    }

    fn server(&mut self) -> Server<'_> {
        self.split().1
    }

    /// Answer `initialize` with `body`. Returns the client's outcome and the
    /// request it sent.
    pub async fn handshake(&mut self, body: Value) -> (Result<InitializeResult, LspError>, Value) {
        let (client, mut server) = self.split();
        let serve = async move {
            let request = server.recv().await;
            assert_eq!(request["method"], "initialize");
            server.reply(&request, body);
            request
        };
        tokio::join!(client.initialize(), serve)
    }

    /// Successful handshake against `capabilities`; consumes `initialized`.
    pub async fn initialize(&mut self, capabilities: Value) -> Value {
        let body = json!({
            "result": {
                "capabilities": capabilities,
                "serverInfo": { "name": "scripted", "version": "1.0" }
            }
        });
        let (result, request) = self.handshake(body).await;
        result.unwrap();
        assert_eq!(self.recv().await["method"], "initialized");
        request
    }

    /// Swap in a fresh channel, as if a new server process was spawned, and
    /// rerun the handshake through [`LanguageClient::restart`].
    pub async fn restart(&mut self, capabilities: Value) -> Result<InitializeResult, LspError> {
        let (transport, outgoing) = ChannelTransport::new();
        let transport = Arc::new(transport);
        let shared: Arc<dyn Transport> = transport.clone();
        self.transport = transport;
        self.outgoing = outgoing;
        self.backlog.clear();

        let (client, mut server) = self.split();
        let serve = async move {
            let request = server.recv().await;
            assert_eq!(request["method"], "initialize");
            server.respond(&request, json!({ "capabilities": capabilities }));
        };
        let (result, ()) = tokio::join!(client.restart(shared), serve);
        result
    }

    pub async fn recv(&mut self) -> Value {
        self.server().recv().await
    }

    pub async fn settle(&mut self) -> Vec<Value> {
        self.server().settle().await
    }

    pub fn respond(&mut self, request: &Value, result: Value) {
        self.server().respond(request, result);
    }

    pub fn respond_error(
        &mut self,
        request: &Value,
        code: i64,
        message: &str,
        data: Option<Value>,
    ) {
        self.server().respond_error(request, code, message, data);
    }

    /// Deliver a server-initiated request; returns the client's answer.
    /// Other frames sent meanwhile stay queued for `recv`.
    pub async fn server_request(&mut self, id: i64, method: &str, params: Value) -> Value {
        let message = self
            .transport
            .handle_incoming(json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params
            }))
            .unwrap();
        assert!(matches!(message, IncomingMessage::Request { .. }));
        self.client.handle_message(message);

        let mut skipped = Vec::new();
        let answer = loop {
            let frame = self.recv().await;
            if frame["id"] == id && frame.get("method").is_none() {
                break frame;
            }
            skipped.push(frame);
        };
        self.backlog.extend(skipped);
        answer
    }

    pub fn server_notify(&self, method: &str, params: Value) {
        let message = self
            .transport
            .handle_incoming(json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params
            }))
            .unwrap();
        self.client.handle_message(message);
    }
}
