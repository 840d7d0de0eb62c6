//! Scripted server for unit tests: inspect outgoing frames, answer requests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time;

use crate::connection::Connection;
use crate::transport::{ChannelTransport, IncomingMessage, Transport};

const RECV_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) struct TestServer {
    pub transport: Arc<ChannelTransport>,
    outgoing: mpsc::UnboundedReceiver<Value>,
}

impl TestServer {
    pub fn start() -> (Connection, Self) {
        let (transport, outgoing) = ChannelTransport::new();
        let transport = Arc::new(transport);
        let shared: Arc<dyn Transport> = transport.clone();
        let connection = Connection::new(shared);
        (
            connection,
            Self {
                transport,
                outgoing,
            },
        )
    }

    /// Next outgoing frame, waiting for spawned tasks to produce it.
    pub async fn recv(&mut self) -> Value {
        match time::timeout(RECV_TIMEOUT, self.outgoing.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => panic!("client transport dropped"),
            Err(_) => panic!("no frame within {RECV_TIMEOUT:?}"),
        }
    }

    /// Next frame already queued, if any.
    pub fn try_next(&mut self) -> Option<Value> {
        self.outgoing.try_recv().ok()
    }

    /// Let spawned tasks run, then drain everything queued.
    pub async fn settle(&mut self) -> Vec<Value> {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        let mut frames = Vec::new();
        while let Some(frame) = self.try_next() {
            frames.push(frame);
        }
        frames
    }

    pub fn respond(&self, request: &Value, result: Value) {
        let incoming = self.transport.handle_incoming(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": result
        }));
        assert!(incoming.is_none());
    }

    pub fn respond_error(&self, request: &Value, code: i64, message: &str, data: Option<Value>) {
        let mut error = json!({ "code": code, "message": message });
        if let Some(data) = data {
            error["data"] = data;
        }
        let incoming = self.transport.handle_incoming(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": error
        }));
        assert!(incoming.is_none());
    }

    /// A server-initiated request, as the client would receive it.
    pub fn request(&self, id: i64, method: &str, params: Value) -> IncomingMessage {
        self.transport
            .handle_incoming(json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params
            }))
            .expect("server request")
    }

    pub fn notification(&self, method: &str, params: Value) -> IncomingMessage {
        self.transport
            .handle_incoming(json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params
            }))
            .expect("server notification")
    }
}

pub(crate) fn methods(frames: &[Value]) -> Vec<&str> {
    frames
        .iter()
        .filter_map(|frame| frame["method"].as_str())
        .collect()
}
