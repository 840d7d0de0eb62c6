//! JSON-RPC frames and the LSP message types this client exchanges.
//!
//! Only the subset of the protocol the runtime speaks is modelled. Payloads the
//! runtime merely forwards (server capabilities, registration options) stay as
//! [`Value`] and are decoded by the feature that owns them.

use std::collections::HashMap;
use std::fmt;
use std::process;

use parley_types::{
    ContentChange, Diagnostic, DiagnosticSeverity, DocumentVersion, Range, TextDocument, Url,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Method names, verbatim from the wire contract.
pub mod method {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";

    pub const DID_OPEN: &str = "textDocument/didOpen";
    pub const DID_CHANGE: &str = "textDocument/didChange";
    pub const DID_CLOSE: &str = "textDocument/didClose";
    pub const DID_SAVE: &str = "textDocument/didSave";

    pub const DOCUMENT_DIAGNOSTIC: &str = "textDocument/diagnostic";
    pub const WORKSPACE_DIAGNOSTIC: &str = "workspace/diagnostic";
    pub const WORKSPACE_DIAGNOSTIC_REFRESH: &str = "workspace/diagnostic/refresh";
    pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

    pub const HOVER: &str = "textDocument/hover";
    pub const DEFINITION: &str = "textDocument/definition";
    pub const DOCUMENT_SYMBOL: &str = "textDocument/documentSymbol";
    pub const REFERENCES: &str = "textDocument/references";

    pub const PROGRESS: &str = "$/progress";
    pub const CANCEL_REQUEST: &str = "$/cancelRequest";
    pub const WORK_DONE_PROGRESS_CREATE: &str = "window/workDoneProgress/create";

    pub const REGISTER_CAPABILITY: &str = "client/registerCapability";
    pub const UNREGISTER_CAPABILITY: &str = "client/unregisterCapability";
}

/// JSON-RPC and LSP error codes the runtime reacts to.
pub mod error_code {
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const REQUEST_CANCELLED: i64 = -32800;
    pub const CONTENT_MODIFIED: i64 = -32801;
    pub const SERVER_CANCELLED: i64 = -32802;
}

const JSONRPC_VERSION: &str = "2.0";

// ── Frames ─────────────────────────────────────────────────────────────

/// Request id. Servers may use numbers or strings for their own requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: RequestId, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Response frame to a server-initiated request. A successful response always
/// carries `result`, `null` included.
pub(crate) fn response_frame(id: &RequestId, result: Result<Value, ResponseError>) -> Value {
    match result {
        Ok(result) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result }),
        Err(error) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error }),
    }
}

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_code::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )
    }

    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(error_code::INVALID_PARAMS, message)
    }

    #[must_use]
    pub fn is_request_cancelled(&self) -> bool {
        self.code == error_code::REQUEST_CANCELLED
    }

    #[must_use]
    pub fn is_content_modified(&self) -> bool {
        self.code == error_code::CONTENT_MODIFIED
    }

    #[must_use]
    pub fn is_server_cancelled(&self) -> bool {
        self.code == error_code::SERVER_CANCELLED
    }

    /// The server asks the client to retry (`data.retry == true`).
    #[must_use]
    pub fn requests_retry(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|data| data.get("retry"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Server-side cancellation that should be reissued. Retriggers unless the
    /// server explicitly sets `data.retriggerRequest` to `false`.
    #[must_use]
    pub fn retrigger_requested(&self) -> bool {
        self.is_server_cancelled()
            && self
                .data
                .as_ref()
                .and_then(|data| data.get("retriggerRequest"))
                .and_then(Value::as_bool)
                .unwrap_or(true)
    }
}

// ── Lifecycle ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: String::from("parley"),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Server capabilities as negotiated. Each feature decodes the keys it owns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerCapabilities(Value);

impl ServerCapabilities {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Capability under `key`; `null` reads as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| !value.is_null())
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

pub(crate) fn initialize_params(
    root_uri: Option<&Url>,
    client_info: &ClientInfo,
    capabilities: Value,
    initialization_options: Option<Value>,
) -> Value {
    let workspace_folders = root_uri.map(|uri| {
        json!([{
            "uri": uri,
            "name": "workspace"
        }])
    });
    let mut params = json!({
        "processId": process::id(),
        "clientInfo": client_info,
        "rootUri": root_uri,
        "capabilities": capabilities,
        "workspaceFolders": workspace_folders,
    });
    if let Some(options) = initialization_options {
        params["initializationOptions"] = options;
    }
    params
}

// ── Dynamic registration ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_options: Option<Value>,
}

impl Registration {
    #[must_use]
    pub fn new(id: impl Into<String>, method: impl Into<String>, options: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            register_options: options,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationParams {
    pub registrations: Vec<Registration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unregistration {
    pub id: String,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregistrationParams {
    // The protocol spells it this way.
    #[serde(rename = "unregisterations")]
    pub unregistrations: Vec<Unregistration>,
}

// ── Text document sync ─────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("unknown text document sync kind {0}")]
pub struct UnknownSyncKind(u8);

/// How document changes are sent (wire values 0/1/2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TextDocumentSyncKind {
    #[default]
    None,
    Full,
    Incremental,
}

impl TryFrom<u8> for TextDocumentSyncKind {
    type Error = UnknownSyncKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Full),
            2 => Ok(Self::Incremental),
            other => Err(UnknownSyncKind(other)),
        }
    }
}

impl From<TextDocumentSyncKind> for u8 {
    fn from(kind: TextDocumentSyncKind) -> Self {
        match kind {
            TextDocumentSyncKind::None => 0,
            TextDocumentSyncKind::Full => 1,
            TextDocumentSyncKind::Incremental => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOptions {
    #[serde(default)]
    pub include_text: bool,
}

/// Static `textDocumentSync` capability, in either of its wire forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextDocumentSyncOptions {
    pub open_close: bool,
    pub change: TextDocumentSyncKind,
    pub save: Option<SaveOptions>,
}

impl TextDocumentSyncOptions {
    /// Decode the capability value. A bare `Full` or `Incremental` kind
    /// implies open/close notifications and saves without text; a bare
    /// `None` turns synchronization off.
    #[must_use]
    pub fn from_capability(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => {
                let change = sync_kind_from_value(value).or_else(|| {
                    tracing::warn!("Ignoring unknown textDocumentSync kind {number}");
                    None
                })?;
                let enabled = change != TextDocumentSyncKind::None;
                Some(Self {
                    open_close: enabled,
                    change,
                    save: enabled.then(SaveOptions::default),
                })
            }
            Value::Object(map) => {
                let open_close = map
                    .get("openClose")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let change = map
                    .get("change")
                    .and_then(sync_kind_from_value)
                    .unwrap_or_default();
                let save = match map.get("save") {
                    Some(Value::Bool(true)) => Some(SaveOptions::default()),
                    Some(options @ Value::Object(_)) => {
                        SaveOptions::deserialize(options).ok()
                    }
                    _ => None,
                };
                Some(Self {
                    open_close,
                    change,
                    save,
                })
            }
            _ => None,
        }
    }
}

fn sync_kind_from_value(value: &Value) -> Option<TextDocumentSyncKind> {
    let kind = value.as_u64().and_then(|kind| u8::try_from(kind).ok())?;
    TextDocumentSyncKind::try_from(kind).ok()
}

/// Options of a dynamic `textDocument/didChange` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentChangeRegistrationOptions {
    pub sync_kind: TextDocumentSyncKind,
}

pub(crate) fn did_open_params(document: &TextDocument) -> Value {
    json!({
        "textDocument": {
            "uri": document.uri(),
            "languageId": document.language_id(),
            "version": document.version(),
            "text": document.text()
        }
    })
}

pub(crate) fn did_change_params(
    uri: &Url,
    version: DocumentVersion,
    changes: &[ContentChange],
) -> Value {
    json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": changes
    })
}

pub(crate) fn did_close_params(uri: &Url) -> Value {
    json!({
        "textDocument": {
            "uri": uri
        }
    })
}

pub(crate) fn did_save_params(uri: &Url, text: Option<&str>) -> Value {
    let mut params = json!({
        "textDocument": {
            "uri": uri
        }
    });
    if let Some(text) = text {
        params["text"] = Value::from(text);
    }
    params
}

// ── Diagnostics ────────────────────────────────────────────────────────

/// Options of a `textDocument/diagnostic` registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticOptions {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub inter_file_dependencies: bool,
    #[serde(default)]
    pub workspace_diagnostics: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextDocumentIdentifier {
    pub uri: Url,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDiagnosticParams {
    pub text_document: TextDocumentIdentifier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_result_id: Option<String>,
}

/// Result of `textDocument/diagnostic`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DocumentDiagnosticReport {
    Full {
        #[serde(rename = "resultId", default)]
        result_id: Option<String>,
        items: Vec<LspDiagnostic>,
        #[serde(rename = "relatedDocuments", default)]
        related_documents: HashMap<Url, DocumentDiagnosticReport>,
    },
    Unchanged {
        #[serde(rename = "resultId")]
        result_id: String,
        #[serde(rename = "relatedDocuments", default)]
        related_documents: HashMap<Url, DocumentDiagnosticReport>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviousResultId {
    pub uri: Url,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDiagnosticParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub previous_result_ids: Vec<PreviousResultId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_result_token: Option<ProgressToken>,
}

/// Result of `workspace/diagnostic`, and of each of its partial batches.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WorkspaceDiagnosticReport {
    #[serde(default)]
    pub items: Vec<WorkspaceDocumentDiagnosticReport>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkspaceDocumentDiagnosticReport {
    Full {
        uri: Url,
        #[serde(default)]
        version: Option<i32>,
        #[serde(rename = "resultId", default)]
        result_id: Option<String>,
        items: Vec<LspDiagnostic>,
    },
    Unchanged {
        uri: Url,
        #[serde(default)]
        version: Option<i32>,
        #[serde(rename = "resultId")]
        result_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PublishDiagnosticsParams {
    pub uri: Url,
    #[serde(default)]
    pub version: Option<i32>,
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LspDiagnostic {
    pub range: Range,
    #[serde(default)]
    pub severity: Option<u64>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub source: Option<String>,
    pub message: String,
}

impl LspDiagnostic {
    /// Resolve optional wire fields: missing severity is a warning, missing
    /// source is `"unknown"`.
    #[must_use]
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diagnostic = Diagnostic::new(
            self.range,
            self.severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Warning),
            self.source
                .clone()
                .unwrap_or_else(|| String::from("unknown")),
            self.message.clone(),
        );
        match &self.code {
            Some(Value::String(code)) => diagnostic.with_code(code.clone()),
            Some(Value::Number(code)) => diagnostic.with_code(code.to_string()),
            _ => diagnostic,
        }
    }
}

pub(crate) fn to_diagnostics(items: &[LspDiagnostic]) -> Vec<Diagnostic> {
    items.iter().map(LspDiagnostic::to_diagnostic).collect()
}

// ── Progress ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    Number(i64),
    String(String),
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressParams {
    pub token: ProgressToken,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkDoneProgressCreateParams {
    pub token: ProgressToken,
}

/// Work-done progress payload carried by `$/progress`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkDoneProgress {
    Begin {
        title: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        percentage: Option<u32>,
        #[serde(default)]
        cancellable: bool,
    },
    Report {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        percentage: Option<u32>,
    },
    End {
        #[serde(default)]
        message: Option<String>,
    },
}

impl WorkDoneProgress {
    /// Decode a progress value; `None` when it is not work-done progress.
    #[must_use]
    pub fn parse(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    pub(crate) fn is_end(value: &Value) -> bool {
        value.get("kind").and_then(Value::as_str) == Some("end")
    }
}
