//! Client configuration, loaded from TOML or JSON.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use parley_types::DocumentSelector;
use serde::Deserialize;

use crate::reconnect::ReconnectPolicy;

const DEFAULT_INITIALIZE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CHANGE_DEBOUNCE_MS: u64 = 500;

/// Configuration for one client connection. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Negotiation timeout; progress from the server extends it.
    pub initialize_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    /// Delay before a pending document change is sent.
    pub change_debounce_ms: u64,
    pub reconnect: ReconnectPolicy,
    pub diagnostics: DiagnosticSettings,
    /// Selector for registrations that declare none.
    pub document_selector: Option<DocumentSelector>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            initialize_timeout_ms: DEFAULT_INITIALIZE_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            change_debounce_ms: DEFAULT_CHANGE_DEBOUNCE_MS,
            reconnect: ReconnectPolicy::default(),
            diagnostics: DiagnosticSettings::default(),
            document_selector: None,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Read a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    #[must_use]
    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    #[must_use]
    pub fn change_debounce(&self) -> Duration {
        Duration::from_millis(self.change_debounce_ms)
    }
}

/// Pull-diagnostics behavior.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiagnosticSettings {
    /// Per-request timeout for document pulls. Unset waits indefinitely.
    pub document_timeout_ms: Option<u64>,
    /// Delay before re-pulling workspace diagnostics after a clean pull.
    pub workspace_retrigger_ms: Option<u64>,
    pub on_change: bool,
    pub on_save: bool,
}

impl Default for DiagnosticSettings {
    fn default() -> Self {
        Self {
            document_timeout_ms: None,
            workspace_retrigger_ms: None,
            on_change: true,
            on_save: false,
        }
    }
}

impl DiagnosticSettings {
    #[must_use]
    pub fn document_timeout(&self) -> Option<Duration> {
        self.document_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn workspace_retrigger(&self) -> Option<Duration> {
        self.workspace_retrigger_ms.map(Duration::from_millis)
    }
}
