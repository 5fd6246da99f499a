//! Diagnostic channel policy.
//!
//! Backends may write free-form text to stderr. That text is handed to a
//! [`DiagnosticSink`] and is never part of an HTTP response.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::Endpoint;

/// Receives diagnostic text produced while serving a request.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, endpoint: Endpoint, text: &str);
}

/// Logs diagnostics as `warn` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, endpoint: Endpoint, text: &str) {
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            tracing::warn!(target: "pipedeck::diagnostics", %endpoint, "{} error: {}", endpoint, line);
        }
    }
}

/// Drops diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl DiagnosticSink for DiscardSink {
    fn report(&self, _endpoint: Endpoint, _text: &str) {}
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(Endpoint, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all reports received so far.
    pub fn entries(&self) -> Vec<(Endpoint, String)> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, endpoint: Endpoint, text: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((endpoint, text.to_string()));
    }
}

/// What to do with backend diagnostics (`server.diagnostics` in pipedeck.toml).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticPolicy {
    /// Log through `tracing` (default)
    #[default]
    Log,
    /// Drop silently
    Discard,
}

impl DiagnosticPolicy {
    pub fn sink(self) -> std::sync::Arc<dyn DiagnosticSink> {
        match self {
            DiagnosticPolicy::Log => std::sync::Arc::new(TracingSink),
            DiagnosticPolicy::Discard => std::sync::Arc::new(DiscardSink),
        }
    }
}

impl std::fmt::Display for DiagnosticPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticPolicy::Log => write!(f, "log"),
            DiagnosticPolicy::Discard => write!(f, "discard"),
        }
    }
}
