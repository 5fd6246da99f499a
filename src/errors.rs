//! Typed error hierarchy for pipedeck.
//!
//! Three top-level enums cover the three subsystems:
//! - `ProcessError`: running an external analysis process
//! - `GatewayError`: relaying a request through a backend
//! - `StackError`: repository tech stack detection
//!
//! `BackendFailure` wraps a `ProcessError` with any diagnostics written
//! before the failure.

use std::time::Duration;

use thiserror::Error;

use crate::gateway::Endpoint;

/// Errors from spawning and driving an external process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write payload to process stdin: {0}")]
    StdinWriteFailed(#[source] std::io::Error),

    #[error("Failed to read process output: {0}")]
    OutputReadFailed(#[source] std::io::Error),

    #[error("Failed to wait for process exit: {0}")]
    WaitFailed(#[source] std::io::Error),

    #[error("Process did not exit within {0:?}")]
    TimedOut(Duration),

    #[error("Process output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },
}

/// A failed submission, with whatever diagnostics the backend wrote before it failed.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct BackendFailure {
    #[source]
    pub source: ProcessError,
    pub diagnostics: Vec<u8>,
}

impl BackendFailure {
    pub fn with_diagnostics(mut self, diagnostics: impl Into<Vec<u8>>) -> Self {
        self.diagnostics = diagnostics.into();
        self
    }
}

impl From<ProcessError> for BackendFailure {
    fn from(source: ProcessError) -> Self {
        Self {
            source,
            diagnostics: Vec::new(),
        }
    }
}

/// Errors from relaying one request to a backend.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{endpoint} backend failed: {source}")]
    Backend {
        endpoint: Endpoint,
        #[source]
        source: ProcessError,
    },

    #[error("{endpoint} output is not valid JSON: {source}")]
    OutputParse {
        endpoint: Endpoint,
        #[source]
        source: serde_json::Error,
    },
}

impl GatewayError {
    /// Endpoint the failing request was addressed to.
    pub fn endpoint(&self) -> Endpoint {
        match self {
            GatewayError::Backend { endpoint, .. } | GatewayError::OutputParse { endpoint, .. } => {
                *endpoint
            }
        }
    }

    /// Fixed message reported to the HTTP caller.
    ///
    /// Every failure degrades to the endpoint's parse-failure message; the
    /// specific cause only reaches the server log.
    pub fn public_message(&self) -> &'static str {
        self.endpoint().parse_failure_message()
    }
}

/// Errors from tech stack detection.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("Repository path {path} does not exist")]
    PathNotFound { path: std::path::PathBuf },

    #[error("Repository path {path} is not a directory")]
    NotADirectory { path: std::path::PathBuf },

    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
