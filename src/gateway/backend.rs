use async_trait::async_trait;

use crate::errors::BackendFailure;

/// Everything a backend produced for one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOutput {
    /// Primary result stream, expected to hold exactly one JSON value
    pub stdout: Vec<u8>,
    /// Side channel text (stderr); logged, never returned to callers
    pub diagnostics: Vec<u8>,
    /// Exit code, if the backend exited normally. Not used for the response decision.
    pub exit_code: Option<i32>,
}

impl BackendOutput {
    /// Output with only a result stream and a clean exit.
    pub fn from_stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            diagnostics: Vec::new(),
            exit_code: Some(0),
        }
    }

    /// Attach diagnostic text.
    pub fn with_diagnostics(mut self, diagnostics: impl Into<Vec<u8>>) -> Self {
        self.diagnostics = diagnostics.into();
        self
    }
}

/// Submit one payload, await one completed output.
///
/// Real implementations: `ProcessBackend` (external executable) and
/// `BuiltinOptimizer` (in-process). Each call is independent; an
/// implementation must not share per-request state between calls.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Short label used in logs (e.g. the command line).
    fn describe(&self) -> String;

    /// On failure, diagnostics written before the failure travel with the error.
    async fn submit(&self, payload: Vec<u8>) -> Result<BackendOutput, BackendFailure>;
}
