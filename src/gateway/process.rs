//! External process backend.
//!
//! Spawns the configured command once per payload:
//! - writes the payload to stdin, then closes it
//! - drains stdout (bounded) and stderr concurrently with the write
//! - waits for exit, optionally under a timeout
//! - on failure, returns the stderr read so far with the error

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;

use super::RequestPhase;
use super::backend::{AnalysisBackend, BackendOutput};
use crate::errors::{BackendFailure, ProcessError};

const READ_CHUNK: usize = 8 * 1024;

/// How to launch an external analysis process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// `None` waits for exit indefinitely
    pub timeout: Option<Duration>,
    /// Cap on buffered stdout; also bounds retained stderr
    pub max_output_bytes: usize,
}

impl ProcessSpec {
    pub fn new(command: impl Into<String>, working_dir: impl AsRef<Path>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout: None,
            max_output_bytes: crate::config::DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Command line as a single string, for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs one external process per submitted payload.
pub struct ProcessBackend {
    spec: ProcessSpec,
}

impl ProcessBackend {
    pub fn new(spec: ProcessSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }
}

#[async_trait]
impl AnalysisBackend for ProcessBackend {
    fn describe(&self) -> String {
        self.spec.command_line()
    }

    async fn submit(&self, payload: Vec<u8>) -> Result<BackendOutput, BackendFailure> {
        let spec = &self.spec;

        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::SpawnFailed {
                command: spec.command.clone(),
                source,
            })?;

        tracing::debug!(
            phase = RequestPhase::Spawned.as_str(),
            pid = ?child.id(),
            command = %spec.command_line(),
            "process spawned"
        );

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = spec.max_output_bytes;
        // Lives outside `drive` so stderr read before a failure is kept.
        let mut diagnostics = Vec::new();

        let drive = async {
            tracing::debug!(
                phase = RequestPhase::WritingStdin.as_str(),
                bytes = payload.len(),
                "streaming payload and draining output"
            );
            let (_, out, _) = tokio::try_join!(
                write_payload(stdin, &payload),
                drain_stdout(stdout, limit),
                drain_diagnostics(stderr, limit, &mut diagnostics),
            )?;
            tracing::debug!(phase = RequestPhase::DrainingStdout.as_str(), "output streams closed");
            let status = child.wait().await.map_err(ProcessError::WaitFailed)?;
            Ok::<_, ProcessError>((out, status.code()))
        };

        let result = match spec.timeout {
            Some(deadline) => timeout(deadline, drive)
                .await
                .unwrap_or_else(|_| Err(ProcessError::TimedOut(deadline))),
            None => drive.await,
        };
        let (stdout, exit_code) = match result {
            Ok(done) => done,
            Err(source) => {
                // kill_on_drop reaps the child once it goes out of scope
                let _ = child.start_kill();
                return Err(BackendFailure {
                    source,
                    diagnostics,
                });
            }
        };

        tracing::debug!(
            phase = RequestPhase::Exited.as_str(),
            exit_code = ?exit_code,
            stdout_bytes = stdout.len(),
            stderr_bytes = diagnostics.len(),
            "process exited"
        );
        Ok(BackendOutput {
            stdout,
            diagnostics,
            exit_code,
        })
    }
}

async fn write_payload(
    stdin: Option<tokio::process::ChildStdin>,
    payload: &[u8],
) -> Result<(), ProcessError> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match stdin.write_all(payload).await {
        Ok(()) => {}
        // The child is free to exit without consuming its input.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            tracing::debug!("process closed stdin before the payload was fully written");
            return Ok(());
        }
        Err(e) => return Err(ProcessError::StdinWriteFailed(e)),
    }
    match stdin.shutdown().await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(ProcessError::StdinWriteFailed(e)),
    }
}

async fn drain_stdout<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
) -> Result<Vec<u8>, ProcessError> {
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(ProcessError::OutputReadFailed)?;
        if n == 0 {
            return Ok(buf);
        }
        if buf.len() + n > limit {
            return Err(ProcessError::OutputTooLarge { limit });
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Drains stderr to EOF into `buf`, keeping at most `limit` bytes.
async fn drain_diagnostics<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
    buf: &mut Vec<u8>,
) -> Result<(), ProcessError> {
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(ProcessError::OutputReadFailed)?;
        if n == 0 {
            return Ok(());
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
    }
}
