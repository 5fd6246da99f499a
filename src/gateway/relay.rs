//! One gateway request, end to end: submit the payload, report
//! diagnostics, parse the result.

use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use super::backend::AnalysisBackend;
use super::diagnostics::DiagnosticSink;
use super::{Endpoint, RequestPhase};
use crate::errors::GatewayError;

/// Relay `payload` through `backend` and parse its output as one JSON value.
///
/// Diagnostics are reported whether or not the output parses, and also when
/// the backend fails outright. The backend's exit code plays no part in the
/// outcome.
pub async fn relay(
    backend: &dyn AnalysisBackend,
    endpoint: Endpoint,
    payload: Vec<u8>,
    diagnostics: &dyn DiagnosticSink,
) -> Result<Value, GatewayError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("relay", %request_id, %endpoint);

    async move {
        tracing::debug!(
            phase = RequestPhase::Created.as_str(),
            backend = %backend.describe(),
            bytes = payload.len(),
            "relaying payload"
        );

        let output = match backend.submit(payload).await {
            Ok(output) => output,
            Err(failure) => {
                report(diagnostics, endpoint, &failure.diagnostics);
                return Err(GatewayError::Backend {
                    endpoint,
                    source: failure.source,
                });
            }
        };
        report(diagnostics, endpoint, &output.diagnostics);

        let parsed = serde_json::from_slice::<Value>(&output.stdout)
            .map_err(|source| GatewayError::OutputParse { endpoint, source })?;

        tracing::info!(exit_code = ?output.exit_code, "{} output relayed", endpoint);
        Ok(parsed)
    }
    .instrument(span)
    .await
}

fn report(sink: &dyn DiagnosticSink, endpoint: Endpoint, text: &[u8]) {
    if !text.is_empty() {
        sink.report(endpoint, &String::from_utf8_lossy(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{BackendFailure, ProcessError};
    use crate::gateway::process::{ProcessBackend, ProcessSpec};
    use std::time::Duration;
    use crate::gateway::backend::BackendOutput;
    use crate::gateway::diagnostics::MemorySink;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays a fixed output and remembers the payloads it was given.
    struct FixedBackend {
        output: Result<BackendOutput, fn() -> BackendFailure>,
        seen: Mutex<Vec<Vec<u8>>>,
    }

    impl FixedBackend {
        fn ok(output: BackendOutput) -> Self {
            Self {
                output: Ok(output),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(make: fn() -> BackendFailure) -> Self {
            Self {
                output: Err(make),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AnalysisBackend for FixedBackend {
        fn describe(&self) -> String {
            "fixed".to_string()
        }

        async fn submit(&self, payload: Vec<u8>) -> Result<BackendOutput, BackendFailure> {
            self.seen.lock().unwrap().push(payload);
            match &self.output {
                Ok(output) => Ok(output.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    #[tokio::test]
    async fn test_valid_json_is_returned() {
        let backend = FixedBackend::ok(BackendOutput::from_stdout(
            r#"{"durationSeconds":42,"status":"success"}"#,
        ));
        let sink = MemorySink::new();

        let value = relay(
            &backend,
            Endpoint::Analyze,
            b"build succeeded in 42s".to_vec(),
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(value["durationSeconds"], 42);
        assert_eq!(value["status"], "success");
        assert_eq!(
            backend.seen.lock().unwrap().as_slice(),
            &[b"build succeeded in 42s".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_empty_output_is_parse_failure() {
        let backend = FixedBackend::ok(BackendOutput::from_stdout(Vec::new()));
        let sink = MemorySink::new();

        let err = relay(&backend, Endpoint::Analyze, Vec::new(), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::OutputParse { .. }));
        assert_eq!(err.public_message(), "Failed to parse analyzer output");
    }

    #[tokio::test]
    async fn test_diagnostics_reported_even_on_success() {
        let backend = FixedBackend::ok(
            BackendOutput::from_stdout("[1,2,3]").with_diagnostics("DeprecationWarning: old api"),
        );
        let sink = MemorySink::new();

        let value = relay(&backend, Endpoint::Optimize, b"{}".to_vec(), &sink)
            .await
            .unwrap();

        assert_eq!(value, serde_json::json!([1, 2, 3]));
        assert_eq!(
            sink.entries(),
            vec![(Endpoint::Optimize, "DeprecationWarning: old api".to_string())]
        );
    }

    #[tokio::test]
    async fn test_no_report_without_diagnostics() {
        let backend = FixedBackend::ok(BackendOutput::from_stdout("{}"));
        let sink = MemorySink::new();

        relay(&backend, Endpoint::Analyze, Vec::new(), &sink)
            .await
            .unwrap();
        assert!(sink.entries().is_empty());
    }

    #[tokio::test]
    async fn test_exit_code_is_ignored() {
        let mut output = BackendOutput::from_stdout(r#"{"ok":true}"#);
        output.exit_code = Some(2);
        let backend = FixedBackend::ok(output);

        let value = relay(&backend, Endpoint::Analyze, Vec::new(), &MemorySink::new())
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_backend_failure_maps_to_endpoint() {
        let backend =
            FixedBackend::failing(|| BackendFailure::from(ProcessError::OutputTooLarge { limit: 8 }));

        let err = relay(&backend, Endpoint::Optimize, Vec::new(), &MemorySink::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Backend {
                endpoint: Endpoint::Optimize,
                source: ProcessError::OutputTooLarge { limit: 8 }
            }
        ));
        assert_eq!(err.public_message(), "Failed to parse optimizer output");
    }

    #[tokio::test]
    async fn test_failure_diagnostics_are_reported() {
        let backend = FixedBackend::failing(|| {
            BackendFailure::from(ProcessError::OutputTooLarge { limit: 8 })
                .with_diagnostics("MemoryError: result too big")
        });
        let sink = MemorySink::new();

        let err = relay(&backend, Endpoint::Analyze, Vec::new(), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Backend { .. }));
        assert_eq!(
            sink.entries(),
            vec![(Endpoint::Analyze, "MemoryError: result too big".to_string())]
        );
    }

    #[tokio::test]
    async fn test_timed_out_process_stderr_reaches_sink() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::new(
            ProcessSpec::new("sh", dir.path())
                .with_args(["-c", "echo 'Traceback: disk full' >&2; sleep 5"])
                .with_timeout(Some(Duration::from_millis(500))),
        );
        let sink = MemorySink::new();

        let err = relay(&backend, Endpoint::Analyze, b"log".to_vec(), &sink)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Backend {
                source: ProcessError::TimedOut(_),
                ..
            }
        ));
        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].1.contains("disk full"));
    }
}
