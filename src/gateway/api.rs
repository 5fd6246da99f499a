use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::backend::AnalysisBackend;
use super::diagnostics::DiagnosticSink;
use super::relay::relay;
use super::{Endpoint, RequestPhase};
use crate::errors::{GatewayError, StackError};
use crate::metrics::{PipelineRun, RunSummary};
use crate::stack::{self, TechStack, workflow};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub analyzer: Arc<dyn AnalysisBackend>,
    pub optimizer: Arc<dyn AnalysisBackend>,
    pub diagnostics: Arc<dyn DiagnosticSink>,
    /// Base for paths given to `/api/stack/detect`; detection never leaves it
    pub project_dir: PathBuf,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DetectStackRequest {
    pub path: Option<String>,
}

#[derive(Deserialize)]
pub struct SummaryRequest {
    #[serde(default)]
    pub runs: Vec<PipelineRun>,
}

#[derive(Serialize)]
pub struct GeneratedPipelineResponse {
    pub filename: String,
    pub yaml: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        // The caller only ever sees the fixed endpoint message.
        tracing::error!(error = %err, "{} request failed", err.endpoint());
        ApiError::Internal(err.public_message().to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route(Endpoint::Analyze.path(), post(analyze))
        .route(Endpoint::Optimize.path(), post(optimize))
        .route("/api/stack/detect", post(detect_stack))
        .route("/api/pipelines/generate", post(generate_pipeline))
        .route("/api/metrics/summary", post(summarize_runs))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

/// `POST /analyze`: forward the raw body to the analyzer.
async fn analyze(State(state): State<SharedState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    tracing::debug!(
        phase = RequestPhase::ReceivingInput.as_str(),
        bytes = body.len(),
        "log upload received"
    );
    let result = relay(
        state.analyzer.as_ref(),
        Endpoint::Analyze,
        body.to_vec(),
        state.diagnostics.as_ref(),
    )
    .await?;
    tracing::debug!(phase = RequestPhase::Responded.as_str(), "analysis returned");
    Ok(Json(result))
}

/// `POST /optimize`: re-serialize the JSON body and forward it to the optimizer.
///
/// The body is parsed without looking at `Content-Type`. An empty body is
/// forwarded as `{}`.
async fn optimize(State(state): State<SharedState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    tracing::debug!(
        phase = RequestPhase::ReceivingInput.as_str(),
        bytes = body.len(),
        "metrics payload received"
    );
    let metrics = parse_optimize_body(&body)?;
    let payload = serde_json::to_vec(&metrics)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize metrics: {}", e)))?;

    let result = relay(
        state.optimizer.as_ref(),
        Endpoint::Optimize,
        payload,
        state.diagnostics.as_ref(),
    )
    .await?;
    tracing::debug!(phase = RequestPhase::Responded.as_str(), "optimization returned");
    Ok(Json(result))
}

fn parse_optimize_body(body: &[u8]) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Request body is not valid JSON: {}", e)))
}

async fn detect_stack(
    State(state): State<SharedState>,
    payload: Result<Json<DetectStackRequest>, JsonRejection>,
) -> Result<Json<TechStack>, ApiError> {
    let Json(req) = payload?;
    let path = req
        .path
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing 'path'".into()))?;
    let project_dir = state.project_dir.clone();

    tokio::task::spawn_blocking(move || detect_within(&project_dir, &path))
        .await
        .map_err(|e| ApiError::Internal(format!("Detection task failed: {}", e)))?
        .map(Json)
}

/// Detect the stack at `requested`, resolved against `project_dir`.
///
/// The resolved path is canonicalized first, so `..`, absolute paths and
/// symlinks that lead outside the project are refused like missing paths.
fn detect_within(project_dir: &Path, requested: &str) -> Result<TechStack, ApiError> {
    let refused = || {
        ApiError::BadRequest(format!(
            "Path '{}' is not a directory inside the project",
            requested
        ))
    };
    let base = project_dir
        .canonicalize()
        .map_err(|e| ApiError::Internal(format!("Project directory unavailable: {}", e)))?;
    let root = base.join(requested).canonicalize().map_err(|_| refused())?;
    if !root.starts_with(&base) {
        tracing::warn!(path = %requested, "stack detection outside the project refused");
        return Err(refused());
    }

    match stack::detect(&root) {
        Ok(stack) => Ok(stack),
        Err(e @ (StackError::PathNotFound { .. } | StackError::NotADirectory { .. })) => {
            Err(ApiError::BadRequest(e.to_string()))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

async fn generate_pipeline(
    payload: Result<Json<TechStack>, JsonRejection>,
) -> Result<Json<GeneratedPipelineResponse>, ApiError> {
    let Json(stack) = payload?;
    let generated = workflow::generate(&stack)
        .map_err(|e| ApiError::Internal(format!("Failed to render workflow: {}", e)))?;
    Ok(Json(GeneratedPipelineResponse {
        filename: generated.filename,
        yaml: generated.yaml,
    }))
}

async fn summarize_runs(
    payload: Result<Json<SummaryRequest>, JsonRejection>,
) -> Result<Json<RunSummary>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(RunSummary::from_runs(&req.runs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackendFailure;
    use crate::gateway::backend::BackendOutput;
    use crate::gateway::diagnostics::MemorySink;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    /// Test double: echoes a scripted stdout/stderr pair and records payloads.
    struct MockBackend {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        calls: AtomicUsize,
        payloads: Mutex<Vec<Vec<u8>>>,
    }

    impl MockBackend {
        fn new(stdout: &str, stderr: &str) -> Arc<Self> {
            Arc::new(Self {
                stdout: stdout.as_bytes().to_vec(),
                stderr: stderr.as_bytes().to_vec(),
                calls: AtomicUsize::new(0),
                payloads: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AnalysisBackend for MockBackend {
        fn describe(&self) -> String {
            "mock".to_string()
        }

        async fn submit(&self, payload: Vec<u8>) -> Result<BackendOutput, BackendFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.payloads.lock().unwrap().push(payload);
            Ok(BackendOutput::from_stdout(self.stdout.clone()).with_diagnostics(self.stderr.clone()))
        }
    }

    struct Harness {
        app: Router,
        analyzer: Arc<MockBackend>,
        optimizer: Arc<MockBackend>,
        sink: Arc<MemorySink>,
    }

    fn harness(analyzer: Arc<MockBackend>, optimizer: Arc<MockBackend>) -> Harness {
        let sink = Arc::new(MemorySink::new());
        let state = Arc::new(AppState {
            analyzer: analyzer.clone(),
            optimizer: optimizer.clone(),
            diagnostics: sink.clone(),
            project_dir: std::env::temp_dir(),
        });
        Harness {
            app: api_router().with_state(state),
            analyzer,
            optimizer,
            sink,
        }
    }

    fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(body.into())
            .unwrap()
    }

    async fn body_text(body: Body) -> String {
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let h = harness(MockBackend::new("{}", ""), MockBackend::new("{}", ""));
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response.into_body()).await, "ok");
    }

    #[tokio::test]
    async fn test_analyze_returns_analyzer_json() {
        let h = harness(
            MockBackend::new(r#"{"durationSeconds":42,"status":"success"}"#, ""),
            MockBackend::new("{}", ""),
        );

        let response = h
            .app
            .oneshot(post("/analyze", "build succeeded in 42s"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response.into_body()).await,
            r#"{"durationSeconds":42,"status":"success"}"#
        );
        assert_eq!(
            h.analyzer.payloads.lock().unwrap().as_slice(),
            &[b"build succeeded in 42s".to_vec()]
        );
        assert_eq!(h.optimizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_analyze_parse_failure() {
        let h = harness(MockBackend::new("", ""), MockBackend::new("{}", ""));

        let response = h.app.oneshot(post("/analyze", "log")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body, serde_json::json!({"error": "Failed to parse analyzer output"}));
    }

    #[tokio::test]
    async fn test_optimize_parse_failure() {
        let h = harness(
            MockBackend::new("{}", ""),
            MockBackend::new("ERROR: bad input", ""),
        );

        let response = h
            .app
            .oneshot(post(
                "/optimize",
                r#"{"metrics":[{"stage":"install","duration":89}]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_text(response.into_body()).await,
            r#"{"error":"Failed to parse optimizer output"}"#
        );
    }

    #[tokio::test]
    async fn test_optimize_forwards_reserialized_body() {
        let h = harness(MockBackend::new("{}", ""), MockBackend::new(r#"{"ok":1}"#, ""));

        let response = h
            .app
            .oneshot(post(
                "/optimize",
                "{ \"metrics\" : [ {\"stage\": \"install\", \"duration\": 89} ] }",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let payloads = h.optimizer.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(
            String::from_utf8(payloads[0].clone()).unwrap(),
            r#"{"metrics":[{"stage":"install","duration":89}]}"#
        );
    }

    #[tokio::test]
    async fn test_optimize_accepts_any_json_value() {
        let h = harness(MockBackend::new("{}", ""), MockBackend::new("true", ""));

        let response = h.app.oneshot(post("/optimize", "[1, 2]")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response.into_body()).await, "true");
        assert_eq!(h.optimizer.payloads.lock().unwrap()[0], b"[1,2]".to_vec());
    }

    #[tokio::test]
    async fn test_optimize_empty_body_forwards_empty_object() {
        let h = harness(MockBackend::new("{}", ""), MockBackend::new("{}", ""));

        let response = h.app.oneshot(post("/optimize", Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.optimizer.payloads.lock().unwrap()[0], b"{}".to_vec());
    }

    #[tokio::test]
    async fn test_optimize_rejects_non_json_without_spawning() {
        let h = harness(MockBackend::new("{}", ""), MockBackend::new("{}", ""));

        let response = h.app.oneshot(post("/optimize", "not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(h.optimizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_diagnostics_never_reach_response() {
        let h = harness(
            MockBackend::new(r#"{"status":"success"}"#, "Traceback: secret internals"),
            MockBackend::new("{}", ""),
        );

        let response = h.app.oneshot(post("/analyze", "log")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response.into_body()).await;
        assert!(!text.contains("Traceback"));

        let entries = h.sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, Endpoint::Analyze);
        assert!(entries[0].1.contains("secret internals"));
    }

    #[tokio::test]
    async fn test_diagnostics_never_reach_failure_response() {
        let h = harness(
            MockBackend::new("garbage", "Traceback: boom"),
            MockBackend::new("{}", ""),
        );

        let response = h.app.oneshot(post("/analyze", "log")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let text = body_text(response.into_body()).await;
        assert!(!text.contains("boom"));
        assert_eq!(h.sink.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_one_backend_call_per_request() {
        let h = harness(MockBackend::new("{}", ""), MockBackend::new("{}", ""));

        let (a, b) = tokio::join!(
            h.app.clone().oneshot(post("/analyze", "first")),
            h.app.clone().oneshot(post("/analyze", "second")),
        );
        assert_eq!(a.unwrap().status(), StatusCode::OK);
        assert_eq!(b.unwrap().status(), StatusCode::OK);

        assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 2);
        let mut payloads = h.analyzer.payloads.lock().unwrap().clone();
        payloads.sort();
        assert_eq!(payloads, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[tokio::test]
    async fn test_generate_pipeline() {
        let h = harness(MockBackend::new("{}", ""), MockBackend::new("{}", ""));
        let request = Request::builder()
            .method("POST")
            .uri("/api/pipelines/generate")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"language": "Rust", "packageManager": "cargo"}).to_string(),
            ))
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["filename"], ".github/workflows/ci.yml");
        assert!(body["yaml"].as_str().unwrap().contains("cargo test"));
    }

    #[tokio::test]
    async fn test_generate_pipeline_rejects_bad_json() {
        let h = harness(MockBackend::new("{}", ""), MockBackend::new("{}", ""));
        let request = Request::builder()
            .method("POST")
            .uri("/api/pipelines/generate")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_detect_stack_missing_path() {
        let h = harness(MockBackend::new("{}", ""), MockBackend::new("{}", ""));
        let request = Request::builder()
            .method("POST")
            .uri("/api/stack/detect")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_detect_stack_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"react": "^18"}, "devDependencies": {"jest": "^29"}}"#,
        )
        .unwrap();

        let h = harness(MockBackend::new("{}", ""), MockBackend::new("{}", ""));
        let request = Request::builder()
            .method("POST")
            .uri("/api/stack/detect")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"path": dir.path().to_string_lossy()}).to_string(),
            ))
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stack: Value = body_json(response.into_body()).await;
        assert_eq!(stack["language"], "JavaScript");
        assert_eq!(stack["framework"], "React");
        assert_eq!(stack["testFramework"], "Jest");
    }

    fn detect_request(path: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/stack/detect")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({ "path": path }).to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_detect_stack_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
        let name = dir.path().file_name().unwrap().to_string_lossy().to_string();

        let h = harness(MockBackend::new("{}", ""), MockBackend::new("{}", ""));
        let response = h.app.oneshot(detect_request(&name)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stack: Value = body_json(response.into_body()).await;
        assert_eq!(stack["language"], "Rust");
    }

    #[tokio::test]
    async fn test_detect_stack_refuses_paths_outside_project() {
        for path in ["..", "../..", "/etc", "/"] {
            let h = harness(MockBackend::new("{}", ""), MockBackend::new("{}", ""));
            let response = h.app.oneshot(detect_request(path)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "path {}", path);
            let body: Value = body_json(response.into_body()).await;
            assert!(
                body["error"]
                    .as_str()
                    .unwrap()
                    .contains("not a directory inside the project")
            );
        }
    }

    #[tokio::test]
    async fn test_detect_stack_missing_directory_is_400() {
        let h = harness(MockBackend::new("{}", ""), MockBackend::new("{}", ""));
        let response = h
            .app
            .oneshot(detect_request("pipedeck-no-such-dir-7f3a"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[cfg(unix)]
    #[test]
    fn test_detect_within_refuses_symlink_escape() {
        let project = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("go.mod"), "module example.com/x\n").unwrap();
        std::os::unix::fs::symlink(outside.path(), project.path().join("link")).unwrap();

        let err = detect_within(project.path(), "link").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        std::fs::create_dir(project.path().join("svc")).unwrap();
        std::fs::write(project.path().join("svc/go.mod"), "module example.com/svc\n").unwrap();
        let stack = detect_within(project.path(), "svc/../svc").unwrap();
        assert_eq!(stack.language.as_deref(), Some("Go"));
    }

    #[tokio::test]
    async fn test_summarize_runs() {
        let h = harness(MockBackend::new("{}", ""), MockBackend::new("{}", ""));
        let request = Request::builder()
            .method("POST")
            .uri("/api/metrics/summary")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"runs": [
                    {"pipeline": "frontend-build", "duration": 245, "status": "success"},
                    {"pipeline": "backend-test", "duration": 178, "status": "failed"}
                ]})
                .to_string(),
            ))
            .unwrap();

        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let summary: Value = body_json(response.into_body()).await;
        assert_eq!(summary["totalRuns"], 2);
        assert_eq!(summary["successRate"], 50.0);
    }
}
