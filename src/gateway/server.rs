use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use axum::{Router, extract::DefaultBodyLimit};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState, SharedState};
use super::backend::AnalysisBackend;
use super::diagnostics::DiagnosticPolicy;
use super::process::ProcessBackend;
use crate::config::{DEFAULT_MAX_BYTES, DeckConfig, Engine};
use crate::optimize::BuiltinOptimizer;

/// Configuration for the gateway HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub cors_permissive: bool,
    pub diagnostics: DiagnosticPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            max_body_bytes: DEFAULT_MAX_BYTES,
            cors_permissive: false,
            diagnostics: DiagnosticPolicy::default(),
        }
    }
}

impl From<&DeckConfig> for ServerConfig {
    fn from(config: &DeckConfig) -> Self {
        let server = &config.toml.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_body_bytes: server.max_body_bytes,
            cors_permissive: server.cors_permissive,
            diagnostics: server.diagnostics,
        }
    }
}

/// Build the full application router with body limit, tracing and optional CORS.
pub fn build_router(state: SharedState, config: &ServerConfig) -> Router {
    let mut app = api::api_router()
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if config.cors_permissive {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Construct the backends and diagnostic sink described by `config`.
pub fn build_state(config: &DeckConfig) -> Result<SharedState> {
    let toml = &config.toml;

    let analyzer: Arc<dyn AnalysisBackend> = match toml.analyzer.engine {
        Engine::Process => Arc::new(ProcessBackend::new(config.analyzer_spec())),
        Engine::Builtin => bail!(
            "No built-in analyzer engine is available; set [analyzer] engine = \"process\""
        ),
    };
    let optimizer: Arc<dyn AnalysisBackend> = match toml.optimizer.engine {
        Engine::Process => Arc::new(ProcessBackend::new(config.optimizer_spec())),
        Engine::Builtin => Arc::new(BuiltinOptimizer::new()),
    };

    Ok(Arc::new(AppState {
        analyzer,
        optimizer,
        diagnostics: toml.server.diagnostics.sink(),
        project_dir: config.project_dir.clone(),
    }))
}

/// Start the gateway and serve until Ctrl+C.
pub async fn start_server(config: &DeckConfig) -> Result<()> {
    let server_config = ServerConfig::from(config);
    let state = build_state(config)?;

    tracing::info!(
        analyzer = %state.analyzer.describe(),
        optimizer = %state.optimizer.describe(),
        diagnostics = %server_config.diagnostics,
        "backends configured"
    );

    let app = build_router(state, &server_config);

    let addr = format!("{}:{}", server_config.host, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr: SocketAddr = listener.local_addr()?;
    tracing::info!(%local_addr, "analysis gateway listening");
    println!("pipedeck gateway running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
