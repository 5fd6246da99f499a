//! Analysis Gateway: HTTP-to-process bridge.
//!
//! ## Overview
//!
//! The gateway accepts a log upload (`POST /analyze`) or a metrics payload
//! (`POST /optimize`), hands the payload to a backend, and relays the single
//! JSON value the backend produces as the HTTP response.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘          │         │                                        │
//!                       │         │ relay::relay()                         │
//!                       │         v                                        │
//!                       │  relay.rs  (submit → report stderr → parse)      │
//!                       │         │                                        │
//!                       │         │ AnalysisBackend::submit()              │
//!                       │         v                                        │
//!                       │  backend.rs   (AnalysisBackend trait)            │
//!                       │    ├─ process.rs  (ProcessBackend, tokio child)  │
//!                       │    └─ optimize::BuiltinOptimizer (in-process)    │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! Stderr from a backend goes to a `DiagnosticSink` (`diagnostics.rs`) and
//! never reaches the HTTP caller.
//!
//! ## Request lifecycle
//!
//! Every request walks the same linear sequence of [`RequestPhase`]s and
//! produces exactly one response, after the backend has exited.

pub mod api;
pub mod backend;
pub mod diagnostics;
pub mod process;
pub mod relay;
pub mod server;

pub use backend::{AnalysisBackend, BackendOutput};
pub use diagnostics::{DiagnosticPolicy, DiagnosticSink, DiscardSink, MemorySink, TracingSink};
pub use process::{ProcessBackend, ProcessSpec};

use serde::{Deserialize, Serialize};

/// The two relay endpoints exposed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// `POST /analyze`: raw log bytes
    Analyze,
    /// `POST /optimize`: JSON metrics payload
    Optimize,
}

impl Endpoint {
    /// Name of the backend serving this endpoint, as used in logs and messages.
    pub fn backend_name(self) -> &'static str {
        match self {
            Endpoint::Analyze => "analyzer",
            Endpoint::Optimize => "optimizer",
        }
    }

    /// Route path of this endpoint.
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Analyze => "/analyze",
            Endpoint::Optimize => "/optimize",
        }
    }

    /// Fixed error message returned with a 500 when the backend output cannot be used.
    pub fn parse_failure_message(self) -> &'static str {
        match self {
            Endpoint::Analyze => "Failed to parse analyzer output",
            Endpoint::Optimize => "Failed to parse optimizer output",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.backend_name())
    }
}

/// States a single gateway request moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Created,
    ReceivingInput,
    Spawned,
    WritingStdin,
    DrainingStdout,
    Exited,
    Responded,
}

impl RequestPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestPhase::Created => "created",
            RequestPhase::ReceivingInput => "receiving_input",
            RequestPhase::Spawned => "spawned",
            RequestPhase::WritingStdin => "writing_stdin",
            RequestPhase::DrainingStdout => "draining_stdout",
            RequestPhase::Exited => "exited",
            RequestPhase::Responded => "responded",
        }
    }
}
