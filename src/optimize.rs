//! In-process optimizer engine.
//!
//! Reads the same `{"metrics": [{"stage": .., "duration": ..}]}` payload an
//! external optimizer would get on stdin and writes an
//! [`OptimizationReport`] as JSON to its output. Enabled with
//! `optimizer.engine = "builtin"`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{BackendFailure, ProcessError};
use crate::gateway::{AnalysisBackend, BackendOutput};

/// Average install time (seconds) above which caching is suggested.
const INSTALL_THRESHOLD_SECS: f64 = 30.0;
const INSTALL_HIGH_IMPACT_SECS: f64 = 60.0;
const TEST_THRESHOLD_SECS: f64 = 60.0;
const BUILD_THRESHOLD_SECS: f64 = 30.0;

#[derive(Debug, Deserialize)]
struct MetricsPayload {
    metrics: Vec<StageMetric>,
}

#[derive(Debug, Deserialize)]
struct StageMetric {
    stage: String,
    duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Caching,
    Parallelization,
    #[serde(rename = "Resource Optimization")]
    ResourceOptimization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub category: Category,
    pub stage: String,
    pub title: String,
    pub impact: Level,
    pub effort: Level,
    pub estimated_savings_secs: f64,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub suggestions: Vec<Suggestion>,
    pub total_savings_secs: f64,
    pub analyzed_stages: usize,
}

/// Rule-based optimizer running inside the gateway process.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinOptimizer;

impl BuiltinOptimizer {
    pub fn new() -> Self {
        Self
    }

    /// Build a report from per-stage durations.
    pub fn report(metrics: &[(String, f64)]) -> OptimizationReport {
        // Per-stage averages, first-seen order.
        let mut stages: Vec<(String, f64, usize)> = Vec::new();
        for (name, duration) in metrics {
            let key = name.to_lowercase();
            match stages.iter_mut().find(|(n, ..)| *n == key) {
                Some(entry) => {
                    entry.1 += duration;
                    entry.2 += 1;
                }
                None => stages.push((key, *duration, 1)),
            }
        }

        let mut suggestions = Vec::new();
        for (stage, total, count) in &stages {
            let avg = total / *count as f64;
            if let Some(suggestion) = suggest(stage, avg) {
                suggestions.push(suggestion);
            }
        }

        let total_savings_secs = round1(suggestions.iter().map(|s| s.estimated_savings_secs).sum());
        OptimizationReport {
            suggestions,
            total_savings_secs,
            analyzed_stages: stages.len(),
        }
    }
}

fn suggest(stage: &str, avg: f64) -> Option<Suggestion> {
    if stage.contains("install") || stage.contains("dependencies") {
        if avg <= INSTALL_THRESHOLD_SECS {
            return None;
        }
        return Some(Suggestion {
            category: Category::Caching,
            stage: stage.to_string(),
            title: "Cache dependencies between runs".to_string(),
            impact: if avg > INSTALL_HIGH_IMPACT_SECS {
                Level::High
            } else {
                Level::Medium
            },
            effort: Level::Low,
            estimated_savings_secs: round1(avg * 0.60),
            steps: steps(&[
                "Enable the package manager cache in the setup action",
                "Key the cache on the lockfile hash",
                "Restore the cache before installing dependencies",
            ]),
        });
    }

    if stage.contains("test") {
        if avg <= TEST_THRESHOLD_SECS {
            return None;
        }
        return Some(Suggestion {
            category: Category::Parallelization,
            stage: stage.to_string(),
            title: "Run tests in parallel shards".to_string(),
            impact: Level::Medium,
            effort: Level::Medium,
            estimated_savings_secs: round1(avg * 0.35),
            steps: steps(&[
                "Split the test suite with a job matrix",
                "Run independent suites concurrently",
                "Merge coverage reports in a final job",
            ]),
        });
    }

    if stage.contains("build") || stage.contains("compile") {
        if avg <= BUILD_THRESHOLD_SECS {
            return None;
        }
        return Some(Suggestion {
            category: Category::ResourceOptimization,
            stage: stage.to_string(),
            title: "Use larger runners for the build".to_string(),
            impact: Level::Medium,
            effort: Level::Low,
            estimated_savings_secs: round1(avg * 0.45),
            steps: steps(&[
                "Move the build job to a runner with more cores",
                "Enable incremental build caches",
            ]),
        });
    }

    None
}

fn steps(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[async_trait]
impl AnalysisBackend for BuiltinOptimizer {
    fn describe(&self) -> String {
        "builtin optimizer".to_string()
    }

    async fn submit(&self, payload: Vec<u8>) -> Result<BackendOutput, BackendFailure> {
        let parsed: MetricsPayload = match serde_json::from_slice(&payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                // No result output: the gateway answers with its parse-failure response.
                return Ok(BackendOutput {
                    stdout: Vec::new(),
                    diagnostics: format!("invalid metrics payload: {}", e).into_bytes(),
                    exit_code: Some(1),
                });
            }
        };

        let metrics: Vec<(String, f64)> = parsed
            .metrics
            .into_iter()
            .map(|m| (m.stage, m.duration))
            .collect();
        let report = Self::report(&metrics);
        tracing::debug!(
            stages = report.analyzed_stages,
            suggestions = report.suggestions.len(),
            "builtin optimizer report"
        );

        let stdout = serde_json::to_vec(&report).map_err(|e| {
            ProcessError::OutputReadFailed(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        Ok(BackendOutput::from_stdout(stdout))
    }
}
