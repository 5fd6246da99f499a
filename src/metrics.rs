//! Pipeline run summaries for the dashboard's log view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

/// A single stage within a pipeline run. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRun {
    pub name: String,
    pub duration: f64,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    #[serde(default)]
    pub id: Option<String>,
    pub pipeline: String,
    pub duration: f64,
    pub status: RunStatus,
    #[serde(default)]
    pub stages: Vec<StageRun>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub name: String,
    pub runs: usize,
    pub average_duration_secs: f64,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_runs: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage of successful runs, one decimal place.
    pub success_rate: f64,
    pub average_duration_secs: f64,
    pub average_duration: String,
    pub stages: Vec<StageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_run_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn from_runs(runs: &[PipelineRun]) -> Self {
        let total_runs = runs.len();
        let successful = runs.iter().filter(|r| r.status == RunStatus::Success).count();
        let failed = runs.iter().filter(|r| r.status == RunStatus::Failed).count();

        let success_rate = if total_runs == 0 {
            0.0
        } else {
            round1(successful as f64 * 100.0 / total_runs as f64)
        };
        let average_duration_secs = if total_runs == 0 {
            0.0
        } else {
            round1(runs.iter().map(|r| r.duration).sum::<f64>() / total_runs as f64)
        };

        // First-seen order, so the dashboard lists stages as pipelines run them.
        let mut stages: Vec<(String, usize, f64, usize)> = Vec::new();
        for stage in runs.iter().flat_map(|r| &r.stages) {
            let idx = match stages.iter().position(|(name, ..)| *name == stage.name) {
                Some(idx) => idx,
                None => {
                    stages.push((stage.name.clone(), 0, 0.0, 0));
                    stages.len() - 1
                }
            };
            let entry = &mut stages[idx];
            entry.1 += 1;
            entry.2 += stage.duration;
            if stage.status == RunStatus::Failed {
                entry.3 += 1;
            }
        }

        Self {
            total_runs,
            successful,
            failed,
            success_rate,
            average_duration_secs,
            average_duration: format_duration(average_duration_secs),
            stages: stages
                .into_iter()
                .map(|(name, runs, total, failures)| StageSummary {
                    name,
                    runs,
                    average_duration_secs: round1(total / runs as f64),
                    failures,
                })
                .collect(),
            latest_run_at: runs.iter().filter_map(|r| r.started_at).max(),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Render seconds as `"2m 15s"`, or `"45s"` under a minute.
pub fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    let (minutes, seconds) = (total / 60, total % 60);
    if minutes == 0 {
        format!("{}s", seconds)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}
