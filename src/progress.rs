// Progress events broadcast to every subscriber while a job runs.

use serde::{Deserialize, Serialize};

use crate::models::JobStatus;

/// Pipeline stage a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Upload,
    Preprocess,
    Transcribe,
    Merge,
    Export,
}

/// Snapshot of a job's progress, emitted at state changes and after each
/// chunk completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub stage: Stage,
    pub percent: f64,
    pub eta_seconds: Option<i64>,
    pub chunks_done: i64,
    pub chunks_total: i64,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(
        job_id: &str,
        status: JobStatus,
        stage: Stage,
        percent: f64,
        eta_seconds: Option<i64>,
        chunks_done: i64,
        chunks_total: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            stage,
            percent: clamp_percent(percent),
            eta_seconds,
            chunks_done,
            chunks_total,
            message: message.into(),
        }
    }
}

/// Clamp to [0, 100] and round to two decimals.
pub fn clamp_percent(percent: f64) -> f64 {
    (percent.clamp(0.0, 100.0) * 100.0).round() / 100.0
}
