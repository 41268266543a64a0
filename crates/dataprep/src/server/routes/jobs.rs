//! Job queue inspection endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::processing::{JobRecord, JobState, ProgressSnapshot, QueueStats};
use crate::server::state::AppState;

/// Job listing entry
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub result_id: String,
    pub dataset_id: String,
    pub status: JobState,
    pub progress: ProgressSnapshot,
    pub steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobRecord> for JobSummary {
    fn from(record: JobRecord) -> Self {
        Self {
            steps: record.config.len(),
            result_id: record.result_id,
            dataset_id: record.dataset_id,
            status: record.state,
            progress: record.progress,
            error_message: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub stats: QueueStats,
    pub worker_count: usize,
    /// Datasets and results currently locked by an operation
    pub active_locks: usize,
    pub jobs: Vec<JobSummary>,
}

/// GET /api/jobs - Jobs known to this process
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    let jobs = state.executor().jobs();
    Json(JobListResponse {
        stats: jobs.stats(),
        worker_count: state.config().processing.workers(),
        active_locks: state.executor().locks().busy_count(),
        jobs: jobs.list().into_iter().map(JobSummary::from).collect(),
    })
}

/// GET /api/jobs/:id - One job's in-memory record
pub async fn get_job(
    State(state): State<AppState>,
    Path(result_id): Path<String>,
) -> Result<Json<JobSummary>> {
    state
        .executor()
        .jobs()
        .get(&result_id)
        .map(|record| Json(JobSummary::from(record)))
        .ok_or_else(|| Error::not_found(format!("Job {} not found", result_id)))
}
