use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pixforge_core::JobId;
use pixforge_jobs::{JobRecord, JobStatus, StepProgress, WorkflowType};

use crate::app::errors;

/// Page size for `GET /jobs` when none is given, and the ceiling.
pub const DEFAULT_PAGE: usize = 20;
pub const MAX_PAGE: usize = 100;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct StartWorkflowRequest {
    pub workflow_type: String,
    pub input_ref: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<usize>,
}

impl ListJobsQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub workflow_type: WorkflowType,
    pub status: JobStatus,
    pub progress: u8,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobSummary {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.job_id,
            workflow_type: job.workflow_type,
            status: job.status,
            progress: job.progress,
            retry_count: job.retry_count,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobDetail {
    pub job_id: JobId,
    pub workflow_type: WorkflowType,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub steps: Vec<StepProgress>,
    pub error: Option<String>,
    pub credits_reserved: u32,
    pub credits_refunded: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl From<JobRecord> for JobDetail {
    fn from(job: JobRecord) -> Self {
        Self {
            job_id: job.job_id,
            workflow_type: job.workflow_type,
            status: job.status,
            progress: job.progress,
            current_step: job.current_step,
            steps: job.step_progress,
            error: job.error,
            credits_reserved: job.credits_reserved,
            credits_refunded: job.credits_refunded,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            created_at: job.created_at,
            completed_at: job.completed_at,
            expires_at: job.expires_at,
        }
    }
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_job_id(s: &str) -> Result<JobId, axum::response::Response> {
    s.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}

pub fn parse_workflow_type(s: &str) -> Result<WorkflowType, axum::response::Response> {
    s.trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(|e: pixforge_core::DomainError| {
            errors::json_error(StatusCode::BAD_REQUEST, "unknown_workflow_type", e.to_string())
        })
}
