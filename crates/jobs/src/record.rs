//! Job record and its state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use pixforge_core::{DomainError, DomainResult, JobId, UserId};
use pixforge_credits::Deduction;

use crate::workflow::{WorkflowDefinition, WorkflowType};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Progress of one named step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub name: String,
    pub status: StepStatus,
    pub progress: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StepProgress {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            progress: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Read model returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub error: Option<String>,
}

/// Durable record of one workflow execution.
///
/// Mutated only by the task that owns the job; every transition checks the
/// current status and fails with `InvalidStateTransition` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub user_id: UserId,
    pub workflow_type: WorkflowType,
    pub input_ref: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    /// Ordered as the workflow's steps.
    pub step_progress: Vec<StepProgress>,
    pub credits_reserved: u32,
    /// Receipt of the credits currently held by this job.
    pub reservation: Option<Deduction>,
    pub credits_refunded: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub results: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl JobRecord {
    /// A new record in `processing`, every step pending.
    pub fn start(
        job_id: JobId,
        user_id: UserId,
        workflow: &WorkflowDefinition,
        input_ref: impl Into<String>,
        max_retries: u32,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            user_id,
            workflow_type: workflow.workflow_type,
            input_ref: input_ref.into(),
            status: JobStatus::Processing,
            progress: 0,
            current_step: None,
            step_progress: workflow
                .steps
                .iter()
                .map(|s| StepProgress::pending(s.name))
                .collect(),
            credits_reserved: 0,
            reservation: None,
            credits_refunded: false,
            retry_count: 0,
            max_retries,
            results: None,
            error: None,
            created_at: now,
            completed_at: None,
            expires_at: now + retention,
        }
    }

    fn require(&self, expected: JobStatus, action: &str) -> DomainResult<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.status.as_str(), action))
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepProgress> {
        self.step_progress.iter().find(|s| s.name == name)
    }

    /// Record the credits held for this run.
    pub fn attach_reservation(&mut self, deduction: Deduction) {
        self.credits_reserved = deduction.units();
        self.reservation = Some(deduction);
        self.credits_refunded = false;
    }

    pub fn mark_refunded(&mut self) {
        self.credits_refunded = true;
    }

    /// Failed or cancelled with credits still held.
    pub fn needs_refund(&self) -> bool {
        matches!(self.status, JobStatus::Failed | JobStatus::Cancelled)
            && !self.credits_refunded
            && self.reservation.is_some()
    }

    pub fn update_progress(
        &mut self,
        step: &str,
        progress: u8,
        step_status: StepStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.require(JobStatus::Processing, "update progress")?;
        if progress > 100 {
            return Err(DomainError::validation(format!(
                "progress must be within 0..=100, got {progress}"
            )));
        }

        self.current_step = Some(step.to_string());
        self.progress = progress;

        let idx = match self.step_progress.iter().position(|s| s.name == step) {
            Some(idx) => idx,
            None => {
                self.step_progress.push(StepProgress::pending(step));
                self.step_progress.len() - 1
            }
        };
        let entry = &mut self.step_progress[idx];
        if step_status == StepStatus::Processing && entry.started_at.is_none() {
            entry.started_at = Some(now);
        }
        if matches!(step_status, StepStatus::Completed | StepStatus::Failed) {
            entry.completed_at = Some(now);
        }
        if step_status == StepStatus::Completed {
            entry.progress = 100;
        }
        entry.status = step_status;
        entry.error = error;
        Ok(())
    }

    pub fn complete(&mut self, results: serde_json::Value, now: DateTime<Utc>) -> DomainResult<()> {
        self.require(JobStatus::Processing, "complete")?;
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(now);
        self.results = Some(results);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.require(JobStatus::Processing, "fail")?;
        self.status = JobStatus::Failed;
        self.completed_at = Some(now);
        self.error = Some(error.into());
        Ok(())
    }

    pub fn can_retry(&self) -> DomainResult<()> {
        self.require(JobStatus::Failed, "retry")?;
        if self.retry_count >= self.max_retries {
            return Err(DomainError::invalid_transition(
                format!("failed after {} retries", self.retry_count),
                "retry",
            ));
        }
        Ok(())
    }

    /// Back to `processing` from scratch. The previous reservation is dropped;
    /// the caller attaches the new one.
    pub fn retry(&mut self) -> DomainResult<()> {
        self.can_retry()?;
        self.retry_count += 1;
        self.status = JobStatus::Processing;
        self.progress = 0;
        self.current_step = None;
        self.error = None;
        self.results = None;
        self.completed_at = None;
        self.credits_reserved = 0;
        self.reservation = None;
        self.credits_refunded = false;
        for step in &mut self.step_progress {
            *step = StepProgress::pending(step.name.clone());
        }
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.require(JobStatus::Processing, "cancel")?;
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        Ok(())
    }

    /// No further transition is possible.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            JobStatus::Processing => false,
            JobStatus::Failed => self.retry_count >= self.max_retries,
            JobStatus::Completed | JobStatus::Cancelled => true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.job_id,
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            error: self.error.clone(),
        }
    }
}
