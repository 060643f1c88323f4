//! Pipeline orchestrator.
//!
//! Starts, retries and cancels workflows. Each job runs as a detached tokio
//! task gated by a bounded worker pool; the persisted [`JobRecord`] is the only
//! source of truth for progress, so status can always be rebuilt from the
//! store. Every failure path leaves the job terminal with its reservation
//! refunded (or queued for [`PipelineOrchestrator::reconcile_refunds`]).
//!
//! Every call that writes a job first claims it in the supervisor and re-reads
//! it under the claim, so two calls can never act on the same job at once.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use pixforge_core::{Clock, DomainError, JobId, UserId};
use pixforge_credits::{Action, ChargeRef, CreditsSummary, Deduction};
use pixforge_events::ProgressNotifier;
use pixforge_jobs::{JobRecord, JobStatus, JobStatusView, WorkflowRegistry, WorkflowType};

use crate::config::OrchestratorConfig;
use crate::job_store::{JobStore, JobStoreError};
use crate::ledger::{CreditLedger, LedgerError};
use crate::provider::{ProcessingProvider, ProviderError};

mod pipeline;
mod supervisor;
mod sweeper;

pub use supervisor::CancelFlag;
pub use sweeper::{SweeperHandle, SweeperStats};

use supervisor::{Claim, Supervisor};

/// Batch size for maintenance scans.
const MAINTENANCE_BATCH: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Rejected before any job record was created.
    #[error("insufficient credits: {workflow_type} needs {required} {action} credit(s)")]
    InsufficientCredits {
        workflow_type: WorkflowType,
        action: Action,
        required: u32,
    },
    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),
    #[error("provider failure: {0}")]
    ProviderFailure(#[from] ProviderError),
    /// Transient; the caller may try again.
    #[error("persistence conflict after {attempts} attempts")]
    PersistenceConflict { attempts: u32 },
    #[error("results not ready: job is {status}")]
    ResultsNotReady { status: JobStatus },
    /// A previous run's credits are still held and could not be returned.
    #[error("refund outstanding for job {0}")]
    RefundOutstanding(JobId),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Ledger(LedgerError),
    #[error(transparent)]
    Store(JobStoreError),
}

impl From<DomainError> for OrchestratorError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidStateTransition { .. } => {
                OrchestratorError::InvalidStateTransition(err.to_string())
            }
            DomainError::Validation(msg) => OrchestratorError::Validation(msg),
            other => OrchestratorError::Validation(other.to_string()),
        }
    }
}

impl From<LedgerError> for OrchestratorError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::PersistenceConflict { attempts } => {
                OrchestratorError::PersistenceConflict { attempts }
            }
            LedgerError::Domain(domain) => domain.into(),
            other => OrchestratorError::Ledger(other),
        }
    }
}

impl From<JobStoreError> for OrchestratorError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(job_id) => OrchestratorError::JobNotFound(job_id),
            other => OrchestratorError::Store(other),
        }
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The running task was flagged and will stop at the next step boundary.
    Requested,
    /// No task was running; the job was cancelled and refunded directly.
    Cancelled,
}

/// Collaborators wired into the orchestrator.
pub struct OrchestratorParts {
    pub ledger: Arc<CreditLedger>,
    pub jobs: Arc<dyn JobStore>,
    pub provider: Arc<dyn ProcessingProvider>,
    pub notifier: Arc<ProgressNotifier>,
    pub registry: WorkflowRegistry,
    pub clock: Arc<dyn Clock>,
}

pub(crate) struct Inner {
    ledger: Arc<CreditLedger>,
    jobs: Arc<dyn JobStore>,
    provider: Arc<dyn ProcessingProvider>,
    notifier: Arc<ProgressNotifier>,
    registry: WorkflowRegistry,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    supervisor: Supervisor,
    permits: Arc<Semaphore>,
}

#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("config", &self.inner.config)
            .field("running", &self.inner.supervisor.running())
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    pub fn new(parts: OrchestratorParts, config: OrchestratorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(Inner {
                ledger: parts.ledger,
                jobs: parts.jobs,
                provider: parts.provider,
                notifier: parts.notifier,
                registry: parts.registry,
                clock: parts.clock,
                config,
                supervisor: Supervisor::default(),
                permits,
            }),
        }
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.inner.ledger
    }

    pub fn notifier(&self) -> &Arc<ProgressNotifier> {
        &self.inner.notifier
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Jobs with a live background task or an operation in flight.
    pub fn running_jobs(&self) -> usize {
        self.inner.supervisor.running()
    }

    async fn load(&self, job_id: JobId) -> Result<JobRecord, OrchestratorError> {
        self.inner
            .jobs
            .get(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(job_id))
    }

    /// Exclusive hold on `job_id`, or a rejection naming `action`.
    fn claim(&self, job_id: JobId, action: &str) -> Result<Claim<'_>, OrchestratorError> {
        self.inner
            .supervisor
            .try_claim(job_id)
            .ok_or_else(|| DomainError::invalid_transition("busy", action).into())
    }

    fn launch(&self, job_id: JobId, claim: Claim<'_>) {
        let (run_id, cancel) = claim.hand_off();
        let inner = self.inner.clone();
        let task = tokio::spawn(inner.drive(job_id, run_id, cancel));
        self.inner.supervisor.attach(job_id, run_id, task);
    }

    async fn release(&self, user_id: UserId, reservation: &Deduction) {
        if let Err(err) = self.inner.ledger.refund(user_id, reservation).await {
            error!(user_id = %user_id, error = %err, "could not release reservation after failed start");
        }
    }

    /// Reserve credits, persist a `processing` job and launch its pipeline.
    ///
    /// Either returns the job id with credits already reserved, or rejects
    /// with no job record and no credit movement.
    pub async fn start_workflow(
        &self,
        user_id: UserId,
        workflow_type: WorkflowType,
        input_ref: impl Into<String>,
    ) -> Result<JobId, OrchestratorError> {
        let input_ref = input_ref.into();
        if input_ref.trim().is_empty() {
            return Err(OrchestratorError::Validation("input reference is empty".to_string()));
        }
        let inner = &self.inner;
        let workflow = inner
            .registry
            .get(workflow_type)
            .ok_or_else(|| OrchestratorError::UnknownWorkflowType(workflow_type.to_string()))?;

        if !inner.ledger.can_afford(user_id, workflow.action, workflow.cost).await? {
            return Err(OrchestratorError::InsufficientCredits {
                workflow_type,
                action: workflow.action,
                required: workflow.cost,
            });
        }

        let job_id = JobId::new();
        let claim = self.claim(job_id, "start")?;
        let mut job = JobRecord::start(
            job_id,
            user_id,
            workflow,
            input_ref,
            inner.config.max_retries,
            inner.config.job_retention,
            inner.clock.now(),
        );
        let reservation = inner.ledger.deduct(user_id, workflow.action, workflow.cost).await?;
        job.attach_reservation(reservation.clone().for_charge(ChargeRef::new(job_id, job.retry_count)));

        if let Err(err) = inner.jobs.insert(&job).await {
            self.release(user_id, &reservation).await;
            return Err(err.into());
        }

        info!(
            job_id = %job_id,
            user_id = %user_id,
            workflow = %workflow_type,
            credits = job.credits_reserved,
            "workflow started"
        );
        self.launch(job_id, claim);
        Ok(job_id)
    }

    /// Re-run a failed job from its first step, reserving credits again.
    ///
    /// Of two concurrent retries of the same job only one is accepted; the
    /// other is rejected without charging.
    pub async fn retry_workflow(&self, job_id: JobId) -> Result<(), OrchestratorError> {
        let inner = &self.inner;
        let claim = self.claim(job_id, "retry")?;
        let mut job = self.load(job_id).await?;
        job.can_retry()?;

        if job.needs_refund() && !inner.settle_refund(&mut job).await? {
            return Err(OrchestratorError::RefundOutstanding(job_id));
        }

        let workflow = inner
            .registry
            .get(job.workflow_type)
            .ok_or_else(|| OrchestratorError::UnknownWorkflowType(job.workflow_type.to_string()))?;
        if !inner.ledger.can_afford(job.user_id, workflow.action, workflow.cost).await? {
            return Err(OrchestratorError::InsufficientCredits {
                workflow_type: job.workflow_type,
                action: workflow.action,
                required: workflow.cost,
            });
        }

        let reservation = inner.ledger.deduct(job.user_id, workflow.action, workflow.cost).await?;
        if let Err(err) = job.retry() {
            self.release(job.user_id, &reservation).await;
            return Err(err.into());
        }
        job.attach_reservation(reservation.clone().for_charge(ChargeRef::new(job_id, job.retry_count)));

        if let Err(err) = inner.jobs.save(&job).await {
            self.release(job.user_id, &reservation).await;
            return Err(err.into());
        }

        info!(job_id = %job_id, retry = job.retry_count, "workflow retried");
        self.launch(job_id, claim);
        Ok(())
    }

    /// Ask a `processing` job to stop.
    ///
    /// A running task finishes its in-flight provider call, then cancels and
    /// refunds at the next step boundary. A job with no live task (e.g. after
    /// a restart) is cancelled and refunded here.
    pub async fn cancel_workflow(&self, job_id: JobId) -> Result<CancelOutcome, OrchestratorError> {
        let job = self.load(job_id).await?;
        if job.status != JobStatus::Processing {
            return Err(DomainError::invalid_transition(job.status.as_str(), "cancel").into());
        }

        let supervisor = &self.inner.supervisor;
        if supervisor.request_cancel(job_id) {
            info!(job_id = %job_id, "cancellation requested");
            return Ok(CancelOutcome::Requested);
        }
        let Some(_claim) = supervisor.try_claim(job_id) else {
            // Claimed since the check above; the holder sees the flag.
            supervisor.request_cancel(job_id);
            info!(job_id = %job_id, "cancellation requested");
            return Ok(CancelOutcome::Requested);
        };

        // The run may have finished since the first read.
        let job = self.load(job_id).await?;
        if job.status != JobStatus::Processing {
            return Err(DomainError::invalid_transition(job.status.as_str(), "cancel").into());
        }
        warn!(job_id = %job_id, "no live task for processing job; cancelling directly");
        self.inner.finish_cancelled(job).await?;
        Ok(CancelOutcome::Cancelled)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<JobRecord, OrchestratorError> {
        self.load(job_id).await
    }

    pub async fn get_status(&self, job_id: JobId) -> Result<JobStatusView, OrchestratorError> {
        Ok(self.load(job_id).await?.status_view())
    }

    /// Results of a completed job.
    pub async fn get_results(&self, job_id: JobId) -> Result<serde_json::Value, OrchestratorError> {
        let job = self.load(job_id).await?;
        match (job.status, job.results) {
            (JobStatus::Completed, Some(results)) => Ok(results),
            (status, _) => Err(OrchestratorError::ResultsNotReady { status }),
        }
    }

    pub async fn list_jobs(&self, user_id: UserId, limit: usize) -> Result<Vec<JobRecord>, OrchestratorError> {
        Ok(self.inner.jobs.list_by_user(user_id, limit).await?)
    }

    /// Delete a job that is no longer processing.
    pub async fn delete_job(&self, job_id: JobId) -> Result<(), OrchestratorError> {
        let job = self.load(job_id).await?;
        if job.status == JobStatus::Processing {
            return Err(DomainError::invalid_transition(job.status.as_str(), "delete").into());
        }
        let _claim = self.claim(job_id, "delete")?;
        let mut job = self.load(job_id).await?;
        if job.status == JobStatus::Processing {
            return Err(DomainError::invalid_transition(job.status.as_str(), "delete").into());
        }
        if job.needs_refund() && !self.inner.settle_refund(&mut job).await? {
            return Err(OrchestratorError::RefundOutstanding(job_id));
        }
        if !self.inner.jobs.delete(job_id).await? {
            return Err(OrchestratorError::JobNotFound(job_id));
        }
        info!(job_id = %job_id, "job deleted");
        Ok(())
    }

    pub async fn get_credits_summary(&self, user_id: UserId) -> Result<CreditsSummary, OrchestratorError> {
        Ok(self.inner.ledger.summary(user_id).await?)
    }

    /// Delete records past their expiry horizon. Jobs with a live task or an
    /// operation in flight are left alone; orphaned `processing` jobs are cancelled and refunded first.
    pub async fn sweep_expired(&self) -> Result<usize, OrchestratorError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let expired = inner.jobs.list_expired(now, MAINTENANCE_BATCH).await?;

        let mut deleted = 0;
        for job_id in expired.into_iter().map(|job| job.job_id) {
            let Some(_claim) = inner.supervisor.try_claim(job_id) else {
                continue;
            };
            let Some(mut job) = inner.jobs.get(job_id).await? else {
                continue;
            };
            if !job.is_expired(now) {
                continue;
            }
            if job.status == JobStatus::Processing {
                inner.finish_cancelled(job.clone()).await?;
                job = self.load(job_id).await?;
            }
            if job.needs_refund() && !inner.settle_refund(&mut job).await? {
                continue;
            }
            if inner.jobs.delete(job_id).await? {
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!(deleted, "expired jobs swept");
        }
        Ok(deleted)
    }

    /// Retry refunds that failed earlier. Returns how many jobs were settled.
    pub async fn reconcile_refunds(&self) -> Result<usize, OrchestratorError> {
        let inner = &self.inner;
        let pending = inner.jobs.list_unrefunded(MAINTENANCE_BATCH).await?;

        let mut settled = 0;
        for job_id in pending.into_iter().map(|job| job.job_id) {
            let Some(_claim) = inner.supervisor.try_claim(job_id) else {
                continue;
            };
            let Some(mut job) = inner.jobs.get(job_id).await? else {
                continue;
            };
            if !job.needs_refund() {
                continue;
            }
            if inner.settle_refund(&mut job).await? {
                settled += 1;
            }
        }

        if settled > 0 {
            info!(settled, "outstanding refunds reconciled");
        }
        Ok(settled)
    }

    /// Wait for the job's current background task, if any, to finish.
    pub async fn wait_for(&self, job_id: JobId) {
        if let Some(task) = self.inner.supervisor.take_task(job_id) {
            if let Err(err) = task.await {
                error!(job_id = %job_id, error = %err, "pipeline task panicked");
            }
        }
    }

    /// Flag every running job for cancellation (graceful shutdown).
    pub fn cancel_all(&self) -> usize {
        self.inner.supervisor.cancel_all()
    }
}
