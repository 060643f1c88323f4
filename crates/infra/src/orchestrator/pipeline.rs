//! The background task that drives one job's steps.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use pixforge_core::JobId;
use pixforge_events::{EventBus, ProgressEvent, ProgressEventKind};
use pixforge_jobs::{JobRecord, JobStatus, OutputRef, StepContext, StepStatus};

use super::supervisor::CancelFlag;
use super::{Inner, OrchestratorError};

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}

impl Inner {
    /// Entry point of the spawned task.
    pub(super) async fn drive(self: Arc<Self>, job_id: JobId, run_id: u64, cancel: CancelFlag) {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(job_id = %job_id, "worker pool closed; pipeline not started");
                self.supervisor.finish(job_id, run_id);
                return;
            }
        };

        if let Err(err) = self.run_steps(job_id, &cancel).await {
            error!(job_id = %job_id, error = %err, "pipeline aborted");
            self.abort(job_id, err.to_string()).await;
        }

        drop(permit);
        self.supervisor.finish(job_id, run_id);
    }

    async fn run_steps(&self, job_id: JobId, cancel: &CancelFlag) -> Result<(), OrchestratorError> {
        let Some(mut job) = self.jobs.get(job_id).await? else {
            debug!(job_id = %job_id, "job vanished before its pipeline started");
            return Ok(());
        };
        if job.status != JobStatus::Processing {
            debug!(job_id = %job_id, status = %job.status, "job no longer processing; nothing to run");
            return Ok(());
        }

        let workflow = self
            .registry
            .get(job.workflow_type)
            .ok_or_else(|| OrchestratorError::UnknownWorkflowType(job.workflow_type.to_string()))?;
        let total = workflow.steps.len();
        let mut outputs: Vec<(String, OutputRef)> = Vec::with_capacity(total);

        info!(
            job_id = %job_id,
            user_id = %job.user_id,
            workflow = %job.workflow_type,
            attempt = job.retry_count,
            "pipeline started"
        );

        for (idx, step) in workflow.steps.iter().enumerate() {
            if cancel.is_set() {
                return self.finish_cancelled(job).await;
            }

            let request = step.request(&StepContext {
                input_ref: &job.input_ref,
                prior: &outputs,
            })?;

            let started = percent(idx, total);
            job.update_progress(step.name, started, StepStatus::Processing, None, self.clock.now())?;
            self.jobs.save(&job).await?;
            self.publish_step(&job, step.name, StepStatus::Processing);
            debug!(job_id = %job_id, step = step.name, "step started");

            match self.provider.invoke(&request).await {
                Ok(output) => {
                    debug!(job_id = %job_id, step = step.name, output = %output, "step finished");
                    outputs.push((step.name.to_string(), output));
                    let done = percent(idx + 1, total);
                    job.update_progress(step.name, done, StepStatus::Completed, None, self.clock.now())?;
                    self.jobs.save(&job).await?;
                    self.publish_step(&job, step.name, StepStatus::Completed);
                }
                Err(err) => {
                    warn!(job_id = %job_id, step = step.name, error = %err, "step failed");
                    job.update_progress(
                        step.name,
                        started,
                        StepStatus::Failed,
                        Some(err.to_string()),
                        self.clock.now(),
                    )?;
                    let reason = OrchestratorError::ProviderFailure(err).to_string();
                    return self.fail_and_refund(job, reason).await;
                }
            }
        }

        // A cancel observed after the last step still wins over completion.
        if cancel.is_set() {
            return self.finish_cancelled(job).await;
        }

        let results = workflow.results(&outputs);
        job.complete(results.clone(), self.clock.now())?;
        self.jobs.save(&job).await?;
        self.publish(&job, ProgressEventKind::Complete { results });
        info!(job_id = %job_id, "pipeline completed");
        Ok(())
    }

    /// Last-resort cleanup after an unexpected error: make sure the job does
    /// not stay `processing` and its credits go back.
    async fn abort(&self, job_id: JobId, reason: String) {
        match self.jobs.get(job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Processing => {
                if let Err(err) = self.fail_and_refund(job, reason).await {
                    error!(job_id = %job_id, error = %err, "could not mark aborted job as failed");
                }
            }
            Ok(_) => {}
            Err(err) => error!(job_id = %job_id, error = %err, "could not reload aborted job"),
        }
    }

    /// Terminal failure paired with the refund of the job's reservation.
    pub(super) async fn fail_and_refund(
        &self,
        mut job: JobRecord,
        reason: String,
    ) -> Result<(), OrchestratorError> {
        job.fail(reason.clone(), self.clock.now())?;
        self.jobs.save(&job).await?;
        self.settle_refund(&mut job).await?;
        self.publish(&job, ProgressEventKind::Error { message: reason });
        Ok(())
    }

    pub(super) async fn finish_cancelled(&self, mut job: JobRecord) -> Result<(), OrchestratorError> {
        job.cancel(self.clock.now())?;
        self.jobs.save(&job).await?;
        self.settle_refund(&mut job).await?;
        self.publish(&job, ProgressEventKind::Cancelled);
        info!(job_id = %job.job_id, "job cancelled");
        Ok(())
    }

    /// Give back the job's reservation and persist the refunded flag.
    ///
    /// Returns whether the job is now settled. A refund the ledger keeps
    /// rejecting is left for [`reconcile_refunds`](super::PipelineOrchestrator::reconcile_refunds).
    pub(super) async fn settle_refund(&self, job: &mut JobRecord) -> Result<bool, OrchestratorError> {
        let Some(reservation) = job.reservation.clone() else {
            return Ok(true);
        };
        if job.credits_refunded {
            return Ok(true);
        }

        let attempts = self.config.refund_attempts.max(1);
        for attempt in 1..=attempts {
            match self.ledger.refund(job.user_id, &reservation).await {
                Ok(()) => {
                    job.mark_refunded();
                    self.jobs.save(job).await?;
                    debug!(job_id = %job.job_id, credits = job.credits_reserved, "reservation refunded");
                    return Ok(true);
                }
                Err(err) => {
                    warn!(job_id = %job.job_id, attempt, error = %err, "refund attempt failed");
                }
            }
        }

        error!(
            job_id = %job.job_id,
            user_id = %job.user_id,
            credits = job.credits_reserved,
            "refund failed; left for reconciliation"
        );
        Ok(false)
    }

    fn publish_step(&self, job: &JobRecord, step: &str, step_status: StepStatus) {
        self.publish(
            job,
            ProgressEventKind::Progress {
                step: step.to_string(),
                step_status,
                progress: job.progress,
            },
        );
    }

    pub(super) fn publish(&self, job: &JobRecord, kind: ProgressEventKind) {
        let event = ProgressEvent::new(job.user_id, job.job_id, kind, self.clock.now());
        if let Err(err) = self.notifier.publish(event) {
            warn!(job_id = %job.job_id, error = ?err, "progress notification dropped");
        }
    }
}
