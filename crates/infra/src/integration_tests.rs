//! End-to-end tests for the metered pipeline.
//!
//! Flow: StartWorkflow → ledger reservation → background run → JobRecord →
//! progress notifications, against in-memory stores.
//!
//! Verifies:
//! - A failed step always pairs the failure with a refund
//! - Cancellation is cooperative and refunds the reservation
//! - Retry, sweep and reconciliation keep the ledger consistent
//! - Concurrent calls on one job are serialized

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use pixforge_core::{Clock, JobId, UserId};
    use pixforge_credits::{Action, CreditAccount, Tier};
    use pixforge_events::{ProgressEvent, ProgressEventKind};
    use pixforge_jobs::{JobRecord, JobStatus, StepKind, StepStatus, WorkflowRegistry, WorkflowType};

    use crate::config::OrchestratorConfig;
    use crate::job_store::JobStore;
    use crate::orchestrator::{CancelOutcome, OrchestratorError};
    use crate::testing::{Harness, ScriptedProvider};

    fn basic(user: UserId) -> CreditAccount {
        CreditAccount::with_tier(user, Tier::Basic, chrono::Utc::now())
    }

    fn step_status(job: &JobRecord, name: &str) -> StepStatus {
        job.step(name).map(|s| s.status).unwrap()
    }

    fn kinds(events: &[ProgressEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match &e.kind {
                ProgressEventKind::Progress { .. } => "progress",
                ProgressEventKind::Complete { .. } => "complete",
                ProgressEventKind::Error { .. } => "error",
                ProgressEventKind::Cancelled => "cancelled",
            })
            .collect()
    }

    #[tokio::test]
    async fn fix_workflow_runs_to_completion() {
        let h = Harness::new(ScriptedProvider::succeeding());
        let user = h.free_user().await;
        let events = h.notifier.subscribe_user(user);

        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Fix, "in.jpg").await.unwrap();
        h.orchestrator.wait_for(job_id).await;

        let job = h.orchestrator.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.credits_reserved, 1);
        assert!(!job.credits_refunded);
        assert!(job.completed_at.is_some());
        for step in ["detect", "plan", "retouch"] {
            assert_eq!(step_status(&job, step), StepStatus::Completed);
        }

        let results = h.orchestrator.get_results(job_id).await.unwrap();
        assert_eq!(results["output"], "in.jpg#retouch");
        assert_eq!(results["workflow"], "fix");

        assert_eq!(h.ledger.account(user).await.unwrap().lifetime_used().fix, 1);
        assert_eq!(h.provider.calls(), vec![StepKind::Detect, StepKind::Plan, StepKind::Retouch]);

        let events = events.drain();
        assert_eq!(
            kinds(&events),
            ["progress", "progress", "progress", "progress", "progress", "progress", "complete"]
        );
        assert!(events.iter().all(|e| e.job_id == job_id));
    }

    #[tokio::test]
    async fn step_failure_fails_the_job_and_refunds() {
        let h = Harness::new(ScriptedProvider::succeeding().failing_on(StepKind::Plan));
        let user = h.free_user().await;
        let events = h.notifier.subscribe_user(user);

        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Fix, "in.jpg").await.unwrap();
        h.orchestrator.wait_for(job_id).await;

        let job = h.orchestrator.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 0);
        assert!(job.credits_refunded);
        assert!(job.error.as_deref().unwrap().contains("plan exploded"));
        assert_eq!(step_status(&job, "detect"), StepStatus::Completed);
        assert_eq!(step_status(&job, "plan"), StepStatus::Failed);
        assert_eq!(step_status(&job, "retouch"), StepStatus::Pending);
        assert!(job.step("plan").unwrap().error.is_some());

        assert_eq!(h.ledger.account(user).await.unwrap().lifetime_used().fix, 0);
        assert_eq!(kinds(&events.drain()).last(), Some(&"error"));
    }

    #[tokio::test]
    async fn retry_reruns_from_the_first_step() {
        let h = Harness::new(ScriptedProvider::succeeding().failing_times(StepKind::Retouch, 1));
        let user = h.user_with(basic).await;

        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Fix, "in.jpg").await.unwrap();
        h.orchestrator.wait_for(job_id).await;
        assert_eq!(h.orchestrator.get_status(job_id).await.unwrap().status, JobStatus::Failed);
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().fix, 0);

        h.orchestrator.retry_workflow(job_id).await.unwrap();
        h.orchestrator.wait_for(job_id).await;

        let job = h.orchestrator.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retry_count, 1);
        assert!(job.error.is_none());
        assert!(!job.credits_refunded);
        assert_eq!(step_status(&job, "retouch"), StepStatus::Completed);
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().fix, 1);
        assert_eq!(h.provider.calls().len(), 6);
    }

    #[tokio::test]
    async fn retry_past_the_ceiling_is_rejected_without_charging() {
        let config = OrchestratorConfig::default().with_max_retries(1);
        let h = Harness::with_config(ScriptedProvider::succeeding().failing_on(StepKind::Detect), config);
        let user = h.user_with(basic).await;

        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Check, "in.jpg").await.unwrap();
        h.orchestrator.wait_for(job_id).await;
        h.orchestrator.retry_workflow(job_id).await.unwrap();
        h.orchestrator.wait_for(job_id).await;

        let err = h.orchestrator.retry_workflow(job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition(_)));

        let job = h.orchestrator.get_job(job_id).await.unwrap();
        assert_eq!(job.retry_count, 1);
        assert!(job.is_terminal());
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().check, 0);
    }

    #[tokio::test]
    async fn retry_of_a_completed_job_is_rejected() {
        let h = Harness::new(ScriptedProvider::succeeding());
        let user = h.free_user().await;
        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Check, "in.jpg").await.unwrap();
        h.orchestrator.wait_for(job_id).await;

        let err = h.orchestrator.retry_workflow(job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition(_)));
    }

    async fn failed_fix_job(h: &Harness, user: UserId) -> JobId {
        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Fix, "in.jpg").await.unwrap();
        h.provider.entered().await;
        h.provider.release();
        h.orchestrator.wait_for(job_id).await;
        assert_eq!(h.orchestrator.get_status(job_id).await.unwrap().status, JobStatus::Failed);
        job_id
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_retries_launch_a_single_run() {
        let h = Harness::new(
            ScriptedProvider::succeeding()
                .failing_on(StepKind::Plan)
                .gated_on(StepKind::Detect),
        );
        let user = h.user_with(|u| basic(u).with_usage(Action::Fix, 5, 0)).await;
        let job_id = failed_fix_job(&h, user).await;

        let retries: Vec<_> = (0..2)
            .map(|_| {
                let orchestrator = h.orchestrator.clone();
                tokio::spawn(async move { orchestrator.retry_workflow(job_id).await })
            })
            .collect();
        let mut outcomes = Vec::new();
        for retry in retries {
            outcomes.push(retry.await.unwrap());
        }

        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(
            outcomes
                .iter()
                .any(|o| matches!(o, Err(OrchestratorError::InvalidStateTransition(_))))
        );

        h.provider.entered().await;
        h.provider.release();
        h.orchestrator.wait_for(job_id).await;

        let job = h.orchestrator.get_job(job_id).await.unwrap();
        assert_eq!(job.retry_count, 1);
        assert!(job.credits_refunded);
        assert_eq!(
            h.provider.calls(),
            vec![StepKind::Detect, StepKind::Plan, StepKind::Detect, StepKind::Plan]
        );
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().fix, 5);
    }

    #[tokio::test]
    async fn retry_in_flight_rejects_a_second_retry_and_honours_cancel() {
        let h = Harness::new(
            ScriptedProvider::succeeding()
                .failing_on(StepKind::Plan)
                .gated_on(StepKind::Detect),
        );
        let user = h.user_with(|u| basic(u).with_usage(Action::Fix, 5, 0)).await;
        let job_id = failed_fix_job(&h, user).await;

        h.orchestrator.retry_workflow(job_id).await.unwrap();
        h.provider.entered().await;
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().fix, 6);

        let err = h.orchestrator.retry_workflow(job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition(_)));
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().fix, 6);
        assert!(matches!(h.orchestrator.delete_job(job_id).await, Err(OrchestratorError::InvalidStateTransition(_))));
        assert_eq!(h.orchestrator.cancel_workflow(job_id).await.unwrap(), CancelOutcome::Requested);

        h.provider.release();
        h.orchestrator.wait_for(job_id).await;

        let job = h.orchestrator.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.retry_count, 1);
        assert!(job.credits_refunded);
        assert_eq!(h.provider.calls(), vec![StepKind::Detect, StepKind::Plan, StepKind::Detect]);
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().fix, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn retry_racing_cancel_ends_terminal_and_refunded() {
        let h = Harness::new(ScriptedProvider::succeeding().failing_on(StepKind::Plan));
        let user = h.user_with(|u| basic(u).with_usage(Action::Fix, 5, 0)).await;
        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Fix, "in.jpg").await.unwrap();
        h.orchestrator.wait_for(job_id).await;

        let retry = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.retry_workflow(job_id).await })
        };
        let cancel = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.cancel_workflow(job_id).await })
        };
        let (retry, cancel) = tokio::join!(retry, cancel);

        assert!(retry.unwrap().is_ok());
        assert!(matches!(
            cancel.unwrap(),
            Ok(CancelOutcome::Requested) | Err(OrchestratorError::InvalidStateTransition(_))
        ));

        h.orchestrator.wait_for(job_id).await;
        let job = h.orchestrator.get_job(job_id).await.unwrap();
        assert!(job.is_terminal());
        assert_eq!(job.retry_count, 1);
        assert!(job.credits_refunded);
        assert_eq!(h.orchestrator.running_jobs(), 0);
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().fix, 5);
    }

    #[tokio::test]
    async fn cancel_takes_effect_at_the_next_step_boundary() {
        let h = Harness::new(ScriptedProvider::succeeding().gated_on(StepKind::Plan));
        let user = h.free_user().await;
        let events = h.notifier.subscribe_user(user);

        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Fix, "in.jpg").await.unwrap();
        h.provider.entered().await;

        let outcome = h.orchestrator.cancel_workflow(job_id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Requested);
        h.provider.release();
        h.orchestrator.wait_for(job_id).await;

        let job = h.orchestrator.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.credits_refunded);
        assert_eq!(step_status(&job, "plan"), StepStatus::Completed);
        assert_eq!(step_status(&job, "retouch"), StepStatus::Pending);
        assert_eq!(h.provider.calls(), vec![StepKind::Detect, StepKind::Plan]);
        assert_eq!(h.ledger.account(user).await.unwrap().lifetime_used().fix, 0);
        assert_eq!(kinds(&events.drain()).last(), Some(&"cancelled"));
    }

    #[tokio::test]
    async fn cancel_during_the_last_step_wins_over_completion() {
        let h = Harness::new(ScriptedProvider::succeeding().gated_on(StepKind::Assess));
        let user = h.free_user().await;

        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Check, "in.jpg").await.unwrap();
        h.provider.entered().await;
        h.orchestrator.cancel_workflow(job_id).await.unwrap();
        h.provider.release();
        h.orchestrator.wait_for(job_id).await;

        let job = h.orchestrator.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.results.is_none());
        let err = h.orchestrator.get_results(job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ResultsNotReady { status: JobStatus::Cancelled }));
    }

    #[tokio::test]
    async fn cancel_of_a_finished_job_is_rejected() {
        let h = Harness::new(ScriptedProvider::succeeding());
        let user = h.free_user().await;
        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Check, "in.jpg").await.unwrap();
        h.orchestrator.wait_for(job_id).await;

        let err = h.orchestrator.cancel_workflow(job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn orphaned_processing_job_is_cancelled_directly() {
        let h = Harness::new(ScriptedProvider::succeeding());
        let user = h.user_with(basic).await;

        let registry = WorkflowRegistry::standard();
        let fix = registry.get(WorkflowType::Fix).unwrap();
        let mut job = JobRecord::start(
            JobId::new(),
            user,
            fix,
            "in.jpg",
            3,
            Duration::hours(1),
            h.clock.now(),
        );
        job.attach_reservation(h.ledger.deduct(user, Action::Fix, 1).await.unwrap());
        h.jobs.insert(&job).await.unwrap();

        let outcome = h.orchestrator.cancel_workflow(job.job_id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        let stored = h.orchestrator.get_job(job.job_id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(stored.credits_refunded);
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().fix, 0);
    }

    #[tokio::test]
    async fn insufficient_credits_creates_no_job() {
        let h = Harness::new(ScriptedProvider::succeeding());
        let user = h
            .user_with(|u| CreditAccount::open(u, chrono::Utc::now()).with_lifetime_used(Action::Fix, 3))
            .await;

        let err = h.orchestrator.start_workflow(user, WorkflowType::Fix, "in.jpg").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InsufficientCredits { action: Action::Fix, required: 1, .. }
        ));
        assert!(h.orchestrator.list_jobs(user, 10).await.unwrap().is_empty());
        assert!(h.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn multi_credit_workflow_needs_the_full_amount() {
        let h = Harness::new(ScriptedProvider::succeeding());
        let user = h
            .user_with(|u| CreditAccount::open(u, chrono::Utc::now()).with_lifetime_used(Action::Fix, 1))
            .await;

        let err = h
            .orchestrator
            .start_workflow(user, WorkflowType::FullRestore, "in.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InsufficientCredits { required: 3, .. }));
        assert_eq!(h.ledger.account(user).await.unwrap().lifetime_used().fix, 1);
    }

    #[tokio::test]
    async fn unknown_workflow_and_empty_input_are_rejected() {
        let h = Harness::new(ScriptedProvider::succeeding());
        let user = h.free_user().await;
        let err = h.orchestrator.start_workflow(user, WorkflowType::Fix, "  ").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        let h = Harness::build(
            ScriptedProvider::succeeding(),
            OrchestratorConfig::default(),
            WorkflowRegistry::empty(),
        );
        let user = h.free_user().await;
        let err = h.orchestrator.start_workflow(user, WorkflowType::Check, "in.jpg").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownWorkflowType(_)));
        assert_eq!(h.ledger.account(user).await.unwrap().lifetime_used().check, 0);
    }

    #[tokio::test]
    async fn results_and_deletion_wait_for_a_terminal_state() {
        let h = Harness::new(ScriptedProvider::succeeding().gated_on(StepKind::Detect));
        let user = h.free_user().await;
        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Check, "in.jpg").await.unwrap();
        h.provider.entered().await;

        let err = h.orchestrator.get_results(job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ResultsNotReady { status: JobStatus::Processing }));
        let err = h.orchestrator.delete_job(job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition(_)));

        let view = h.orchestrator.get_status(job_id).await.unwrap();
        assert_eq!(view.current_step.as_deref(), Some("detect"));

        h.provider.release();
        h.orchestrator.wait_for(job_id).await;
        h.orchestrator.delete_job(job_id).await.unwrap();
        let err = h.orchestrator.get_status(job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::JobNotFound(id) if id == job_id));
    }

    #[tokio::test]
    async fn worker_pool_bounds_concurrent_pipelines() {
        let config = OrchestratorConfig::default().with_max_concurrent_jobs(1);
        let h = Harness::with_config(ScriptedProvider::succeeding().gated_on(StepKind::Detect), config);
        let user = h.user_with(basic).await;

        let first = h.orchestrator.start_workflow(user, WorkflowType::Check, "a.jpg").await.unwrap();
        let second = h.orchestrator.start_workflow(user, WorkflowType::Check, "b.jpg").await.unwrap();
        h.provider.entered().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.provider.calls().len(), 1);
        assert_eq!(h.orchestrator.running_jobs(), 2);

        h.provider.release();
        h.provider.release();
        h.orchestrator.wait_for(first).await;
        h.orchestrator.wait_for(second).await;

        for job_id in [first, second] {
            assert_eq!(h.orchestrator.get_status(job_id).await.unwrap().status, JobStatus::Completed);
        }
        assert_eq!(h.orchestrator.running_jobs(), 0);
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().check, 2);
    }

    #[tokio::test]
    async fn jobs_are_listed_newest_first() {
        let h = Harness::new(ScriptedProvider::succeeding());
        let user = h.free_user().await;
        let older = h.orchestrator.start_workflow(user, WorkflowType::Check, "a.jpg").await.unwrap();
        h.clock.advance(Duration::seconds(5));
        let newer = h.orchestrator.start_workflow(user, WorkflowType::Check, "b.jpg").await.unwrap();
        h.orchestrator.wait_for(older).await;
        h.orchestrator.wait_for(newer).await;

        let ids: Vec<_> = h.orchestrator.list_jobs(user, 10).await.unwrap().iter().map(|j| j.job_id).collect();
        assert_eq!(ids, vec![newer, older]);
        assert_eq!(h.orchestrator.list_jobs(user, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn credits_summary_reflects_reservations() {
        let h = Harness::new(ScriptedProvider::succeeding());
        let user = h.user_with(basic).await;
        let job_id = h
            .orchestrator
            .start_workflow(user, WorkflowType::FullRestore, "in.jpg")
            .await
            .unwrap();
        h.orchestrator.wait_for(job_id).await;

        let summary = h.orchestrator.get_credits_summary(user).await.unwrap();
        assert_eq!(summary.tier, Tier::Basic);
        assert_eq!(summary.monthly_remaining.fix, 17);
        assert_eq!(summary.monthly_remaining.check, 50);
        assert!(summary.lifetime_remaining.is_none());
    }

    #[tokio::test]
    async fn sweep_deletes_expired_records_but_spares_live_runs() {
        let h = Harness::new(ScriptedProvider::succeeding().gated_on(StepKind::Plan));
        let user = h.user_with(basic).await;

        let done = h.orchestrator.start_workflow(user, WorkflowType::Check, "a.jpg").await.unwrap();
        h.orchestrator.wait_for(done).await;
        let live = h.orchestrator.start_workflow(user, WorkflowType::Fix, "b.jpg").await.unwrap();
        h.provider.entered().await;

        h.clock.advance(Duration::hours(169));
        assert_eq!(h.orchestrator.sweep_expired().await.unwrap(), 1);
        assert!(matches!(
            h.orchestrator.get_job(done).await.unwrap_err(),
            OrchestratorError::JobNotFound(_)
        ));
        assert_eq!(h.orchestrator.get_status(live).await.unwrap().status, JobStatus::Processing);

        h.provider.release();
        h.orchestrator.wait_for(live).await;
        assert_eq!(h.orchestrator.sweep_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_refunds_are_reconciled_later() {
        let h = Harness::new(
            ScriptedProvider::succeeding()
                .failing_on(StepKind::Detect)
                .gated_on(StepKind::Detect),
        );
        let user = h.user_with(basic).await;

        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Fix, "in.jpg").await.unwrap();
        h.provider.entered().await;
        h.accounts.set_failing(true);
        h.provider.release();
        h.orchestrator.wait_for(job_id).await;

        let job = h.orchestrator.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.needs_refund());
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().fix, 1);

        let err = h.orchestrator.retry_workflow(job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::RefundOutstanding(_)));

        h.accounts.set_failing(false);
        assert_eq!(h.orchestrator.reconcile_refunds().await.unwrap(), 1);
        assert!(h.orchestrator.get_job(job_id).await.unwrap().credits_refunded);
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().fix, 0);
        assert_eq!(h.orchestrator.reconcile_refunds().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refund_whose_job_save_failed_is_not_repeated_by_reconcile() {
        let h = Harness::new(ScriptedProvider::succeeding().failing_on(StepKind::Plan));
        let user = h.user_with(|u| basic(u).with_usage(Action::Fix, 5, 0)).await;
        h.jobs.fail_refunded_saves(true);

        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Fix, "in.jpg").await.unwrap();
        h.orchestrator.wait_for(job_id).await;

        let job = h.orchestrator.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.needs_refund());
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().fix, 5);

        h.jobs.fail_refunded_saves(false);
        assert_eq!(h.orchestrator.reconcile_refunds().await.unwrap(), 1);
        assert!(h.orchestrator.get_job(job_id).await.unwrap().credits_refunded);
        assert_eq!(h.ledger.account(user).await.unwrap().monthly_used().fix, 5);
        assert_eq!(h.orchestrator.reconcile_refunds().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweeper_task_runs_maintenance_until_shut_down() {
        let h = Harness::new(ScriptedProvider::succeeding());
        let user = h.free_user().await;
        let job_id = h.orchestrator.start_workflow(user, WorkflowType::Check, "in.jpg").await.unwrap();
        h.orchestrator.wait_for(job_id).await;
        h.clock.advance(Duration::hours(169));

        let handle = h.orchestrator.spawn_sweeper_every(std::time::Duration::from_millis(5));
        for _ in 0..200 {
            if handle.stats().jobs_deleted == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let stats = handle.stats();
        handle.shutdown().await;

        assert_eq!(stats.jobs_deleted, 1);
        assert!(stats.passes >= 1);
        assert_eq!(stats.errors, 0);
    }
}
