//! Test doubles shared by the orchestrator tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, Semaphore};

use pixforge_core::{ExpectedVersion, JobId, ManualClock, UserId, Versioned};
use pixforge_credits::{CreditAccount, TierTable};
use pixforge_events::ProgressNotifier;
use pixforge_jobs::{JobRecord, OutputRef, StepKind, StepRequest, WorkflowRegistry};

use crate::account_store::{AccountStore, AccountStoreError, InMemoryAccountStore};
use crate::config::{LedgerConfig, OrchestratorConfig};
use crate::job_store::{InMemoryJobStore, JobStore, JobStoreError};
use crate::ledger::CreditLedger;
use crate::orchestrator::{OrchestratorParts, PipelineOrchestrator};
use crate::provider::{ProcessingProvider, ProviderError};

/// Provider that echoes `{input}#{kind}`, optionally failing on one step kind
/// and optionally parking on one step kind until [`release`](Self::release).
pub(crate) struct ScriptedProvider {
    fail_on: Option<StepKind>,
    failures_left: AtomicU32,
    gate_on: Option<StepKind>,
    gate: Semaphore,
    entered: Notify,
    calls: Mutex<Vec<StepKind>>,
}

impl ScriptedProvider {
    pub(crate) fn succeeding() -> Self {
        Self {
            fail_on: None,
            failures_left: AtomicU32::new(0),
            gate_on: None,
            gate: Semaphore::new(0),
            entered: Notify::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing_on(self, kind: StepKind) -> Self {
        self.failing_times(kind, u32::MAX)
    }

    /// Fail the first `times` calls of `kind`, then succeed.
    pub(crate) fn failing_times(mut self, kind: StepKind, times: u32) -> Self {
        self.fail_on = Some(kind);
        self.failures_left = AtomicU32::new(times);
        self
    }

    pub(crate) fn gated_on(mut self, kind: StepKind) -> Self {
        self.gate_on = Some(kind);
        self
    }

    /// Resolves once the gated step has been entered.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let one parked call through.
    pub(crate) fn release(&self) {
        self.gate.add_permits(1);
    }

    pub(crate) fn calls(&self) -> Vec<StepKind> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ProcessingProvider for ScriptedProvider {
    async fn invoke(&self, request: &StepRequest) -> Result<OutputRef, ProviderError> {
        self.calls.lock().unwrap().push(request.kind);

        if self.gate_on == Some(request.kind) {
            self.entered.notify_one();
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| ProviderError::Transport("gate closed".into()))?;
            permit.forget();
        }

        let fail = self.fail_on == Some(request.kind)
            && self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if fail {
            return Err(ProviderError::Failed(format!("{} exploded", request.kind.as_str())));
        }
        Ok(OutputRef::new(format!("{}#{}", request.input_ref, request.kind.as_str())))
    }
}

/// Account store whose writes can be switched to fail.
#[derive(Default)]
pub(crate) struct FlakyAccountStore {
    inner: InMemoryAccountStore,
    failing: AtomicBool,
}

impl FlakyAccountStore {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl AccountStore for FlakyAccountStore {
    async fn load(&self, user_id: UserId) -> Result<Option<Versioned<CreditAccount>>, AccountStoreError> {
        self.inner.load(user_id).await
    }

    async fn insert(&self, account: CreditAccount) -> Result<Versioned<CreditAccount>, AccountStoreError> {
        self.inner.insert(account).await
    }

    async fn save(&self, account: &CreditAccount, expected: ExpectedVersion) -> Result<u64, AccountStoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AccountStoreError::Storage("disk on fire".into()));
        }
        self.inner.save(account, expected).await
    }
}

/// Job store that can be told to reject saves of refunded records, leaving the
/// ledger refunded while the stored job still looks unrefunded.
#[derive(Default)]
pub(crate) struct FlakyJobStore {
    inner: InMemoryJobStore,
    fail_refunded_saves: AtomicBool,
}

impl FlakyJobStore {
    pub(crate) fn fail_refunded_saves(&self, failing: bool) {
        self.fail_refunded_saves.store(failing, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl JobStore for FlakyJobStore {
    async fn insert(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        self.inner.insert(job).await
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        self.inner.get(job_id).await
    }

    async fn save(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        if job.credits_refunded && self.fail_refunded_saves.load(Ordering::SeqCst) {
            return Err(JobStoreError::Storage("connection reset".into()));
        }
        self.inner.save(job).await
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, JobStoreError> {
        self.inner.delete(job_id).await
    }

    async fn list_by_user(&self, user_id: UserId, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        self.inner.list_by_user(user_id, limit).await
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        self.inner.list_expired(now, limit).await
    }

    async fn list_unrefunded(&self, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        self.inner.list_unrefunded(limit).await
    }
}

pub(crate) struct Harness {
    pub orchestrator: PipelineOrchestrator,
    pub ledger: Arc<CreditLedger>,
    pub jobs: Arc<FlakyJobStore>,
    pub accounts: Arc<FlakyAccountStore>,
    pub provider: Arc<ScriptedProvider>,
    pub notifier: Arc<ProgressNotifier>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub(crate) fn new(provider: ScriptedProvider) -> Self {
        Self::with_config(provider, OrchestratorConfig::default())
    }

    pub(crate) fn with_config(provider: ScriptedProvider, config: OrchestratorConfig) -> Self {
        Self::build(provider, config, WorkflowRegistry::standard())
    }

    pub(crate) fn build(provider: ScriptedProvider, config: OrchestratorConfig, registry: WorkflowRegistry) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let accounts = Arc::new(FlakyAccountStore::default());
        let jobs = Arc::new(FlakyJobStore::default());
        let provider = Arc::new(provider);
        let notifier = Arc::new(ProgressNotifier::new());
        let ledger = Arc::new(CreditLedger::new(
            accounts.clone(),
            TierTable::default(),
            clock.clone(),
            LedgerConfig::default(),
        ));

        let orchestrator = PipelineOrchestrator::new(
            OrchestratorParts {
                ledger: ledger.clone(),
                jobs: jobs.clone(),
                provider: provider.clone(),
                notifier: notifier.clone(),
                registry,
                clock: clock.clone(),
            },
            config,
        );

        Self {
            orchestrator,
            ledger,
            jobs,
            accounts,
            provider,
            notifier,
            clock,
        }
    }

    /// A fresh user holding an account built by `account`.
    pub(crate) async fn user_with(&self, account: impl FnOnce(UserId) -> CreditAccount) -> UserId {
        let user = UserId::new();
        self.accounts.insert(account(user)).await.unwrap();
        user
    }

    pub(crate) async fn free_user(&self) -> UserId {
        let user = UserId::new();
        self.ledger.open_account(user).await.unwrap();
        user
    }
}
