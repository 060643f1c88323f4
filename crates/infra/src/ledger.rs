//! Credit ledger service: the account rules applied against a store.
//!
//! Every mutation is a read-modify-write guarded by the account version and
//! retried on conflict, so concurrent deductions and refunds for one user never
//! lose an update. Eligibility checks and deductions are separate calls; a
//! request that loses the race finds nothing left at deduct time and its unit
//! is recorded as exhausted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use pixforge_core::{Clock, DomainError, UserId};
use pixforge_credits::{Action, CreditAccount, CreditsSummary, Deduction, Tier, TierTable};

use crate::account_store::{AccountStore, AccountStoreError};
use crate::config::LedgerConfig;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("no credit account for user {0}")]
    AccountNotFound(UserId),
    /// Optimistic update kept losing; transient.
    #[error("persistence conflict: gave up after {attempts} attempts")]
    PersistenceConflict { attempts: u32 },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("account store error: {0}")]
    Store(AccountStoreError),
}

impl From<AccountStoreError> for LedgerError {
    fn from(err: AccountStoreError) -> Self {
        match err {
            AccountStoreError::NotFound(user_id) => LedgerError::AccountNotFound(user_id),
            other => LedgerError::Store(other),
        }
    }
}

/// Events produced by the billing provider integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingEvent {
    PaymentSucceeded { user_id: UserId, tier: Tier },
    PaymentFailed { user_id: UserId },
    SubscriptionEnded { user_id: UserId },
}

impl BillingEvent {
    pub fn user_id(&self) -> UserId {
        match self {
            BillingEvent::PaymentSucceeded { user_id, .. }
            | BillingEvent::PaymentFailed { user_id }
            | BillingEvent::SubscriptionEnded { user_id } => *user_id,
        }
    }
}

/// Outcome of one attempt of a mutation closure.
struct Mutation<T> {
    value: T,
    changed: bool,
}

impl<T> Mutation<T> {
    fn changed(value: T) -> Self {
        Self { value, changed: true }
    }

    fn when(changed: bool, value: T) -> Self {
        Self { value, changed }
    }
}

pub struct CreditLedger {
    store: Arc<dyn AccountStore>,
    table: Arc<TierTable>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl std::fmt::Debug for CreditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditLedger")
            .field("table", &self.table)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CreditLedger {
    pub fn new(
        store: Arc<dyn AccountStore>,
        table: TierTable,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            table: Arc::new(table),
            clock,
            config,
        }
    }

    pub fn table(&self) -> &TierTable {
        &self.table
    }

    /// Load, mutate, and conditionally write back, retrying on version conflicts.
    async fn update<T>(
        &self,
        user_id: UserId,
        op: &str,
        mut mutate: impl FnMut(&mut CreditAccount, &TierTable) -> Result<Mutation<T>, LedgerError> + Send,
    ) -> Result<T, LedgerError>
    where
        T: Send,
    {
        let attempts = self.config.max_conflict_retries.max(1);
        for attempt in 1..=attempts {
            let stored = self
                .store
                .load(user_id)
                .await?
                .ok_or(LedgerError::AccountNotFound(user_id))?;
            let expected = stored.expected();
            let mut account = stored.value;

            let outcome = mutate(&mut account, &self.table)?;
            if !outcome.changed {
                return Ok(outcome.value);
            }

            match self.store.save(&account, expected).await {
                Ok(_) => return Ok(outcome.value),
                Err(AccountStoreError::Concurrency(reason)) => {
                    debug!(user_id = %user_id, op, attempt, %reason, "account write conflicted; retrying");
                }
                Err(other) => return Err(other.into()),
            }
        }
        warn!(user_id = %user_id, op, attempts, "account update abandoned after repeated conflicts");
        Err(LedgerError::PersistenceConflict { attempts })
    }

    /// Create a Free/Active account; an existing account is returned unchanged.
    pub async fn open_account(&self, user_id: UserId) -> Result<CreditAccount, LedgerError> {
        let account = CreditAccount::open(user_id, self.clock.now());
        match self.store.insert(account).await {
            Ok(stored) => {
                info!(user_id = %user_id, "credit account opened");
                Ok(stored.value)
            }
            Err(AccountStoreError::AlreadyExists(_)) | Err(AccountStoreError::Concurrency(_)) => self
                .store
                .load(user_id)
                .await?
                .map(|v| v.value)
                .ok_or(LedgerError::AccountNotFound(user_id)),
            Err(other) => Err(other.into()),
        }
    }

    /// Eligibility for one unit of `action`. May persist a due lazy reset.
    pub async fn can_perform(&self, user_id: UserId, action: Action) -> Result<bool, LedgerError> {
        self.can_afford(user_id, action, 1).await
    }

    /// Eligibility for `units` of `action`. May persist a due lazy reset.
    pub async fn can_afford(&self, user_id: UserId, action: Action, units: u32) -> Result<bool, LedgerError> {
        let now = self.clock.now();
        self.update(user_id, "can_perform", |account, table| {
            let reset = account.lazy_reset(table, now);
            if reset {
                debug!(user_id = %user_id, "lazy monthly reset applied");
            }
            Ok(Mutation::when(reset, account.available(table, action) >= units))
        })
        .await
    }

    /// Take `units` of `action` without re-checking eligibility.
    ///
    /// A unit with nothing left to take is recorded as exhausted in the receipt
    /// and moves no counter.
    pub async fn deduct(&self, user_id: UserId, action: Action, units: u32) -> Result<Deduction, LedgerError> {
        let now = self.clock.now();
        self.update(user_id, "deduct", |account, table| {
            account.lazy_reset(table, now);
            let receipt = account.deduct(table, action, units);
            Ok(Mutation::changed(receipt))
        })
        .await
    }

    /// Undo a deduction using its receipt.
    ///
    /// A receipt stamped with a charge is refunded at most once; repeating it
    /// succeeds without writing.
    pub async fn refund(&self, user_id: UserId, deduction: &Deduction) -> Result<(), LedgerError> {
        if deduction.charged_units() == 0 {
            return Ok(());
        }
        self.update(user_id, "refund", |account, table| {
            let applied = account.refund(table, deduction);
            if !applied {
                debug!(user_id = %user_id, charge = ?deduction.charge, "charge already refunded");
            }
            Ok(Mutation::when(applied, ()))
        })
        .await
    }

    /// Roll the period over now. Returns `false` for Free accounts.
    pub async fn monthly_reset(&self, user_id: UserId) -> Result<bool, LedgerError> {
        let now = self.clock.now();
        self.update(user_id, "monthly_reset", |account, table| {
            let reset = account.monthly_reset(table, now);
            Ok(Mutation::when(reset, reset))
        })
        .await
    }

    /// Remaining entitlement, after any due lazy reset.
    pub async fn summary(&self, user_id: UserId) -> Result<CreditsSummary, LedgerError> {
        let now = self.clock.now();
        self.update(user_id, "summary", |account, table| {
            let reset = account.lazy_reset(table, now);
            Ok(Mutation::when(reset, account.summary(table)))
        })
        .await
    }

    pub async fn account(&self, user_id: UserId) -> Result<CreditAccount, LedgerError> {
        self.store
            .load(user_id)
            .await?
            .map(|v| v.value)
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    /// Apply a tier/status change from the billing provider.
    pub async fn apply_billing_event(&self, event: BillingEvent) -> Result<(), LedgerError> {
        let now = self.clock.now();
        let user_id = event.user_id();
        self.update(user_id, "billing_event", |account, table| {
            match &event {
                BillingEvent::PaymentSucceeded { tier, .. } => account.apply_payment(table, *tier, now),
                BillingEvent::PaymentFailed { .. } => account.mark_past_due(),
                BillingEvent::SubscriptionEnded { .. } => account.end_subscription(),
            }
            Ok(Mutation::changed(()))
        })
        .await?;

        info!(user_id = %user_id, event = ?event, "billing event applied");
        Ok(())
    }
}
