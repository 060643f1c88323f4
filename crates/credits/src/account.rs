use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use pixforge_core::{DomainError, DomainResult, JobId, UserId};

use crate::tier::{Action, ActionCounts, SubscriptionStatus, Tier, TierTable};

/// Which counter a single deducted unit touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionBranch {
    /// Free tier: `lifetime_used` was incremented.
    Lifetime,
    /// Paid tier: `monthly_used` was incremented.
    Monthly,
    /// Paid tier: `rollover` was decremented.
    Rollover,
    /// Nothing was left to take; the unit was a no-op.
    Exhausted,
}

/// How many refunded charges an account remembers.
const REFUNDED_CHARGES_KEPT: usize = 256;

/// The reservation a deduction was made for: one per job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChargeRef {
    pub job_id: JobId,
    pub attempt: u32,
}

impl ChargeRef {
    pub fn new(job_id: JobId, attempt: u32) -> Self {
        Self { job_id, attempt }
    }
}

/// Receipt of a deduction. Refunding replays it in reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    pub action: Action,
    pub branches: Vec<DeductionBranch>,
    /// Set once the receipt is attached to a job; refunds of a tagged
    /// receipt are applied at most once per account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge: Option<ChargeRef>,
}

impl Deduction {
    pub fn for_charge(mut self, charge: ChargeRef) -> Self {
        self.charge = Some(charge);
        self
    }

    pub fn units(&self) -> u32 {
        self.branches.len() as u32
    }

    /// Units that actually moved a counter.
    pub fn charged_units(&self) -> u32 {
        self.branches
            .iter()
            .filter(|b| **b != DeductionBranch::Exhausted)
            .count() as u32
    }
}

/// Read-only view of an account's remaining entitlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsSummary {
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub monthly_remaining: ActionCounts,
    pub rollover: ActionCounts,
    /// Only present for Free accounts.
    pub lifetime_remaining: Option<ActionCounts>,
    pub last_reset_date: DateTime<Utc>,
}

/// Per-user quota state.
///
/// Counters are only moved by [`deduct`](Self::deduct), [`refund`](Self::refund),
/// [`monthly_reset`](Self::monthly_reset) and the billing transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccount {
    user_id: UserId,
    tier: Tier,
    status: SubscriptionStatus,
    last_reset_date: DateTime<Utc>,
    monthly_used: ActionCounts,
    rollover: ActionCounts,
    lifetime_used: ActionCounts,
    /// Most recent refunded charges, oldest first.
    #[serde(default)]
    refunded: VecDeque<ChargeRef>,
}

impl CreditAccount {
    /// A fresh Free/Active account.
    pub fn open(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self::with_tier(user_id, Tier::Free, now)
    }

    pub fn with_tier(user_id: UserId, tier: Tier, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            tier,
            status: SubscriptionStatus::Active,
            last_reset_date: now,
            monthly_used: ActionCounts::default(),
            rollover: ActionCounts::default(),
            lifetime_used: ActionCounts::default(),
            refunded: VecDeque::new(),
        }
    }

    /// Seed paid-tier counters (imports, fixtures).
    pub fn with_usage(mut self, action: Action, monthly_used: u32, rollover: u32) -> Self {
        self.monthly_used.set(action, monthly_used);
        self.rollover.set(action, rollover);
        self
    }

    /// Seed the Free-tier lifetime counter (imports, fixtures).
    pub fn with_lifetime_used(mut self, action: Action, used: u32) -> Self {
        self.lifetime_used.set(action, used);
        self
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    pub fn last_reset_date(&self) -> DateTime<Utc> {
        self.last_reset_date
    }

    pub fn monthly_used(&self) -> ActionCounts {
        self.monthly_used
    }

    pub fn rollover(&self) -> ActionCounts {
        self.rollover
    }

    pub fn lifetime_used(&self) -> ActionCounts {
        self.lifetime_used
    }

    /// Whether a lazy reset is due at `now`.
    pub fn reset_due(&self, table: &TierTable, now: DateTime<Utc>) -> bool {
        self.tier.is_paid() && now - self.last_reset_date > Duration::days(table.reset_period_days)
    }

    /// Apply the monthly reset if the period has elapsed. Returns whether it ran.
    ///
    /// Only one period is rolled over no matter how long the account sat idle.
    pub fn lazy_reset(&mut self, table: &TierTable, now: DateTime<Utc>) -> bool {
        if self.reset_due(table, now) {
            self.monthly_reset(table, now)
        } else {
            false
        }
    }

    /// Roll unused allowance into capped rollover and start a new period.
    ///
    /// Free accounts are exempt; returns `false` for them.
    pub fn monthly_reset(&mut self, table: &TierTable, now: DateTime<Utc>) -> bool {
        let Some(limits) = table.paid(self.tier) else {
            return false;
        };
        for action in Action::ALL {
            let allowance = limits.monthly_allowance.get(action);
            let cap = limits.rollover_cap.get(action);
            let unused = allowance.saturating_sub(self.monthly_used.get(action));
            let carried = self.rollover.get(action).saturating_add(unused).min(cap);
            self.rollover.set(action, carried);
            self.monthly_used.set(action, 0);
        }
        self.last_reset_date = now;
        true
    }

    /// Units of `action` currently spendable. Does not reset.
    pub fn available(&self, table: &TierTable, action: Action) -> u32 {
        match table.paid(self.tier) {
            None => table
                .free_lifetime_cap
                .get(action)
                .saturating_sub(self.lifetime_used.get(action)),
            Some(limits) => limits
                .monthly_allowance
                .get(action)
                .saturating_sub(self.monthly_used.get(action))
                .saturating_add(self.rollover.get(action)),
        }
    }

    /// Eligibility for one unit of `action`, after any due lazy reset.
    pub fn can_perform(&mut self, table: &TierTable, action: Action, now: DateTime<Utc>) -> bool {
        self.can_afford(table, action, 1, now)
    }

    /// Eligibility for `units` of `action`, after any due lazy reset.
    pub fn can_afford(
        &mut self,
        table: &TierTable,
        action: Action,
        units: u32,
        now: DateTime<Utc>,
    ) -> bool {
        self.lazy_reset(table, now);
        self.available(table, action) >= units
    }

    /// Take one unit of `action`.
    ///
    /// Does not re-check eligibility. When nothing is left (rollover already 0,
    /// or lifetime cap reached) the unit is recorded as
    /// [`DeductionBranch::Exhausted`] and no counter moves. The Free-tier cap
    /// is enforced here too so that `lifetime_used <= lifetime_cap` always holds.
    pub fn deduct_one(&mut self, table: &TierTable, action: Action) -> DeductionBranch {
        match table.paid(self.tier) {
            None => {
                let used = self.lifetime_used.get_mut(action);
                if *used < table.free_lifetime_cap.get(action) {
                    *used += 1;
                    DeductionBranch::Lifetime
                } else {
                    DeductionBranch::Exhausted
                }
            }
            Some(limits) => {
                let used = self.monthly_used.get_mut(action);
                if *used < limits.monthly_allowance.get(action) {
                    *used += 1;
                    return DeductionBranch::Monthly;
                }
                let rollover = self.rollover.get_mut(action);
                if *rollover > 0 {
                    *rollover -= 1;
                    DeductionBranch::Rollover
                } else {
                    DeductionBranch::Exhausted
                }
            }
        }
    }

    /// Take `units` of `action` and return the receipt.
    pub fn deduct(&mut self, table: &TierTable, action: Action, units: u32) -> Deduction {
        let branches = (0..units).map(|_| self.deduct_one(table, action)).collect();
        Deduction {
            action,
            branches,
            charge: None,
        }
    }

    /// Check-and-take in one step. Fails with `InsufficientCredits` and leaves
    /// the account untouched when fewer than `units` are available.
    pub fn reserve(
        &mut self,
        table: &TierTable,
        action: Action,
        units: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<Deduction> {
        if !self.can_afford(table, action, units, now) {
            return Err(DomainError::insufficient_credits(action.as_str()));
        }
        Ok(self.deduct(table, action, units))
    }

    /// Undo a deduction, most recent unit first.
    ///
    /// Floors at zero and caps rollover, so refunding across a tier change or
    /// a reset never breaks the counter bounds. Returns `false` without
    /// touching any counter when the receipt's charge was already refunded.
    pub fn refund(&mut self, table: &TierTable, deduction: &Deduction) -> bool {
        if let Some(charge) = deduction.charge {
            if self.refunded.contains(&charge) {
                return false;
            }
            if self.refunded.len() >= REFUNDED_CHARGES_KEPT {
                self.refunded.pop_front();
            }
            self.refunded.push_back(charge);
        }

        let action = deduction.action;
        for branch in deduction.branches.iter().rev() {
            match branch {
                DeductionBranch::Lifetime => {
                    let used = self.lifetime_used.get_mut(action);
                    *used = used.saturating_sub(1);
                }
                DeductionBranch::Monthly => {
                    let used = self.monthly_used.get_mut(action);
                    *used = used.saturating_sub(1);
                }
                DeductionBranch::Rollover => {
                    let cap = table
                        .paid(self.tier)
                        .map(|l| l.rollover_cap.get(action))
                        .unwrap_or(0);
                    let rollover = self.rollover.get_mut(action);
                    *rollover = rollover.saturating_add(1).min(cap);
                }
                DeductionBranch::Exhausted => {}
            }
        }
        true
    }

    /// Billing: a payment for `tier` succeeded.
    ///
    /// Closes the running period under the tier being left (a Free account
    /// starts from clean paid counters), then activates `tier` with a fresh
    /// period. Rollover is clamped to the new tier's cap.
    pub fn apply_payment(&mut self, table: &TierTable, tier: Tier, now: DateTime<Utc>) {
        if !self.monthly_reset(table, now) {
            self.monthly_used = ActionCounts::default();
            self.rollover = ActionCounts::default();
        }
        self.tier = tier;
        self.status = SubscriptionStatus::Active;
        self.last_reset_date = now;
        let caps = table
            .paid(tier)
            .map(|l| l.rollover_cap)
            .unwrap_or_default();
        for action in Action::ALL {
            let clamped = self.rollover.get(action).min(caps.get(action));
            self.rollover.set(action, clamped);
        }
    }

    /// Billing: the subscription ended.
    pub fn end_subscription(&mut self) {
        self.tier = Tier::Free;
        self.status = SubscriptionStatus::Cancelled;
    }

    /// Billing: a renewal payment failed.
    pub fn mark_past_due(&mut self) {
        self.status = SubscriptionStatus::PastDue;
    }

    pub fn summary(&self, table: &TierTable) -> CreditsSummary {
        let (monthly_remaining, rollover, lifetime_remaining) = match table.paid(self.tier) {
            None => {
                let mut remaining = ActionCounts::default();
                for action in Action::ALL {
                    remaining.set(action, self.available(table, action));
                }
                (ActionCounts::default(), ActionCounts::default(), Some(remaining))
            }
            Some(limits) => {
                let mut remaining = ActionCounts::default();
                for action in Action::ALL {
                    let left = limits
                        .monthly_allowance
                        .get(action)
                        .saturating_sub(self.monthly_used.get(action));
                    remaining.set(action, left);
                }
                (remaining, self.rollover, None)
            }
        };
        CreditsSummary {
            tier: self.tier,
            status: self.status,
            monthly_remaining,
            rollover,
            lifetime_remaining,
            last_reset_date: self.last_reset_date,
        }
    }
}
