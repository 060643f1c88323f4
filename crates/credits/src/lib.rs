//! Credit accounting rules: tiers, quotas, rollover and refunds.
//!
//! Everything here is pure. Persistence and concurrency control live in
//! `pixforge-infra`.

pub mod account;
pub mod tier;

pub use account::{ChargeRef, CreditAccount, CreditsSummary, Deduction, DeductionBranch};
pub use tier::{Action, ActionCounts, PaidLimits, SubscriptionStatus, Tier, TierTable};
