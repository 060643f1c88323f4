use core::fmt;
use core::str::FromStr;

use pixforge_core::DomainError;
use serde::{Deserialize, Serialize};

/// Subscription level determining the quota shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Free,
    Basic,
    Pro,
}

impl Tier {
    pub fn is_paid(self) -> bool {
        !matches!(self, Tier::Free)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "Free",
            Tier::Basic => "Basic",
            Tier::Pro => "Pro",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "basic" => Ok(Tier::Basic),
            "pro" => Ok(Tier::Pro),
            other => Err(DomainError::validation(format!("unknown tier: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    PastDue,
}

/// A metered unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Check,
    Fix,
}

impl Action {
    pub const ALL: [Action; 2] = [Action::Check, Action::Fix];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Check => "check",
            Action::Fix => "fix",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One counter per [`Action`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub check: u32,
    pub fix: u32,
}

impl ActionCounts {
    pub const fn new(check: u32, fix: u32) -> Self {
        Self { check, fix }
    }

    pub fn get(&self, action: Action) -> u32 {
        match action {
            Action::Check => self.check,
            Action::Fix => self.fix,
        }
    }

    pub fn get_mut(&mut self, action: Action) -> &mut u32 {
        match action {
            Action::Check => &mut self.check,
            Action::Fix => &mut self.fix,
        }
    }

    pub fn set(&mut self, action: Action, value: u32) {
        *self.get_mut(action) = value;
    }
}

/// Monthly allowance and rollover ceiling of a paid tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidLimits {
    pub monthly_allowance: ActionCounts,
    pub rollover_cap: ActionCounts,
}

/// Static per-tier limits.
///
/// Built once and handed to the ledger; tests construct alternate tables freely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierTable {
    pub free_lifetime_cap: ActionCounts,
    pub basic: PaidLimits,
    pub pro: PaidLimits,
    /// Days after `last_reset_date` at which a paid account is lazily reset.
    pub reset_period_days: i64,
}

impl TierTable {
    /// Limits for a paid tier; `None` for Free.
    pub fn paid(&self, tier: Tier) -> Option<&PaidLimits> {
        match tier {
            Tier::Free => None,
            Tier::Basic => Some(&self.basic),
            Tier::Pro => Some(&self.pro),
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.reset_period_days <= 0 {
            return Err(DomainError::validation("reset_period_days must be positive"));
        }
        Ok(())
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            free_lifetime_cap: ActionCounts::new(5, 3),
            basic: PaidLimits {
                monthly_allowance: ActionCounts::new(50, 20),
                rollover_cap: ActionCounts::new(50, 20),
            },
            pro: PaidLimits {
                monthly_allowance: ActionCounts::new(250, 100),
                rollover_cap: ActionCounts::new(250, 100),
            },
            reset_period_days: 30,
        }
    }
}
