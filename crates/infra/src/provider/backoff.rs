//! Poll schedule: how many times to ask, and how long to wait in between.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    /// Doubles after every poll.
    #[default]
    Exponential,
    /// Grows by `initial` after every poll.
    Linear,
}

/// Poll ceiling plus the delay schedule.
///
/// The default polls up to 60 times, starting at one second and never
/// waiting more than ten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub max_attempts: u32,
    pub initial: Duration,
    pub ceiling: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(60, Duration::from_secs(1), Duration::from_secs(10))
    }
}

impl Backoff {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial: delay,
            ceiling: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, initial: Duration, ceiling: Duration) -> Self {
        Self {
            max_attempts,
            initial,
            ceiling,
            strategy: BackoffStrategy::Exponential,
        }
    }

    pub fn linear(max_attempts: u32, initial: Duration, ceiling: Duration) -> Self {
        Self {
            max_attempts,
            initial,
            ceiling,
            strategy: BackoffStrategy::Linear,
        }
    }

    /// Wait after poll number `attempt` (1-based); zero before the first.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(step) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.initial,
            BackoffStrategy::Exponential => self.initial.saturating_mul(1u32 << step.min(31)),
            BackoffStrategy::Linear => self.initial.saturating_mul(attempt),
        };
        delay.min(self.ceiling.max(self.initial))
    }

    /// Whether another poll may follow `attempt` polls.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
