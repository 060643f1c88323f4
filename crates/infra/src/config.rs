//! Runtime configuration for the ledger and the orchestrator.
//!
//! Values come from code (builder methods) or from `PIXFORGE_*` environment
//! variables; unparsable values fall back to the default with a warning.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Optimistic update attempts before surfacing `PersistenceConflict`.
    pub max_conflict_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_conflict_retries: env_or("PIXFORGE_LEDGER_CONFLICT_RETRIES", defaults.max_conflict_retries)
                .max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Pipelines allowed to run concurrently; further jobs wait for a permit.
    pub max_concurrent_jobs: usize,
    /// `maxRetries` stamped on new job records.
    pub max_retries: u32,
    /// How long a job record lives before the sweeper may delete it.
    pub job_retention: chrono::Duration,
    pub sweep_interval: Duration,
    /// In-place refund attempts before leaving the job for reconciliation.
    pub refund_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 8,
            max_retries: 3,
            job_retention: chrono::Duration::hours(168),
            sweep_interval: Duration::from_secs(300),
            refund_attempts: 3,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_or("PIXFORGE_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs).max(1),
            max_retries: env_or("PIXFORGE_MAX_RETRIES", defaults.max_retries),
            job_retention: chrono::Duration::hours(env_or("PIXFORGE_JOB_RETENTION_HOURS", 168i64)),
            sweep_interval: Duration::from_secs(env_or("PIXFORGE_SWEEP_INTERVAL_SECS", 300u64)),
            refund_attempts: env_or("PIXFORGE_REFUND_ATTEMPTS", defaults.refund_attempts).max(1),
        }
    }

    pub fn with_max_concurrent_jobs(mut self, n: usize) -> Self {
        self.max_concurrent_jobs = n.max(1);
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_job_retention(mut self, retention: chrono::Duration) -> Self {
        self.job_retention = retention;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_refund_attempts(mut self, n: u32) -> Self {
        self.refund_attempts = n.max(1);
        self
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparsable configuration value");
            default
        }),
        Err(_) => default,
    }
}
