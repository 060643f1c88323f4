//! Job record persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pixforge_core::{JobId, UserId};
use pixforge_jobs::JobRecord;

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use in_memory::InMemoryJobStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresJobStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job records keyed by job id.
///
/// No version check: a record is only ever written by whoever holds the
/// job's claim in the orchestrator.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &JobRecord) -> Result<(), JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError>;

    /// Overwrite an existing record.
    async fn save(&self, job: &JobRecord) -> Result<(), JobStoreError>;

    /// Returns whether a record was removed.
    async fn delete(&self, job_id: JobId) -> Result<bool, JobStoreError>;

    /// Most recent first.
    async fn list_by_user(&self, user_id: UserId, limit: usize) -> Result<Vec<JobRecord>, JobStoreError>;

    /// Records whose `expires_at` is strictly before `now`.
    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<JobRecord>, JobStoreError>;

    /// Failed or cancelled records whose reservation was never refunded.
    async fn list_unrefunded(&self, limit: usize) -> Result<Vec<JobRecord>, JobStoreError>;
}

#[async_trait::async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn insert(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        (**self).insert(job).await
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).get(job_id).await
    }

    async fn save(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        (**self).save(job).await
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, JobStoreError> {
        (**self).delete(job_id).await
    }

    async fn list_by_user(&self, user_id: UserId, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        (**self).list_by_user(user_id, limit).await
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        (**self).list_expired(now, limit).await
    }

    async fn list_unrefunded(&self, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        (**self).list_unrefunded(limit).await
    }
}
