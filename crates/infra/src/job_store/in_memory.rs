use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use pixforge_core::{JobId, UserId};
use pixforge_jobs::JobRecord;

use super::{JobStore, JobStoreError};

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> JobStoreError {
        JobStoreError::Storage("job store lock poisoned".to_string())
    }

    fn select(
        &self,
        limit: usize,
        filter: impl Fn(&JobRecord) -> bool,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        let mut out: Vec<JobRecord> = jobs.values().filter(|j| filter(j)).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.job_id.cmp(&a.job_id)));
        out.truncate(limit);
        Ok(out)
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        if jobs.contains_key(&job.job_id) {
            return Err(JobStoreError::AlreadyExists(job.job_id));
        }
        jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        Ok(jobs.get(&job_id).cloned())
    }

    async fn save(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        match jobs.get_mut(&job.job_id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.job_id)),
        }
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        Ok(jobs.remove(&job_id).is_some())
    }

    async fn list_by_user(&self, user_id: UserId, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        self.select(limit, |j| j.user_id == user_id)
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        self.select(limit, |j| j.is_expired(now))
    }

    async fn list_unrefunded(&self, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        self.select(limit, JobRecord::needs_refund)
    }
}
