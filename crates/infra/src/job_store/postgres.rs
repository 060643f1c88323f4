//! Postgres-backed job store.
//!
//! The record lives in a JSONB column; the handful of fields that queries
//! filter on are duplicated into plain columns on every write.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use pixforge_core::{JobId, UserId};
use pixforge_jobs::JobRecord;

use super::{JobStore, JobStoreError};

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_records(
        &self,
        operation: &str,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter()
            .map(|row| {
                row.try_get::<Json<JobRecord>, _>("record")
                    .map(|Json(job)| job)
                    .map_err(|e| map_sqlx_error(operation, e))
            })
            .collect()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        other => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, other)),
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait::async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.job_id), err)]
    async fn insert(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_records (job_id, user_id, status, credits_refunded, expires_at, created_at, record)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job.job_id.as_uuid())
        .bind(job.user_id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.credits_refunded)
        .bind(job.expires_at)
        .bind(job.created_at)
        .bind(Json(job))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::AlreadyExists(job.job_id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        let query = sqlx::query("SELECT record FROM job_records WHERE job_id = $1").bind(*job_id.as_uuid());
        Ok(self.fetch_records("get_job", query).await?.into_iter().next())
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id, status = %job.status), err)]
    async fn save(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE job_records
            SET status = $2, credits_refunded = $3, expires_at = $4, record = $5
            WHERE job_id = $1
            "#,
        )
        .bind(job.job_id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.credits_refunded)
        .bind(job.expires_at)
        .bind(Json(job))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_job", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job.job_id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn delete(&self, job_id: JobId) -> Result<bool, JobStoreError> {
        let result = sqlx::query("DELETE FROM job_records WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_by_user(&self, user_id: UserId, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        let query = sqlx::query(
            "SELECT record FROM job_records WHERE user_id = $1 ORDER BY created_at DESC, job_id DESC LIMIT $2",
        )
        .bind(*user_id.as_uuid())
        .bind(limit_param(limit));
        self.fetch_records("list_jobs_by_user", query).await
    }

    #[instrument(skip(self), err)]
    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        let query = sqlx::query(
            "SELECT record FROM job_records WHERE expires_at < $1 ORDER BY expires_at ASC LIMIT $2",
        )
        .bind(now)
        .bind(limit_param(limit));
        self.fetch_records("list_expired_jobs", query).await
    }

    #[instrument(skip(self), err)]
    async fn list_unrefunded(&self, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        let query = sqlx::query(
            r#"
            SELECT record FROM job_records
            WHERE status IN ('failed', 'cancelled')
              AND credits_refunded = FALSE
              AND record -> 'reservation' IS NOT NULL
              AND record -> 'reservation' <> 'null'::jsonb
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit_param(limit));
        self.fetch_records("list_unrefunded_jobs", query).await
    }
}
