//! Postgres-backed account store.
//!
//! The account is a JSONB document next to a `version` column; `save` is a
//! single conditional `UPDATE ... WHERE version = $expected`, so the compare
//! and the swap happen atomically in the database.

use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use pixforge_core::{ExpectedVersion, UserId, Versioned};
use pixforge_credits::CreditAccount;

use super::{AccountStore, AccountStoreError};

#[derive(Debug, Clone)]
pub struct PostgresAccountStore {
    pool: PgPool,
}

impl PostgresAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> AccountStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique violation: a concurrent insert won
                Some("23505") => AccountStoreError::Concurrency(msg),
                _ => AccountStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            AccountStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        other => AccountStoreError::Storage(format!("sqlx error in {}: {}", operation, other)),
    }
}

fn to_version(raw: i64) -> u64 {
    raw.max(0) as u64
}

#[async_trait::async_trait]
impl AccountStore for PostgresAccountStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn load(&self, user_id: UserId) -> Result<Option<Versioned<CreditAccount>>, AccountStoreError> {
        let row = sqlx::query("SELECT version, account FROM credit_accounts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_account", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row
            .try_get("version")
            .map_err(|e| map_sqlx_error("load_account", e))?;
        let Json(account): Json<CreditAccount> = row
            .try_get("account")
            .map_err(|e| map_sqlx_error("load_account", e))?;
        Ok(Some(Versioned::new(account, to_version(version))))
    }

    #[instrument(skip(self, account), fields(user_id = %account.user_id()), err)]
    async fn insert(&self, account: CreditAccount) -> Result<Versioned<CreditAccount>, AccountStoreError> {
        let user_id = account.user_id();
        let result = sqlx::query(
            r#"
            INSERT INTO credit_accounts (user_id, version, account, updated_at)
            VALUES ($1, 1, $2, now())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(Json(&account))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_account", e))?;

        if result.rows_affected() == 0 {
            return Err(AccountStoreError::AlreadyExists(user_id));
        }
        Ok(Versioned::new(account, 1))
    }

    #[instrument(skip(self, account), fields(user_id = %account.user_id(), expected = ?expected), err)]
    async fn save(
        &self,
        account: &CreditAccount,
        expected: ExpectedVersion,
    ) -> Result<u64, AccountStoreError> {
        let user_id = account.user_id();
        let expected_raw: Option<i64> = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(v as i64),
        };

        let row = sqlx::query(
            r#"
            UPDATE credit_accounts
            SET account = $2, version = version + 1, updated_at = now()
            WHERE user_id = $1 AND ($3::bigint IS NULL OR version = $3)
            RETURNING version
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(Json(account))
        .bind(expected_raw)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_account", e))?;

        if let Some(row) = row {
            let version: i64 = row
                .try_get("version")
                .map_err(|e| map_sqlx_error("save_account", e))?;
            return Ok(to_version(version));
        }

        // Distinguish a stale version from a missing row.
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM credit_accounts WHERE user_id = $1)",
        )
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_account", e))?;

        if exists {
            Err(AccountStoreError::Concurrency(format!(
                "optimistic concurrency check failed for {user_id} (expected: {expected:?})"
            )))
        } else {
            Err(AccountStoreError::NotFound(user_id))
        }
    }
}
