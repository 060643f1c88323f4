//! Credit account persistence.
//!
//! Accounts are stored whole with a monotonically increasing version; every
//! write names the version it was derived from so concurrent read-modify-write
//! cycles cannot lose updates.

use std::sync::Arc;

use pixforge_core::{ExpectedVersion, UserId, Versioned};
use pixforge_credits::CreditAccount;

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use in_memory::InMemoryAccountStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresAccountStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AccountStoreError {
    #[error("account not found: {0}")]
    NotFound(UserId),
    #[error("account already exists: {0}")]
    AlreadyExists(UserId),
    /// The stored version no longer matches the expectation.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    async fn load(&self, user_id: UserId) -> Result<Option<Versioned<CreditAccount>>, AccountStoreError>;

    /// Persist a new account at version 1.
    async fn insert(&self, account: CreditAccount) -> Result<Versioned<CreditAccount>, AccountStoreError>;

    /// Replace the account if its stored version satisfies `expected`.
    /// Returns the new version.
    async fn save(
        &self,
        account: &CreditAccount,
        expected: ExpectedVersion,
    ) -> Result<u64, AccountStoreError>;
}

#[async_trait::async_trait]
impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    async fn load(&self, user_id: UserId) -> Result<Option<Versioned<CreditAccount>>, AccountStoreError> {
        (**self).load(user_id).await
    }

    async fn insert(&self, account: CreditAccount) -> Result<Versioned<CreditAccount>, AccountStoreError> {
        (**self).insert(account).await
    }

    async fn save(
        &self,
        account: &CreditAccount,
        expected: ExpectedVersion,
    ) -> Result<u64, AccountStoreError> {
        (**self).save(account, expected).await
    }
}
