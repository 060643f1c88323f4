use std::collections::HashMap;
use std::sync::RwLock;

use pixforge_core::{ExpectedVersion, UserId, Versioned};
use pixforge_credits::CreditAccount;

use super::{AccountStore, AccountStoreError};

/// In-memory account store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<UserId, Versioned<CreditAccount>>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> AccountStoreError {
        AccountStoreError::Storage("account store lock poisoned".to_string())
    }
}

#[async_trait::async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn load(&self, user_id: UserId) -> Result<Option<Versioned<CreditAccount>>, AccountStoreError> {
        let accounts = self.accounts.read().map_err(|_| Self::poisoned())?;
        Ok(accounts.get(&user_id).cloned())
    }

    async fn insert(&self, account: CreditAccount) -> Result<Versioned<CreditAccount>, AccountStoreError> {
        let mut accounts = self.accounts.write().map_err(|_| Self::poisoned())?;
        let user_id = account.user_id();
        if accounts.contains_key(&user_id) {
            return Err(AccountStoreError::AlreadyExists(user_id));
        }
        let stored = Versioned::new(account, 1);
        accounts.insert(user_id, stored.clone());
        Ok(stored)
    }

    async fn save(
        &self,
        account: &CreditAccount,
        expected: ExpectedVersion,
    ) -> Result<u64, AccountStoreError> {
        let mut accounts = self.accounts.write().map_err(|_| Self::poisoned())?;
        let user_id = account.user_id();
        let current = accounts
            .get_mut(&user_id)
            .ok_or(AccountStoreError::NotFound(user_id))?;

        expected
            .check(current.version)
            .map_err(|e| AccountStoreError::Concurrency(e.to_string()))?;

        current.value = account.clone();
        current.version += 1;
        Ok(current.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn stale_write_is_rejected() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();
        let stored = store.insert(CreditAccount::open(user, Utc::now())).await.unwrap();
        assert_eq!(stored.version, 1);

        let v2 = store.save(&stored.value, stored.expected()).await.unwrap();
        assert_eq!(v2, 2);

        let err = store.save(&stored.value, stored.expected()).await.unwrap_err();
        assert!(matches!(err, AccountStoreError::Concurrency(_)));
    }

    #[tokio::test]
    async fn duplicate_insert_and_missing_save() {
        let store = InMemoryAccountStore::new();
        let account = CreditAccount::open(UserId::new(), Utc::now());
        store.insert(account.clone()).await.unwrap();
        assert!(matches!(
            store.insert(account).await,
            Err(AccountStoreError::AlreadyExists(_))
        ));

        let stranger = CreditAccount::open(UserId::new(), Utc::now());
        assert!(matches!(
            store.save(&stranger, ExpectedVersion::Any).await,
            Err(AccountStoreError::NotFound(_))
        ));
    }
}
