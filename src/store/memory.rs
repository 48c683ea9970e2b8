//! In-Memory Account Store
//!
//! `AccountStore` over tokio-locked maps. Used by the development binary and
//! by tests, which can also force rating writes to fail.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::ids::{AccountId, RecordId};
use crate::core::rating::Rating;
use crate::store::{Account, AccountStore, MatchRecord, StoreError};

/// In-memory account store for development and tests.
pub struct MemoryAccountStore {
    accounts: RwLock<BTreeMap<AccountId, Account>>,
    records: RwLock<BTreeMap<RecordId, MatchRecord>>,
    /// When set, `update_rating` fails with `PersistenceFailure`.
    fail_rating_updates: AtomicBool,
}

impl MemoryAccountStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(BTreeMap::new()),
            records: RwLock::new(BTreeMap::new()),
            fail_rating_updates: AtomicBool::new(false),
        }
    }

    /// Register an account with a starting rating.
    pub async fn create_account(&self, username: impl Into<String>, rating: Rating) -> Account {
        let account = Account {
            id: AccountId::new_v4(),
            username: username.into(),
            rating,
            wins: 0,
            losses: 0,
        };
        self.accounts.write().await.insert(account.id, account.clone());
        account
    }

    /// Look up an account by display name.
    pub async fn get_account_by_name(&self, username: &str) -> Option<Account> {
        let accounts = self.accounts.read().await;
        accounts.values().find(|a| a.username == username).cloned()
    }

    /// Fetch a persisted record.
    pub async fn get_record(&self, id: &RecordId) -> Option<MatchRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Number of persisted records.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Make subsequent rating writes fail.
    pub fn set_fail_rating_updates(&self, fail: bool) {
        self.fail_rating_updates.store(fail, Ordering::SeqCst);
    }
}

impl Default for MemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get_account_by_id(&self, id: &AccountId) -> Result<Account, StoreError> {
        let accounts = self.accounts.read().await;
        accounts.get(id).cloned().ok_or(StoreError::AccountNotFound)
    }

    async fn update_rating(&self, id: &AccountId, rating: Rating) -> Result<(), StoreError> {
        if self.fail_rating_updates.load(Ordering::SeqCst) {
            return Err(StoreError::PersistenceFailure("rating update rejected".into()));
        }

        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(id).ok_or(StoreError::AccountNotFound)?;
        account.rating = rating;
        Ok(())
    }

    async fn record_match_result(&self, record: &MatchRecord) -> Result<RecordId, StoreError> {
        {
            let mut accounts = self.accounts.write().await;
            if !accounts.contains_key(&record.winner.id) || !accounts.contains_key(&record.loser.id) {
                return Err(StoreError::AccountNotFound);
            }
            if let Some(winner) = accounts.get_mut(&record.winner.id) {
                winner.wins += 1;
            }
            if let Some(loser) = accounts.get_mut(&record.loser.id) {
                loser.losses += 1;
            }
        }

        let id = RecordId::new_v4();
        self.records.write().await.insert(id, record.clone());
        Ok(id)
    }
}
