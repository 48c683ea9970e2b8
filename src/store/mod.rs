//! Account Store
//!
//! Narrow interface to persistent user storage. The match server only
//! needs three operations: load an account, write a rating, and persist
//! a finished match. Everything else (registration, credentials) lives
//! behind the web gateway and is out of scope here.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::{AccountId, RecordId};
use crate::core::rating::Rating;
use crate::game::board::Coordinate;

pub use memory::MemoryAccountStore;

/// Public profile of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Account identifier.
    pub id: AccountId,
    /// Display name.
    pub username: String,
    /// Current skill rating.
    pub rating: Rating,
    /// Ranked wins.
    pub wins: u32,
    /// Ranked losses.
    pub losses: u32,
}

/// One side of a persisted match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSide {
    /// Account of the player.
    pub id: AccountId,
    /// Bombs the player threw, in order.
    pub bombs_thrown: Vec<Coordinate>,
}

/// Persisted summary of a finished match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    /// Turns played.
    pub turns: u32,
    /// Winning side.
    pub winner: RecordSide,
    /// Losing side.
    pub loser: RecordSide,
    /// Settlement time.
    pub timestamp: DateTime<Utc>,
}

/// Account store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No account with this id.
    #[error("Account not found")]
    AccountNotFound,

    /// Backend write or read failed.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

/// Storage backend for accounts and match history.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Load an account.
    async fn get_account_by_id(&self, id: &AccountId) -> Result<Account, StoreError>;

    /// Overwrite an account's rating.
    async fn update_rating(&self, id: &AccountId, rating: Rating) -> Result<(), StoreError>;

    /// Persist a finished match. Returns the record id.
    async fn record_match_result(&self, record: &MatchRecord) -> Result<RecordId, StoreError>;
}
