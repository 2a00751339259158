//! Durable store for coin records and portfolio memberships

mod memory;
mod postgres;

pub use self::memory::MemoryCoinStore;
pub use self::postgres::{connect, PgCoinStore};

use crate::types::{CoinRecord, PriceUpdate, Result};
use chrono::{DateTime, Utc};

/// Opaque user id issued by the auth service
pub type UserId = i64;

#[async_trait::async_trait]
pub trait CoinStore: Send + Sync {
    /// Ids of coins whose `last_updated` is before `cutoff`
    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;

    /// Write prices and refresh `last_updated` for every row, all or nothing.
    ///
    /// Returns the number of rows updated.
    async fn apply_prices(&self, updates: &[PriceUpdate]) -> Result<u64>;

    async fn get_coin(&self, id: &str) -> Result<Option<CoinRecord>>;

    /// Coins in a user's portfolio
    async fn portfolio(&self, user_id: UserId) -> Result<Vec<CoinRecord>>;

    async fn in_portfolio(&self, user_id: UserId, coin_id: &str) -> Result<bool>;

    /// Store `coin` unless it already exists and link it to the portfolio,
    /// in one transaction.
    async fn add_to_portfolio(&self, user_id: UserId, coin: &CoinRecord) -> Result<()>;

    /// Swap `from_id` for `to` in one transaction, storing `to` if needed
    async fn replace_in_portfolio(
        &self,
        user_id: UserId,
        from_id: &str,
        to: &CoinRecord,
    ) -> Result<()>;

    /// Unlink a coin; the coin record itself is kept
    async fn remove_from_portfolio(&self, user_id: UserId, coin_id: &str) -> Result<()>;
}
