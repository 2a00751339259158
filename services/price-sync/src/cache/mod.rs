//! Coin metadata cache and the cross-instance initialization lock.
//!
//! Two indexes are kept: `coin:{id}` holds the metadata and `symbol:{symbol}`
//! holds the set of ids sharing a ticker. A `put` writes both in one step, so
//! every id reachable through the symbol index has metadata.

mod memory;
mod redis_cache;

pub use self::memory::MemoryCache;
pub use self::redis_cache::RedisCache;

use crate::types::{CachedCoin, Result};
use std::time::Duration;

/// Key of the metadata hash for a coin id
pub fn coin_key(id: &str) -> String {
    format!("coin:{}", id)
}

/// Key of the id set for a ticker symbol
pub fn symbol_key(symbol: &str) -> String {
    format!("symbol:{}", normalize_symbol(symbol))
}

/// Tickers are matched case-insensitively
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_lowercase()
}

/// Lookup cache for coin metadata
#[async_trait::async_trait]
pub trait MetadataCache: Send + Sync {
    /// Upsert metadata and index the id under its symbol.
    ///
    /// The stored symbol is normalized, so `get_by_id` returns it lowercased.
    /// A changed symbol moves the id out of its previous symbol set.
    async fn put(&self, coin: &CachedCoin) -> Result<()>;

    async fn get_by_id(&self, id: &str) -> Result<Option<CachedCoin>>;

    /// All coins sharing a ticker, empty when the ticker is unknown
    async fn get_by_symbol(&self, symbol: &str) -> Result<Vec<CachedCoin>>;
}

/// Named lock with a time-to-live.
///
/// There is no unlock: a lock is released only by expiring.
#[async_trait::async_trait]
pub trait InitLock: Send + Sync {
    /// Returns true when this caller now holds `key` for `ttl`
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool>;
}
