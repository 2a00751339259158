use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coin row owned by the durable store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CoinRecord {
    pub id: String,          // "bitcoin", "ethereum"
    pub symbol: String,      // "btc", not unique
    pub name: String,
    pub price: Decimal,      // zero when unknown
    pub last_updated: DateTime<Utc>,
}

impl CoinRecord {
    /// New record stamped with the current time
    pub fn new(id: &str, symbol: &str, name: &str, price: Decimal) -> Self {
        Self {
            id: id.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            price,
            last_updated: Utc::now(),
        }
    }
}

/// Coin metadata held in the lookup cache.
///
/// The price here is advisory; the durable store holds the authoritative one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCoin {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
}

impl From<CatalogEntry> for CachedCoin {
    fn from(entry: CatalogEntry) -> Self {
        Self {
            id: entry.id,
            symbol: entry.symbol,
            name: entry.name,
            price: Decimal::ZERO,
        }
    }
}

/// One entry of the provider's coin catalog (`/coins/list`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub symbol: String,
    pub name: String,
}

/// Prices for a single coin, keyed by lowercase currency code.
///
/// Null values in the provider response are dropped while deserializing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, Option<Decimal>>")]
pub struct CoinQuote {
    pub prices: HashMap<String, Decimal>,
}

impl CoinQuote {
    pub fn price(&self, currency: &str) -> Option<Decimal> {
        self.prices.get(&currency.to_lowercase()).copied()
    }
}

impl From<HashMap<String, Option<Decimal>>> for CoinQuote {
    fn from(raw: HashMap<String, Option<Decimal>>) -> Self {
        Self {
            prices: raw
                .into_iter()
                .filter_map(|(currency, price)| price.map(|p| (currency.to_lowercase(), p)))
                .collect(),
        }
    }
}

/// Response of `/simple/price`: coin id -> quote
pub type PriceMap = HashMap<String, CoinQuote>;

/// A single buffered price write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceUpdate {
    pub id: String,
    pub price: Decimal,
}

/// Data source health/status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source: String,
    pub is_healthy: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub success_rate: f64,
    pub avg_latency_ms: u64,
}

/// Error types for price sync
#[derive(Debug, thiserror::Error)]
pub enum PriceSyncError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded for {source_name}")]
    RateLimit { source_name: String, retry_after: Option<u64> },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Coin not found: {0}")]
    CoinNotFound(String),

    #[error("Coin {0} already in portfolio")]
    AlreadyInPortfolio(String),

    #[error("Coin {0} is not in portfolio")]
    NotInPortfolio(String),

    #[error("No price available for {0}")]
    PriceUnavailable(String),
}

impl PriceSyncError {
    /// Store connectivity is lost; callers must not keep going
    pub fn is_fatal(&self) -> bool {
        matches!(self, PriceSyncError::StoreUnavailable(_))
    }
}

impl From<sqlx::Error> for PriceSyncError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => PriceSyncError::StoreUnavailable(e.to_string()),
            _ => PriceSyncError::StoreError(e.to_string()),
        }
    }
}

impl From<redis::RedisError> for PriceSyncError {
    fn from(e: redis::RedisError) -> Self {
        PriceSyncError::CacheError(e.to_string())
    }
}

/// Result type for price sync operations
pub type Result<T> = std::result::Result<T, PriceSyncError>;

/// Source of coin prices and the coin catalog.
///
/// Implementations never fail: any transport or parsing problem is logged and
/// reported as an empty result, so an absent id means "price unknown for now".
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    /// Current prices for at most one provider batch of ids
    async fn fetch_prices(&self, ids: &[String], currency: &str) -> PriceMap;

    /// Full coin catalog
    async fn fetch_catalog(&self) -> Vec<CatalogEntry>;

    /// Source name
    fn name(&self) -> &str;
}
