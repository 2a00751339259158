//! Portfolio membership flows.
//!
//! Coin records are created the first time any user adds a coin; the
//! metadata comes from the lookup cache and the price from the source.
//! Removing a coin only unlinks it, the record stays for other portfolios.

use crate::cache::MetadataCache;
use crate::store::{CoinStore, UserId};
use crate::types::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PortfolioService {
    store: Arc<dyn CoinStore>,
    cache: Arc<dyn MetadataCache>,
    source: Arc<dyn PriceSource>,
}

impl PortfolioService {
    pub fn new(
        store: Arc<dyn CoinStore>,
        cache: Arc<dyn MetadataCache>,
        source: Arc<dyn PriceSource>,
    ) -> Self {
        Self { store, cache, source }
    }

    pub async fn list(&self, user_id: UserId) -> Result<Vec<CoinRecord>> {
        self.store.portfolio(user_id).await
    }

    /// Add a coin, creating its record on first reference.
    ///
    /// A coin the source cannot price yet is stored at zero and picked up by
    /// the next refresh.
    pub async fn add(&self, user_id: UserId, coin_id: &str, currency: &str) -> Result<()> {
        let coin = match self.store.get_coin(coin_id).await? {
            Some(existing) => existing,
            None => {
                let cached = self.cached(coin_id).await?;
                let price = self.fetch_price(coin_id, currency).await.unwrap_or_else(|| {
                    warn!(coin_id, currency, "API did not return a price, storing zero");
                    Decimal::ZERO
                });
                CoinRecord::new(&cached.id, &cached.symbol, &cached.name, price)
            }
        };

        self.store.add_to_portfolio(user_id, &coin).await?;
        info!("User {} added {}", user_id, coin_id);
        Ok(())
    }

    /// Swap one coin for another in a single transaction.
    ///
    /// Unlike `add`, a new coin without a current price is rejected.
    pub async fn replace(
        &self,
        user_id: UserId,
        from_id: &str,
        to_id: &str,
        currency: &str,
    ) -> Result<()> {
        if self.store.get_coin(from_id).await?.is_none() {
            return Err(PriceSyncError::CoinNotFound(from_id.to_string()));
        }
        if !self.store.in_portfolio(user_id, from_id).await? {
            return Err(PriceSyncError::NotInPortfolio(from_id.to_string()));
        }

        let to = match self.store.get_coin(to_id).await? {
            Some(existing) => existing,
            None => {
                let cached = self.cached(to_id).await?;
                let price = self
                    .fetch_price(to_id, currency)
                    .await
                    .ok_or_else(|| PriceSyncError::PriceUnavailable(to_id.to_string()))?;
                CoinRecord::new(&cached.id, &cached.symbol, &cached.name, price)
            }
        };

        self.store.replace_in_portfolio(user_id, from_id, &to).await?;
        info!("User {} replaced {} with {}", user_id, from_id, to_id);
        Ok(())
    }

    pub async fn remove(&self, user_id: UserId, coin_id: &str) -> Result<()> {
        if self.store.get_coin(coin_id).await?.is_none() {
            return Err(PriceSyncError::CoinNotFound(coin_id.to_string()));
        }
        self.store.remove_from_portfolio(user_id, coin_id).await?;
        info!("User {} removed {}", user_id, coin_id);
        Ok(())
    }

    async fn fetch_price(&self, coin_id: &str, currency: &str) -> Option<Decimal> {
        let prices = self.source.fetch_prices(&[coin_id.to_string()], currency).await;
        prices.get(coin_id).and_then(|q| q.price(currency))
    }

    /// Catalog metadata for a coin not stored yet
    async fn cached(&self, coin_id: &str) -> Result<CachedCoin> {
        self.cache
            .get_by_id(coin_id)
            .await?
            .ok_or_else(|| PriceSyncError::CoinNotFound(coin_id.to_string()))
    }
}
