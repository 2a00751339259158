use crate::cache::MetadataCache;
use crate::types::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-side calls served to the presentation layer
#[derive(Clone)]
pub struct CoinLookup {
    cache: Arc<dyn MetadataCache>,
    source: Arc<dyn PriceSource>,
}

impl CoinLookup {
    pub fn new(cache: Arc<dyn MetadataCache>, source: Arc<dyn PriceSource>) -> Self {
        Self { cache, source }
    }

    /// Live price of one coin as `{currency: price}`, empty when unknown
    pub async fn current_price(&self, id: &str, currency: &str) -> HashMap<String, Decimal> {
        let currency = currency.to_lowercase();
        let mut prices = self.source.fetch_prices(&[id.to_string()], &currency).await;

        prices
            .remove(id)
            .and_then(|quote| quote.price(&currency))
            .map(|price| HashMap::from([(currency, price)]))
            .unwrap_or_default()
    }

    pub async fn coin(&self, id: &str) -> Result<Option<CachedCoin>> {
        self.cache.get_by_id(id).await
    }

    /// Cached coins sharing a ticker, sorted by id
    pub async fn search_symbol(&self, symbol: &str) -> Result<Vec<CachedCoin>> {
        let mut coins = self.cache.get_by_symbol(symbol).await?;
        coins.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(coins)
    }
}
