//! Shared fixtures for integration tests

#![allow(dead_code)]

use chrono::{Duration, Utc};
use price_sync::{CatalogEntry, CoinQuote, CoinRecord, MemoryCoinStore, PriceMap, PriceSource};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Price source answering from fixed tables and recording every call
#[derive(Default)]
pub struct ScriptedSource {
    prices: HashMap<String, Decimal>,
    catalog: Vec<CatalogEntry>,
    price_calls: Mutex<Vec<Vec<String>>>,
    catalog_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, id: &str, price: i64) -> Self {
        self.prices.insert(id.to_string(), Decimal::from(price));
        self
    }

    pub fn with_prices<'a>(mut self, ids: impl IntoIterator<Item = &'a String>, price: i64) -> Self {
        for id in ids {
            self.prices.insert(id.clone(), Decimal::from(price));
        }
        self
    }

    pub fn with_catalog(mut self, entries: &[(&str, &str, &str)]) -> Self {
        self.catalog = entries
            .iter()
            .map(|(id, symbol, name)| CatalogEntry {
                id: id.to_string(),
                symbol: symbol.to_string(),
                name: name.to_string(),
            })
            .collect();
        self
    }

    /// Ids requested per call, in call order
    pub fn price_calls(&self) -> Vec<Vec<String>> {
        self.price_calls.lock().unwrap().clone()
    }

    pub fn catalog_calls(&self) -> usize {
        self.catalog_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PriceSource for ScriptedSource {
    async fn fetch_prices(&self, ids: &[String], currency: &str) -> PriceMap {
        self.price_calls.lock().unwrap().push(ids.to_vec());
        ids.iter()
            .filter_map(|id| {
                let price = *self.prices.get(id)?;
                let quote = CoinQuote {
                    prices: HashMap::from([(currency.to_lowercase(), price)]),
                };
                Some((id.clone(), quote))
            })
            .collect()
    }

    async fn fetch_catalog(&self) -> Vec<CatalogEntry> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        // Give a racing caller the chance to run while this one is fetching
        tokio::task::yield_now().await;
        self.catalog.clone()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn coin_ids(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}-{i}")).collect()
}

/// Store a zero-priced coin refreshed `hours_ago`
pub async fn seed_aged(store: &MemoryCoinStore, id: &str, hours_ago: i64) -> CoinRecord {
    let mut coin = CoinRecord::new(id, id, id, Decimal::ZERO);
    coin.last_updated = Utc::now() - Duration::hours(hours_ago);
    store.seed(coin.clone()).await;
    coin
}
