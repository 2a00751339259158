//! Batched price refresh against the external source.
//!
//! Ids are fetched in groups no larger than the provider accepts, and the
//! resulting prices are written back in flushes no larger than the flush
//! threshold. The two limits are independent. Ids the provider does not price
//! are skipped and keep their old timestamp, so the next scan picks them up.

use crate::sources::coingecko::MAX_IDS_PER_REQUEST;
use crate::store::CoinStore;
use crate::types::*;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Default number of rows written per transaction
pub const DEFAULT_FLUSH_THRESHOLD: usize = 20;

/// Outcome of one `refresh` call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshReport {
    /// Ids handed to `refresh`
    pub requested: usize,
    /// External price calls made
    pub groups: usize,
    /// Rows written by committed flushes
    pub updated: u64,
    /// Ids the source returned no price for
    pub skipped: usize,
    pub flushes: usize,
    pub failed_flushes: usize,
    /// Priced ids lost to failed flushes
    pub deferred: usize,
}

pub struct BatchPriceUpdater {
    source: Arc<dyn PriceSource>,
    store: Arc<dyn CoinStore>,
    api_batch_size: usize,
    flush_threshold: usize,
}

impl BatchPriceUpdater {
    pub fn new(source: Arc<dyn PriceSource>, store: Arc<dyn CoinStore>) -> Self {
        Self {
            source,
            store,
            api_batch_size: MAX_IDS_PER_REQUEST,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    /// Ids per external call, capped at the provider limit
    pub fn with_api_batch_size(mut self, size: usize) -> Self {
        self.api_batch_size = size.clamp(1, MAX_IDS_PER_REQUEST);
        self
    }

    /// Rows per write transaction
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold.max(1);
        self
    }

    /// Fetch fresh prices for `ids` and write them back.
    ///
    /// Only a lost store connection is returned as an error; every other
    /// failure is logged, counted in the report and retried next cycle.
    pub async fn refresh(&self, ids: &[String], currency: &str) -> Result<RefreshReport> {
        let mut report = RefreshReport {
            requested: ids.len(),
            ..Default::default()
        };
        let mut buffer: Vec<PriceUpdate> = Vec::with_capacity(self.flush_threshold);

        for group in ids.chunks(self.api_batch_size) {
            report.groups += 1;
            let quotes = self.source.fetch_prices(group, currency).await;
            debug!(
                "{} returned {} of {} requested prices",
                self.source.name(),
                quotes.len(),
                group.len()
            );

            for id in group {
                match quotes.get(id).and_then(|q| q.price(currency)) {
                    Some(price) => {
                        buffer.push(PriceUpdate {
                            id: id.clone(),
                            price,
                        });
                        if buffer.len() >= self.flush_threshold {
                            self.flush(&mut buffer, &mut report).await?;
                        }
                    }
                    None => {
                        warn!(coin_id = %id, currency, "API did not return a price, deferring");
                        report.skipped += 1;
                    }
                }
            }
        }

        if !buffer.is_empty() {
            self.flush(&mut buffer, &mut report).await?;
        }

        info!(
            "Refresh done: {} requested, {} updated, {} skipped, {}/{} flushes failed",
            report.requested, report.updated, report.skipped, report.failed_flushes, report.flushes
        );
        Ok(report)
    }

    async fn flush(&self, buffer: &mut Vec<PriceUpdate>, report: &mut RefreshReport) -> Result<()> {
        let batch = std::mem::take(buffer);
        report.flushes += 1;

        match self.store.apply_prices(&batch).await {
            Ok(updated) => {
                debug!("Flushed {} price updates ({} rows)", batch.len(), updated);
                report.updated += updated;
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!("Price flush of {} rows rolled back: {}", batch.len(), e);
                report.failed_flushes += 1;
                report.deferred += batch.len();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCoinStore;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Prices every id it knows, records each call's batch
    struct FixedSource {
        prices: HashMap<String, Decimal>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FixedSource {
        fn new(prices: &[(&str, i64)]) -> Self {
            Self {
                prices: prices
                    .iter()
                    .map(|(id, p)| (id.to_string(), Decimal::from(*p)))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl PriceSource for FixedSource {
        async fn fetch_prices(&self, ids: &[String], currency: &str) -> PriceMap {
            self.calls.lock().unwrap().push(ids.to_vec());
            ids.iter()
                .filter_map(|id| {
                    let price = *self.prices.get(id)?;
                    let quote = CoinQuote {
                        prices: HashMap::from([(currency.to_string(), price)]),
                    };
                    Some((id.clone(), quote))
                })
                .collect()
        }

        async fn fetch_catalog(&self) -> Vec<CatalogEntry> {
            Vec::new()
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    async fn stale_store(ids: &[&str]) -> Arc<MemoryCoinStore> {
        let store = Arc::new(MemoryCoinStore::new());
        for id in ids {
            let mut coin = CoinRecord::new(id, id, id, Decimal::ZERO);
            coin.last_updated = Utc::now() - Duration::hours(3);
            store.seed(coin).await;
        }
        store
    }

    #[tokio::test]
    async fn test_missing_price_is_skipped_and_left_stale() {
        let store = stale_store(&["bitcoin", "ethereum"]).await;
        let before = store.get_coin("ethereum").await.unwrap().unwrap();
        let source = Arc::new(FixedSource::new(&[("bitcoin", 50000)]));
        let updater = BatchPriceUpdater::new(source, store.clone());

        let ids = vec!["bitcoin".to_string(), "ethereum".to_string()];
        let report = updater.refresh(&ids, "usd").await.unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.flush_sizes().await, vec![1]);

        let btc = store.get_coin("bitcoin").await.unwrap().unwrap();
        assert_eq!(btc.price, Decimal::from(50000));
        assert!(btc.last_updated > before.last_updated);

        let eth = store.get_coin("ethereum").await.unwrap().unwrap();
        assert_eq!(eth, before);
    }

    #[tokio::test]
    async fn test_group_without_prices_makes_no_flush() {
        let store = stale_store(&["a", "b"]).await;
        let updater = BatchPriceUpdater::new(Arc::new(FixedSource::new(&[])), store.clone());

        let ids = vec!["a".to_string(), "b".to_string()];
        let report = updater.refresh(&ids, "usd").await.unwrap();

        assert_eq!(report.flushes, 0);
        assert!(store.flush_sizes().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_sizes_are_clamped() {
        let store = Arc::new(MemoryCoinStore::new());
        let source = Arc::new(FixedSource::new(&[]));
        let updater = BatchPriceUpdater::new(source.clone(), store)
            .with_api_batch_size(500)
            .with_flush_threshold(0);

        let ids: Vec<String> = (0..45).map(|i| format!("coin-{i}")).collect();
        updater.refresh(&ids, "usd").await.unwrap();

        let sizes: Vec<usize> = source.calls.lock().unwrap().iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![20, 20, 5]);
        assert_eq!(updater.flush_threshold, 1);
    }
}
