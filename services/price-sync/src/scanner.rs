use crate::store::CoinStore;
use crate::types::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::debug;

/// Finds coins whose stored price has aged past a threshold
pub struct StalenessScanner {
    store: Arc<dyn CoinStore>,
}

impl StalenessScanner {
    pub fn new(store: Arc<dyn CoinStore>) -> Self {
        Self { store }
    }

    /// Ids last refreshed more than `threshold` ago, in store order
    pub async fn find_stale(&self, threshold: Duration) -> Result<Vec<String>> {
        let cutoff = Utc::now() - threshold;
        let ids = self.store.find_stale(cutoff).await?;
        debug!("{} coins older than {}", ids.len(), cutoff);
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCoinStore;
    use crate::types::CoinRecord;
    use rust_decimal::Decimal;

    async fn seed_aged(store: &MemoryCoinStore, id: &str, hours_ago: i64) {
        let mut coin = CoinRecord::new(id, id, id, Decimal::ONE);
        coin.last_updated = Utc::now() - Duration::hours(hours_ago);
        store.seed(coin).await;
    }

    #[tokio::test]
    async fn test_only_rows_past_threshold_are_stale() {
        let store = Arc::new(MemoryCoinStore::new());
        seed_aged(&store, "three-hours", 3).await;
        seed_aged(&store, "one-hour", 1).await;
        seed_aged(&store, "five-hours", 5).await;

        let scanner = StalenessScanner::new(store);
        let mut stale = scanner.find_stale(Duration::hours(2)).await.unwrap();
        stale.sort();

        assert_eq!(stale, vec!["five-hours", "three-hours"]);
    }

    #[tokio::test]
    async fn test_empty_store_has_nothing_stale() {
        let scanner = StalenessScanner::new(Arc::new(MemoryCoinStore::new()));
        assert!(scanner.find_stale(Duration::hours(2)).await.unwrap().is_empty());
    }
}
