use super::{CoinStore, UserId};
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
struct State {
    coins: HashMap<String, CoinRecord>,
    memberships: HashSet<(UserId, String)>,
}

/// In-process coin store used by tests.
///
/// Writes can be made to fail for chosen ids, and the whole store can be
/// marked unreachable, to exercise the refresh failure paths.
#[derive(Default)]
pub struct MemoryCoinStore {
    state: RwLock<State>,
    failing_ids: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
    flushes: Mutex<Vec<usize>>,
}

impl MemoryCoinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record as-is, timestamp included
    pub async fn seed(&self, coin: CoinRecord) {
        self.state.write().await.coins.insert(coin.id.clone(), coin);
    }

    /// Any flush containing `id` fails and is rolled back
    pub async fn fail_writes_for(&self, id: &str) {
        self.failing_ids.lock().await.insert(id.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Sizes of every flush attempted, failed ones included
    pub async fn flush_sizes(&self) -> Vec<usize> {
        self.flushes.lock().await.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PriceSyncError::StoreUnavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CoinStore for MemoryCoinStore {
    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        self.check_available()?;
        let state = self.state.read().await;

        Ok(state
            .coins
            .values()
            .filter(|c| c.last_updated < cutoff)
            .map(|c| c.id.clone())
            .collect())
    }

    async fn apply_prices(&self, updates: &[PriceUpdate]) -> Result<u64> {
        self.check_available()?;
        self.flushes.lock().await.push(updates.len());

        {
            let failing = self.failing_ids.lock().await;
            if let Some(bad) = updates.iter().find(|u| failing.contains(&u.id)) {
                return Err(PriceSyncError::StoreError(format!(
                    "update rejected for {}",
                    bad.id
                )));
            }
        }

        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut updated = 0;
        for update in updates {
            if let Some(coin) = state.coins.get_mut(&update.id) {
                coin.price = update.price;
                coin.last_updated = now;
                updated += 1;
            }
        }

        Ok(updated)
    }

    async fn get_coin(&self, id: &str) -> Result<Option<CoinRecord>> {
        self.check_available()?;
        Ok(self.state.read().await.coins.get(id).cloned())
    }

    async fn portfolio(&self, user_id: UserId) -> Result<Vec<CoinRecord>> {
        self.check_available()?;
        let state = self.state.read().await;

        let mut coins: Vec<CoinRecord> = state
            .memberships
            .iter()
            .filter(|(user, _)| *user == user_id)
            .filter_map(|(_, coin_id)| state.coins.get(coin_id).cloned())
            .collect();
        coins.sort_by(|a, b| a.symbol.cmp(&b.symbol).then_with(|| a.id.cmp(&b.id)));

        Ok(coins)
    }

    async fn in_portfolio(&self, user_id: UserId, coin_id: &str) -> Result<bool> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.memberships.contains(&(user_id, coin_id.to_string())))
    }

    async fn add_to_portfolio(&self, user_id: UserId, coin: &CoinRecord) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let key = (user_id, coin.id.clone());
        if state.memberships.contains(&key) {
            return Err(PriceSyncError::AlreadyInPortfolio(coin.id.clone()));
        }
        state
            .coins
            .entry(coin.id.clone())
            .or_insert_with(|| coin.clone());
        state.memberships.insert(key);

        Ok(())
    }

    async fn replace_in_portfolio(
        &self,
        user_id: UserId,
        from_id: &str,
        to: &CoinRecord,
    ) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let from_key = (user_id, from_id.to_string());
        let to_key = (user_id, to.id.clone());
        if !state.memberships.contains(&from_key) {
            return Err(PriceSyncError::NotInPortfolio(from_id.to_string()));
        }
        if from_key != to_key && state.memberships.contains(&to_key) {
            return Err(PriceSyncError::AlreadyInPortfolio(to.id.clone()));
        }

        state.memberships.remove(&from_key);
        state.coins.entry(to.id.clone()).or_insert_with(|| to.clone());
        state.memberships.insert(to_key);

        Ok(())
    }

    async fn remove_from_portfolio(&self, user_id: UserId, coin_id: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;

        if !state.memberships.remove(&(user_id, coin_id.to_string())) {
            return Err(PriceSyncError::NotInPortfolio(coin_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn update(id: &str, price: i64) -> PriceUpdate {
        PriceUpdate {
            id: id.to_string(),
            price: Decimal::from(price),
        }
    }

    #[tokio::test]
    async fn test_failed_flush_applies_nothing() {
        let store = MemoryCoinStore::new();
        store.seed(CoinRecord::new("bitcoin", "btc", "Bitcoin", Decimal::ZERO)).await;
        store.seed(CoinRecord::new("ethereum", "eth", "Ethereum", Decimal::ZERO)).await;
        store.fail_writes_for("ethereum").await;

        let result = store
            .apply_prices(&[update("bitcoin", 50000), update("ethereum", 3000)])
            .await;

        assert!(matches!(result, Err(PriceSyncError::StoreError(_))));
        let btc = store.get_coin("bitcoin").await.unwrap().unwrap();
        assert_eq!(btc.price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_counted() {
        let store = MemoryCoinStore::new();
        store.seed(CoinRecord::new("bitcoin", "btc", "Bitcoin", Decimal::ZERO)).await;

        let updated = store
            .apply_prices(&[update("bitcoin", 50000), update("ghost", 1)])
            .await
            .unwrap();

        assert_eq!(updated, 1);
        assert_eq!(store.flush_sizes().await, vec![2]);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_fatal() {
        let store = MemoryCoinStore::new();
        store.set_unavailable(true);

        let err = store.find_stale(Utc::now()).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
