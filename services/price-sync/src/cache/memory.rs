use super::{normalize_symbol, InitLock, MetadataCache};
use crate::types::*;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

#[derive(Default)]
struct Indexes {
    coins: HashMap<String, CachedCoin>,
    symbols: HashMap<String, HashSet<String>>,
}

/// In-process cache for single-instance runs and tests.
///
/// Both indexes sit behind one lock, so each `put` is atomic.
#[derive(Default)]
pub struct MemoryCache {
    indexes: RwLock<Indexes>,
    locks: Mutex<HashMap<String, Instant>>, // key -> expiry
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.indexes.read().await.coins.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl MetadataCache for MemoryCache {
    async fn put(&self, coin: &CachedCoin) -> Result<()> {
        let symbol = normalize_symbol(&coin.symbol);
        let mut idx = self.indexes.write().await;

        let previous = idx.coins.insert(
            coin.id.clone(),
            CachedCoin {
                symbol: symbol.clone(),
                ..coin.clone()
            },
        );

        // Renamed ticker: drop the id from its old symbol set
        if let Some(old) = previous.filter(|old| old.symbol != symbol) {
            if let Some(ids) = idx.symbols.get_mut(&old.symbol) {
                ids.remove(&coin.id);
                if ids.is_empty() {
                    idx.symbols.remove(&old.symbol);
                }
            }
        }
        idx.symbols.entry(symbol).or_default().insert(coin.id.clone());

        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<CachedCoin>> {
        Ok(self.indexes.read().await.coins.get(id).cloned())
    }

    async fn get_by_symbol(&self, symbol: &str) -> Result<Vec<CachedCoin>> {
        let idx = self.indexes.read().await;
        let Some(ids) = idx.symbols.get(&normalize_symbol(symbol)) else {
            return Ok(Vec::new());
        };

        Ok(ids.iter().filter_map(|id| idx.coins.get(id).cloned()).collect())
    }
}

#[async_trait::async_trait]
impl InitLock for MemoryCache {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();

        match locks.get(key) {
            Some(expiry) if *expiry > now => Ok(false),
            _ => {
                locks.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }
}
