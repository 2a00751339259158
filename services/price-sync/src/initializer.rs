use crate::cache::{InitLock, MetadataCache};
use crate::types::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default lock key shared by every instance
pub const DEFAULT_LOCK_KEY: &str = "coin_cache_init_lock";
/// Lock lifetime; also the minimum gap between two population runs
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Another instance holds the lock, or populated within the TTL
    Skipped,
    /// Lock taken but the catalog came back empty
    EmptyCatalog,
    /// Catalog written; number of coins
    Populated(usize),
}

/// Populates the metadata cache from the catalog once per lock window.
///
/// The lock is never released: it expires after its TTL, even when
/// population succeeded.
pub struct CacheInitializer {
    source: Arc<dyn PriceSource>,
    cache: Arc<dyn MetadataCache>,
    lock: Arc<dyn InitLock>,
    lock_key: String,
    lock_ttl: Duration,
}

impl CacheInitializer {
    pub fn new(
        source: Arc<dyn PriceSource>,
        cache: Arc<dyn MetadataCache>,
        lock: Arc<dyn InitLock>,
    ) -> Self {
        Self {
            source,
            cache,
            lock,
            lock_key: DEFAULT_LOCK_KEY.to_string(),
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn with_lock(mut self, key: &str, ttl: Duration) -> Self {
        self.lock_key = key.to_string();
        self.lock_ttl = ttl;
        self
    }

    pub async fn try_initialize(&self) -> Result<InitOutcome> {
        if !self.lock.try_acquire(&self.lock_key, self.lock_ttl).await? {
            debug!("Lock {} already held by another instance", self.lock_key);
            return Ok(InitOutcome::Skipped);
        }

        let catalog = self.source.fetch_catalog().await;
        if catalog.is_empty() {
            info!("No coins found or there was an error, cache left empty");
            return Ok(InitOutcome::EmptyCatalog);
        }

        info!("Populating metadata cache with {} coins", catalog.len());
        let total = catalog.len();
        let mut written = 0;
        for entry in catalog {
            // Prices are filled in later by the refresher
            let coin = CachedCoin::from(entry);
            match self.cache.put(&coin).await {
                Ok(()) => written += 1,
                Err(e) => warn!("Failed to cache coin {}: {}", coin.id, e),
            }
        }

        if written < total {
            warn!("Cached {} of {} catalog coins", written, total);
        }
        info!("✓ Metadata cache populated ({} coins)", written);
        Ok(InitOutcome::Populated(written))
    }
}
