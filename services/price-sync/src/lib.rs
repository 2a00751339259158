//! Price synchronization and caching for coin portfolios.
//!
//! Coin metadata is cached from the provider catalog once per lock window;
//! stored prices are refreshed in provider-sized batches by a periodic
//! staleness scan.

pub mod types;
pub mod sources {
    pub mod coingecko;
}
pub mod cache;
pub mod config;
pub mod initializer;
pub mod lookup;
pub mod portfolio;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod updater;

pub use types::*;
pub use sources::coingecko::CoinGeckoClient;
pub use cache::{InitLock, MemoryCache, MetadataCache, RedisCache};
pub use config::Settings;
pub use initializer::{CacheInitializer, InitOutcome};
pub use lookup::CoinLookup;
pub use portfolio::PortfolioService;
pub use scanner::StalenessScanner;
pub use scheduler::{CycleReport, PriceRefreshScheduler, SchedulerState};
pub use store::{CoinStore, MemoryCoinStore, PgCoinStore};
pub use updater::{BatchPriceUpdater, RefreshReport};

use std::sync::Arc;

/// Wire the refresh loop from settings
pub fn build_scheduler(
    settings: &Settings,
    source: Arc<dyn PriceSource>,
    store: Arc<dyn CoinStore>,
) -> PriceRefreshScheduler {
    let scanner = StalenessScanner::new(store.clone());
    let updater = BatchPriceUpdater::new(source, store)
        .with_api_batch_size(settings.api_batch_size)
        .with_flush_threshold(settings.flush_batch_size);

    PriceRefreshScheduler::new(scanner, updater, &settings.currency)
        .with_interval(settings.refresh_interval())
        .with_stale_after(settings.stale_after())
}
