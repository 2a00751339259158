//! Price Updater - standalone refresh loop
//!
//! Runs the staleness scan and batched refresh every interval until the
//! database becomes unreachable, then exits non-zero so the supervisor
//! restarts it. Only one instance should run per deployment.

use price_sync::{CoinGeckoClient, PgCoinStore, Settings};
use std::sync::Arc;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting Price Updater...");

    let settings = Settings::load()?;

    let source = Arc::new(CoinGeckoClient::new(
        &settings.coingecko_url,
        settings.coingecko_key.clone(),
    )?);

    let pool = price_sync::store::connect(&settings.database_url).await?;
    let store = Arc::new(PgCoinStore::new(pool.clone()));
    store.migrate().await?;
    info!("✓ Database connected");

    let scheduler = price_sync::build_scheduler(&settings, source, store);

    let result = tokio::select! {
        result = scheduler.run() => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    pool.close().await;

    if let Err(e) = &result {
        error!("Price updater stopped: {}", e);
    }
    result
}
