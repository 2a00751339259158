use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use price_sync::{
    CacheInitializer, CoinGeckoClient, CoinLookup, PgCoinStore, PriceRefreshScheduler,
    RedisCache, Settings,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};

/// Application state shared across handlers
pub struct AppState {
    pub lookup: CoinLookup,
    pub source: Arc<CoinGeckoClient>,
    pub scheduler: PriceRefreshScheduler,
    pub api_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting Price Sync Service...");

    let settings = Settings::load()?;

    let source = Arc::new(CoinGeckoClient::new(
        &settings.coingecko_url,
        settings.coingecko_key.clone(),
    )?);
    info!("✓ CoinGecko client initialized");

    info!("Connecting to database...");
    let pool = price_sync::store::connect(&settings.database_url).await?;
    let store = Arc::new(PgCoinStore::new(pool.clone()));
    store.migrate().await?;
    info!("✓ Database connected");

    let cache = Arc::new(RedisCache::new(&settings.redis_url).await?);
    info!("✓ Redis connected");

    // Populate the metadata cache in the background; lookups tolerate a partial cache
    let initializer = CacheInitializer::new(source.clone(), cache.clone(), cache.clone())
        .with_lock(&settings.init_lock_key, settings.init_lock_ttl());
    tokio::spawn(async move {
        match initializer.try_initialize().await {
            Ok(outcome) => info!("Cache initialization: {:?}", outcome),
            Err(e) => warn!("Cache initialization failed: {}", e),
        }
    });

    if settings.api_key.is_none() {
        warn!("⚠ API_KEY not set, POST /refresh is disabled");
    }

    let state = Arc::new(AppState {
        lookup: CoinLookup::new(cache.clone(), source.clone()),
        source: source.clone(),
        scheduler: price_sync::build_scheduler(&settings, source.clone(), store.clone()),
        api_key: settings.api_key.clone(),
    });

    let refresh_routes = Router::new()
        .route("/refresh", post(handlers::trigger_refresh))
        .layer(from_fn_with_state(state.clone(), middleware::require_api_key));

    let app = Router::new()
        .route("/coins/search", get(handlers::search_coins))
        .route("/coins/:id", get(handlers::get_coin))
        .route("/coins/:id/price", get(handlers::get_coin_price))
        .route("/health", get(handlers::health_check))
        .merge(refresh_routes)
        .layer(CorsLayer::new().allow_origin(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", settings.port)).await?;
    info!("🚀 Price Sync Service listening on port {}", settings.port);

    axum::serve(listener, app).await?;

    pool.close().await;
    Ok(())
}

mod handlers;
mod middleware;
