//! Metadata cache population under the shared initialization lock

mod common;

use common::ScriptedSource;
use price_sync::{CacheInitializer, CoinLookup, InitOutcome, MemoryCache};
use std::sync::Arc;
use std::time::Duration;

const CATALOG: &[(&str, &str, &str)] = &[
    ("bitcoin", "btc", "Bitcoin"),
    ("ethereum", "eth", "Ethereum"),
    ("batcat", "BTC", "Batcat"),
];

fn initializer(source: Arc<ScriptedSource>, cache: Arc<MemoryCache>) -> CacheInitializer {
    CacheInitializer::new(source, cache.clone(), cache)
        .with_lock("coin_cache_init_lock", Duration::from_secs(600))
}

#[tokio::test]
async fn test_racing_instances_fetch_catalog_once() {
    let source = Arc::new(ScriptedSource::new().with_catalog(CATALOG));
    let cache = Arc::new(MemoryCache::new());
    let first = initializer(source.clone(), cache.clone());
    let second = initializer(source.clone(), cache.clone());

    let (a, b) = tokio::join!(first.try_initialize(), second.try_initialize());
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(source.catalog_calls(), 1);
    assert_eq!(
        outcomes.iter().filter(|o| **o == InitOutcome::Populated(3)).count(),
        1
    );
    assert_eq!(
        outcomes.iter().filter(|o| **o == InitOutcome::Skipped).count(),
        1
    );
    assert_eq!(cache.len().await, 3);
}

#[tokio::test]
async fn test_empty_catalog_leaves_cache_empty() {
    let source = Arc::new(ScriptedSource::new());
    let cache = Arc::new(MemoryCache::new());

    let outcome = initializer(source.clone(), cache.clone())
        .try_initialize()
        .await
        .unwrap();

    assert_eq!(outcome, InitOutcome::EmptyCatalog);
    assert!(cache.is_empty().await);

    // The lock is still held, so a retry inside the window does nothing
    let retry = initializer(source.clone(), cache).try_initialize().await.unwrap();
    assert_eq!(retry, InitOutcome::Skipped);
    assert_eq!(source.catalog_calls(), 1);
}

#[tokio::test]
async fn test_lookups_after_population() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_catalog(CATALOG)
            .with_price("bitcoin", 50000),
    );
    let cache = Arc::new(MemoryCache::new());
    initializer(source.clone(), cache.clone())
        .try_initialize()
        .await
        .unwrap();

    let lookup = CoinLookup::new(cache, source);

    let btc = lookup.coin("bitcoin").await.unwrap().unwrap();
    assert_eq!(btc.name, "Bitcoin");
    assert!(btc.price.is_zero());
    assert!(lookup.coin("dogecoin").await.unwrap().is_none());

    let ids: Vec<String> = lookup
        .search_symbol("btc")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec!["batcat", "bitcoin"]);
    assert!(lookup.search_symbol("doge").await.unwrap().is_empty());

    let price = lookup.current_price("bitcoin", "USD").await;
    assert_eq!(price.get("usd").map(|p| p.to_string()), Some("50000".to_string()));
    assert!(lookup.current_price("ethereum", "usd").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_population_repeats_after_lock_expires() {
    let source = Arc::new(ScriptedSource::new().with_catalog(CATALOG));
    let cache = Arc::new(MemoryCache::new());
    let init = initializer(source.clone(), cache);

    assert_eq!(init.try_initialize().await.unwrap(), InitOutcome::Populated(3));

    tokio::time::advance(Duration::from_secs(599)).await;
    assert_eq!(init.try_initialize().await.unwrap(), InitOutcome::Skipped);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(init.try_initialize().await.unwrap(), InitOutcome::Populated(3));
    assert_eq!(source.catalog_calls(), 2);
}
